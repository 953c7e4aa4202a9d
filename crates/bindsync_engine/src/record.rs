//! Transient record views and search filters.

use bindsync_store::{ExternalId, LocalId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field values keyed by field name.
pub type Payload = serde_json::Map<String, Value>;

/// A record of the local system of record.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalRecord {
    /// Local id.
    pub id: LocalId,
    /// Field values.
    pub fields: Payload,
}

impl LocalRecord {
    /// Creates a local record view.
    pub fn new(id: LocalId, fields: Payload) -> Self {
        Self { id, fields }
    }

    /// Returns a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// A snapshot of a remote record as returned by the backend adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    /// Remote id.
    pub external_id: ExternalId,
    /// Last modification time on the remote side. `None` counts as newer
    /// than any local sync.
    pub write_date: Option<Timestamp>,
    /// Field values.
    pub fields: Payload,
}

impl RemoteRecord {
    /// Creates a remote record snapshot.
    pub fn new(external_id: ExternalId, write_date: Option<Timestamp>, fields: Payload) -> Self {
        Self {
            external_id,
            write_date,
            fields,
        }
    }

    /// Returns a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// A conjunction of field equality conditions.
///
/// Used both for remote searches (batch import) and local searches (batch
/// export). An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// `(field, value)` pairs that must all match.
    pub equals: Vec<(String, Value)>,
    /// Only records modified at or after this time. Ignored for records
    /// without a modification time.
    pub modified_since: Option<Timestamp>,
}

impl RecordFilter {
    /// A filter matching every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds an equality condition.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((field.into(), value.into()));
        self
    }

    /// Restricts to records modified at or after `since`.
    pub fn modified_since(mut self, since: Timestamp) -> Self {
        self.modified_since = Some(since);
        self
    }

    /// Returns true if `fields` (modified at `write_date`) satisfies the filter.
    pub fn matches(&self, fields: &Payload, write_date: Option<Timestamp>) -> bool {
        if let (Some(since), Some(written)) = (self.modified_since, write_date) {
            if written < since {
                return false;
            }
        }
        self.equals
            .iter()
            .all(|(field, value)| fields.get(field) == Some(value))
    }
}

/// Reads a record reference out of a field value.
///
/// Accepts a bare id or the `[id, display_name]` pair many backends use for
/// many-to-one fields. `null`, `false` and `0` mean "no reference".
pub(crate) fn reference_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().filter(|id| *id != 0),
        Value::Array(items) => items.first().and_then(reference_id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => Payload::new(),
        }
    }

    #[test]
    fn filter_matching() {
        let fields = payload(json!({"code": "A1", "active": true}));
        assert!(RecordFilter::all().matches(&fields, None));
        assert!(RecordFilter::all().eq("code", "A1").matches(&fields, None));
        assert!(!RecordFilter::all().eq("code", "B2").matches(&fields, None));
        assert!(!RecordFilter::all().eq("missing", 1).matches(&fields, None));

        let since = RecordFilter::all().modified_since(Timestamp::from_secs(10));
        assert!(since.matches(&fields, Some(Timestamp::from_secs(10))));
        assert!(!since.matches(&fields, Some(Timestamp::from_secs(9))));
        assert!(since.matches(&fields, None));
    }

    #[test]
    fn reference_values() {
        assert_eq!(reference_id(&json!(501)), Some(501));
        assert_eq!(reference_id(&json!([501, "All / Saleable"])), Some(501));
        assert_eq!(reference_id(&json!(false)), None);
        assert_eq!(reference_id(&json!(0)), None);
        assert_eq!(reference_id(&Value::Null), None);
    }
}
