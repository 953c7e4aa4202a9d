//! Payload mapping between local and remote records.

use crate::binder::Binder;
use crate::connector::Connector;
use crate::error::{SyncError, SyncResult};
use crate::record::{reference_id, LocalRecord, Payload, RemoteRecord};
use bindsync_store::{ExternalId, LocalId, Model};
use serde_json::Value;

/// What a mapper may look at while mapping.
#[derive(Debug, Clone, Copy)]
pub struct MapContext<'a> {
    conn: &'a Connector,
    model: &'a Model,
}

impl<'a> MapContext<'a> {
    /// Creates a context for mapping records of `model`.
    pub fn new(conn: &'a Connector, model: &'a Model) -> Self {
        Self { conn, model }
    }

    /// The connector running the transfer.
    pub fn connector(&self) -> &'a Connector {
        self.conn
    }

    /// The model being mapped.
    pub fn model(&self) -> &'a Model {
        self.model
    }

    /// A binder for another model, to translate references.
    pub fn binder(&self, model: &Model) -> Binder {
        self.conn.binder(model)
    }
}

/// Maps a local record to the payload sent to the backend.
pub trait ExportMapper: Send + Sync {
    /// Builds the payload.
    ///
    /// `for_create` selects the create shape. `fields`, when set, restricts
    /// an update to those local fields.
    fn to_export_payload(
        &self,
        ctx: &MapContext<'_>,
        record: &LocalRecord,
        for_create: bool,
        fields: Option<&[String]>,
    ) -> SyncResult<Payload>;
}

/// Maps a remote record to the payload written locally.
pub trait ImportMapper: Send + Sync {
    /// Builds the payload. `for_create` selects the create shape.
    fn to_import_payload(
        &self,
        ctx: &MapContext<'_>,
        record: &RemoteRecord,
        for_create: bool,
    ) -> SyncResult<Payload>;
}

#[derive(Debug, Clone, PartialEq)]
enum MappingKind {
    Direct,
    Reference(Model),
}

#[derive(Debug, Clone, PartialEq)]
struct FieldMapping {
    local: String,
    remote: String,
    kind: MappingKind,
    create_only: bool,
}

/// A declarative mapper usable in both directions.
///
/// # Example
///
/// ```rust
/// use bindsync_engine::FieldMapper;
///
/// let mapper = FieldMapper::new()
///     .direct("name", "name")
///     .direct_on_create("default_code", "code")
///     .reference("categ_id", "categ_id", "product.category");
/// # let _ = mapper;
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMapper {
    mappings: Vec<FieldMapping>,
}

impl FieldMapper {
    /// A mapper with no fields.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, local: String, remote: String, kind: MappingKind, create_only: bool) -> Self {
        self.mappings.push(FieldMapping {
            local,
            remote,
            kind,
            create_only,
        });
        self
    }

    /// Copies `local` to `remote` and back.
    pub fn direct(self, local: impl Into<String>, remote: impl Into<String>) -> Self {
        self.push(local.into(), remote.into(), MappingKind::Direct, false)
    }

    /// Like [`FieldMapper::direct`], but only in the create shape.
    pub fn direct_on_create(self, local: impl Into<String>, remote: impl Into<String>) -> Self {
        self.push(local.into(), remote.into(), MappingKind::Direct, true)
    }

    /// Translates a reference to a record of `model` through its binder.
    ///
    /// A referenced record without a binding is a data error.
    pub fn reference(
        self,
        local: impl Into<String>,
        remote: impl Into<String>,
        model: impl Into<Model>,
    ) -> Self {
        self.push(
            local.into(),
            remote.into(),
            MappingKind::Reference(model.into()),
            false,
        )
    }

    fn applies(mapping: &FieldMapping, for_create: bool) -> bool {
        for_create || !mapping.create_only
    }
}

impl ExportMapper for FieldMapper {
    fn to_export_payload(
        &self,
        ctx: &MapContext<'_>,
        record: &LocalRecord,
        for_create: bool,
        fields: Option<&[String]>,
    ) -> SyncResult<Payload> {
        let mut payload = Payload::new();
        for mapping in self.mappings.iter().filter(|m| Self::applies(m, for_create)) {
            if let Some(fields) = fields {
                if !fields.iter().any(|f| *f == mapping.local) {
                    continue;
                }
            }
            let Some(value) = record.get(&mapping.local) else {
                continue;
            };

            let mapped = match &mapping.kind {
                MappingKind::Direct => value.clone(),
                MappingKind::Reference(model) => match reference_id(value) {
                    None => Value::Null,
                    Some(id) => {
                        let external = ctx.binder(model).to_external_local(LocalId(id))?;
                        let external = external.ok_or_else(|| {
                            SyncError::data(format!(
                                "{model} record {id} referenced by {}.{} has no remote id",
                                ctx.model(),
                                mapping.local
                            ))
                        })?;
                        Value::from(external.get())
                    }
                },
            };
            payload.insert(mapping.remote.clone(), mapped);
        }
        Ok(payload)
    }
}

impl ImportMapper for FieldMapper {
    fn to_import_payload(
        &self,
        ctx: &MapContext<'_>,
        record: &RemoteRecord,
        for_create: bool,
    ) -> SyncResult<Payload> {
        let mut payload = Payload::new();
        for mapping in self.mappings.iter().filter(|m| Self::applies(m, for_create)) {
            let Some(value) = record.get(&mapping.remote) else {
                continue;
            };

            let mapped = match &mapping.kind {
                MappingKind::Direct => value.clone(),
                MappingKind::Reference(model) => {
                    match reference_id(value).and_then(ExternalId::new) {
                        None => Value::Null,
                        Some(external) => {
                            let local = ctx.binder(model).to_internal_local(external)?;
                            let local = local.ok_or_else(|| {
                                SyncError::data(format!(
                                    "{model} record {external} referenced by {}.{} is not imported",
                                    ctx.model(),
                                    mapping.remote
                                ))
                            })?;
                            Value::from(local.0)
                        }
                    }
                }
            };
            payload.insert(mapping.local.clone(), mapped);
        }
        Ok(payload)
    }
}
