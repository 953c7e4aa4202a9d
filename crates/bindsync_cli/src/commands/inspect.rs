//! Inspect command implementation.

use bindsync_store::{BackendId, Binding, BindingFilter, ExternalId, LocalId, Model};
use serde::Serialize;
use std::path::Path;

/// Which bindings to list.
#[derive(Debug, Default)]
pub struct Query {
    /// Backend id.
    pub backend: Option<u32>,
    /// Model name.
    pub model: Option<String>,
    /// Local record id.
    pub local_id: Option<u64>,
    /// Remote record id.
    pub external_id: Option<u64>,
    /// Only bindings not yet exported.
    pub unexported: bool,
    /// Include soft-deleted bindings.
    pub inactive: bool,
}

impl Query {
    fn to_filter(&self) -> Result<BindingFilter, Box<dyn std::error::Error>> {
        let mut filter = BindingFilter::new();
        if let Some(backend) = self.backend {
            filter = filter.backend(BackendId(backend));
        }
        if let Some(model) = &self.model {
            filter = filter.model(Model::new(model.as_str()));
        }
        if let Some(local_id) = self.local_id {
            filter = filter.local_id(LocalId(local_id));
        }
        if let Some(external_id) = self.external_id {
            let external_id = ExternalId::new(external_id).ok_or("external id must not be 0")?;
            filter = filter.external_id(external_id);
        }
        if self.unexported {
            filter = filter.unexported_only();
        }
        if self.inactive {
            filter = filter.include_inactive();
        }
        Ok(filter)
    }
}

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Rows in the store, inactive ones included.
    pub total_rows: usize,
    /// Rows without a remote id.
    pub unexported_rows: usize,
    /// Rows matching the query.
    pub bindings: Vec<Binding>,
}

/// Runs the inspect command.
pub fn run(path: &Path, query: &Query, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = super::read_snapshot(path)?;
    let result = inspect(path, snapshot.rows, query)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print!("{}", render_text(&result));
        }
    }

    Ok(())
}

fn inspect(
    path: &Path,
    rows: Vec<Binding>,
    query: &Query,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let filter = query.to_filter()?;
    let total_rows = rows.len();
    let unexported_rows = rows.iter().filter(|b| b.external_id.is_none()).count();
    let bindings = rows.into_iter().filter(|b| filter.matches(b)).collect();
    Ok(InspectResult {
        path: path.display().to_string(),
        total_rows,
        unexported_rows,
        bindings,
    })
}

fn render_text(result: &InspectResult) -> String {
    let mut out = String::new();
    out.push_str("bindsync Store Inspection\n");
    out.push_str("=========================\n\n");
    out.push_str(&format!("Path: {}\n\n", result.path));
    out.push_str(&format!("Rows:       {}\n", result.total_rows));
    out.push_str(&format!("Unexported: {}\n", result.unexported_rows));
    out.push_str(&format!("Matching:   {}\n", result.bindings.len()));

    if !result.bindings.is_empty() {
        out.push('\n');
        out.push_str(&format!(
            "{:>6}  {:>7}  {:<24} {:>10} {:>10}  {:<16} {}\n",
            "id", "backend", "model", "local", "external", "synced", "active"
        ));
        for b in &result.bindings {
            let external = b.external_id.map_or_else(|| "-".to_string(), |e| e.to_string());
            let synced = b
                .sync_timestamp
                .map_or_else(|| "never".to_string(), |t| t.to_string());
            out.push_str(&format!(
                "{:>6}  {:>7}  {:<24} {:>10} {:>10}  {:<16} {}\n",
                b.id.to_string(),
                b.backend_id.to_string(),
                b.model.as_str(),
                b.local_id.to_string(),
                external,
                synced,
                if b.active { "yes" } else { "no" }
            ));
        }
    }
    out
}
