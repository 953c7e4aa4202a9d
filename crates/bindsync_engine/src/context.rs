//! Request context passed to the local store.

/// Options accompanying a write to the local system of record.
///
/// Immutable once built; importers create one per transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Language for translatable fields.
    pub lang: Option<String>,
    /// Set on writes made by an import so the local side does not export
    /// the change straight back.
    pub no_export: bool,
}

impl RequestContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the language.
    pub fn with_lang(mut self, lang: Option<String>) -> Self {
        self.lang = lang;
        self
    }

    /// Sets the echo-suppression flag.
    pub fn with_no_export(mut self, no_export: bool) -> Self {
        self.no_export = no_export;
        self
    }
}
