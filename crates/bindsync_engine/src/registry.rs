//! Static mapping from models to their adapters, mappers and hooks.

use crate::adapter::{BackendAdapter, LegacyAdapter};
use crate::error::{SyncError, SyncResult};
use crate::hooks::{DefaultHooks, ExportHooks, ImportHooks};
use crate::mapper::{ExportMapper, ImportMapper};
use bindsync_store::Model;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Default queue priority. Lower runs first.
pub const DEFAULT_PRIORITY: u8 = 10;

/// Kind of component looked up in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The model itself.
    Model,
    /// [`BackendAdapter`].
    BackendAdapter,
    /// [`LegacyAdapter`].
    LegacyAdapter,
    /// [`ExportMapper`].
    ExportMapper,
    /// [`ImportMapper`].
    ImportMapper,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Model => "components",
            Role::BackendAdapter => "backend adapter",
            Role::LegacyAdapter => "legacy adapter",
            Role::ExportMapper => "export mapper",
            Role::ImportMapper => "import mapper",
        };
        f.write_str(name)
    }
}

/// Everything the engine needs to synchronize one model.
#[derive(Clone)]
pub struct ModelComponents {
    model: Model,
    adapter: Option<Arc<dyn BackendAdapter>>,
    legacy_adapter: Option<Arc<dyn LegacyAdapter>>,
    export_mapper: Option<Arc<dyn ExportMapper>>,
    import_mapper: Option<Arc<dyn ImportMapper>>,
    export_hooks: Arc<dyn ExportHooks>,
    import_hooks: Arc<dyn ImportHooks>,
    legacy: bool,
    priority: u8,
    channel: String,
}

impl fmt::Debug for ModelComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelComponents")
            .field("model", &self.model)
            .field("adapter", &self.adapter.is_some())
            .field("legacy_adapter", &self.legacy_adapter.is_some())
            .field("export_mapper", &self.export_mapper.is_some())
            .field("import_mapper", &self.import_mapper.is_some())
            .field("legacy", &self.legacy)
            .field("priority", &self.priority)
            .field("channel", &self.channel)
            .finish()
    }
}

impl ModelComponents {
    /// Starts a registration for `model` with default hooks, priority and a
    /// `root.<model>` channel.
    pub fn new(model: impl Into<Model>) -> Self {
        let model = model.into();
        let channel = format!("root.{model}");
        let hooks = Arc::new(DefaultHooks);
        Self {
            model,
            adapter: None,
            legacy_adapter: None,
            export_mapper: None,
            import_mapper: None,
            export_hooks: hooks.clone(),
            import_hooks: hooks,
            legacy: false,
            priority: DEFAULT_PRIORITY,
            channel,
        }
    }

    /// Sets the backend adapter.
    pub fn with_adapter(mut self, adapter: Arc<dyn BackendAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Sets the legacy adapter.
    pub fn with_legacy_adapter(mut self, adapter: Arc<dyn LegacyAdapter>) -> Self {
        self.legacy_adapter = Some(adapter);
        self
    }

    /// Routes imports of this model through the legacy adapter.
    pub fn legacy(mut self) -> Self {
        self.legacy = true;
        self
    }

    /// Sets the export mapper.
    pub fn with_export_mapper(mut self, mapper: Arc<dyn ExportMapper>) -> Self {
        self.export_mapper = Some(mapper);
        self
    }

    /// Sets the import mapper.
    pub fn with_import_mapper(mut self, mapper: Arc<dyn ImportMapper>) -> Self {
        self.import_mapper = Some(mapper);
        self
    }

    /// Sets one mapper for both directions.
    pub fn with_mapper<M>(mut self, mapper: Arc<M>) -> Self
    where
        M: ExportMapper + ImportMapper + 'static,
    {
        self.export_mapper = Some(mapper.clone());
        self.import_mapper = Some(mapper);
        self
    }

    /// Sets the export hooks.
    pub fn with_export_hooks(mut self, hooks: Arc<dyn ExportHooks>) -> Self {
        self.export_hooks = hooks;
        self
    }

    /// Sets the import hooks.
    pub fn with_import_hooks(mut self, hooks: Arc<dyn ImportHooks>) -> Self {
        self.import_hooks = hooks;
        self
    }

    /// Sets one hook implementation for both directions.
    pub fn with_hooks<H>(mut self, hooks: Arc<H>) -> Self
    where
        H: ExportHooks + ImportHooks + 'static,
    {
        self.export_hooks = hooks.clone();
        self.import_hooks = hooks;
        self
    }

    /// Sets the queue priority of jobs for this model.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the queue channel of jobs for this model.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// The registered model.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Returns the backend adapter.
    pub fn adapter(&self) -> SyncResult<&dyn BackendAdapter> {
        self.adapter
            .as_deref()
            .ok_or_else(|| SyncError::missing(&self.model, Role::BackendAdapter))
    }

    /// Returns the legacy adapter.
    pub fn legacy_adapter(&self) -> SyncResult<&dyn LegacyAdapter> {
        self.legacy_adapter
            .as_deref()
            .ok_or_else(|| SyncError::missing(&self.model, Role::LegacyAdapter))
    }

    /// Returns the export mapper.
    pub fn export_mapper(&self) -> SyncResult<&dyn ExportMapper> {
        self.export_mapper
            .as_deref()
            .ok_or_else(|| SyncError::missing(&self.model, Role::ExportMapper))
    }

    /// Returns the import mapper.
    pub fn import_mapper(&self) -> SyncResult<&dyn ImportMapper> {
        self.import_mapper
            .as_deref()
            .ok_or_else(|| SyncError::missing(&self.model, Role::ImportMapper))
    }

    /// Returns the export hooks.
    pub fn export_hooks(&self) -> &dyn ExportHooks {
        self.export_hooks.as_ref()
    }

    /// Returns the import hooks.
    pub fn import_hooks(&self) -> &dyn ImportHooks {
        self.import_hooks.as_ref()
    }

    /// Returns true if imports go through the legacy adapter.
    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    /// Queue priority.
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Queue channel.
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

/// The set of registered models. Immutable once built.
#[derive(Debug, Default)]
pub struct Registry {
    models: HashMap<Model, ModelComponents>,
}

impl Registry {
    /// Starts building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Returns the components of a model.
    pub fn get(&self, model: &Model) -> SyncResult<&ModelComponents> {
        self.models
            .get(model)
            .ok_or_else(|| SyncError::missing(model, Role::Model))
    }

    /// Returns true if the model is registered.
    pub fn contains(&self, model: &Model) -> bool {
        self.models.contains_key(model)
    }

    /// Registered models, sorted by name.
    pub fn models(&self) -> Vec<&Model> {
        let mut models: Vec<_> = self.models.keys().collect();
        models.sort();
        models
    }
}

/// Collects registrations for a [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    models: HashMap<Model, ModelComponents>,
    duplicates: Vec<Model>,
}

impl RegistryBuilder {
    /// Adds a model.
    pub fn register(mut self, components: ModelComponents) -> Self {
        let model = components.model.clone();
        if self.models.insert(model.clone(), components).is_some() {
            self.duplicates.push(model);
        }
        self
    }

    /// Freezes the registry.
    ///
    /// Fails if a model was registered twice.
    pub fn build(self) -> SyncResult<Registry> {
        if let Some(model) = self.duplicates.first() {
            return Err(SyncError::Config(format!("model {model} registered twice")));
        }
        Ok(Registry {
            models: self.models,
        })
    }
}
