//! Test fixtures.
//!
//! [`Fixture`] wires a [`Connector`] for two models, a category and a
//! product that references it, against in-memory parts that tests can
//! inspect and drive.

use bindsync_engine::{
    BackendConfig, Binding, BindingStore, CallLog, Connector, ExportHooks, ExternalId,
    FieldMapper, LocalId, LocalStore, ManualClock, MemoryAdapter, MemoryAdvisoryLocks, MemoryJobQueue, MemoryLocalStore,
    Model, ModelComponents, Payload, ReferenceDependencies, Registry, Timestamp, Worker,
};
use bindsync_store::{FileBindingStore, MemoryBindingStore};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Model name of the referenced side.
pub const CATEGORY: &str = "product.category";
/// Model name of the referencing side.
pub const PRODUCT: &str = "product.product";
/// First id the category backend assigns.
pub const FIRST_CATEGORY_ID: u64 = 501;
/// First id the product backend assigns.
pub const FIRST_PRODUCT_ID: u64 = 900;

/// The category model.
pub fn category_model() -> Model {
    Model::new(CATEGORY)
}

/// The product model.
pub fn product_model() -> Model {
    Model::new(PRODUCT)
}

/// A payload with a single `name` field.
pub fn named(name: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert("name".into(), json!(name));
    payload
}

/// Configures a [`Fixture`].
#[derive(Clone)]
pub struct FixtureBuilder {
    config: BackendConfig,
    file_backed: bool,
    legacy_products: bool,
    product_export_hooks: Option<Arc<dyn ExportHooks>>,
}

impl fmt::Debug for FixtureBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureBuilder")
            .field("config", &self.config)
            .field("file_backed", &self.file_backed)
            .field("legacy_products", &self.legacy_products)
            .field("product_export_hooks", &self.product_export_hooks.is_some())
            .finish()
    }
}

impl Default for FixtureBuilder {
    fn default() -> Self {
        Self {
            config: BackendConfig::default().with_default_lang("en_US"),
            file_backed: false,
            legacy_products: false,
            product_export_hooks: None,
        }
    }
}

impl FixtureBuilder {
    /// Sets the backend config.
    pub fn config(mut self, config: BackendConfig) -> Self {
        self.config = config;
        self
    }

    /// Persists bindings in a temporary directory instead of memory.
    pub fn file_backed(mut self) -> Self {
        self.file_backed = true;
        self
    }

    /// Routes product imports through the legacy adapter.
    pub fn legacy_products(mut self) -> Self {
        self.legacy_products = true;
        self
    }

    /// Replaces the product export hooks.
    ///
    /// The replacement does not export the referenced category first, so
    /// products exported through it should have none.
    pub fn product_export_hooks(mut self, hooks: Arc<dyn ExportHooks>) -> Self {
        self.product_export_hooks = Some(hooks);
        self
    }

    /// Builds the fixture.
    ///
    /// # Panics
    ///
    /// Panics if the temporary store cannot be created.
    pub fn build(self) -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let log = CallLog::new();

        let categories = Arc::new(
            MemoryAdapter::new(CATEGORY)
                .with_start_id(FIRST_CATEGORY_ID)
                .with_clock(clock.clone())
                .with_log(log.clone()),
        );
        let products = Arc::new(
            MemoryAdapter::new(PRODUCT)
                .with_start_id(FIRST_PRODUCT_ID)
                .with_clock(clock.clone())
                .with_log(log.clone()),
        );

        let mut product_components = ModelComponents::new(PRODUCT)
            .with_adapter(products.clone())
            .with_legacy_adapter(products.clone())
            .with_mapper(Arc::new(
                FieldMapper::new()
                    .direct("name", "name")
                    .direct_on_create("default_code", "default_code")
                    .reference("categ_id", "categ_id", CATEGORY),
            ))
            .with_hooks(Arc::new(
                ReferenceDependencies::new().reference("categ_id", CATEGORY),
            ));
        if let Some(hooks) = self.product_export_hooks {
            product_components = product_components.with_export_hooks(hooks);
        }
        if self.legacy_products {
            product_components = product_components.legacy();
        }

        let registry = Registry::builder()
            .register(
                ModelComponents::new(CATEGORY)
                    .with_adapter(categories.clone())
                    .with_mapper(Arc::new(FieldMapper::new().direct("name", "name")))
                    .with_priority(5),
            )
            .register(product_components)
            .build()
            .expect("fixture registry is valid");

        let mut temp_dir = None;
        let store: Arc<dyn BindingStore> = if self.file_backed {
            let dir = TempDir::new().expect("Failed to create temp directory");
            let store = FileBindingStore::open(dir.path(), true).expect("Failed to open store");
            temp_dir = Some(dir);
            Arc::new(store)
        } else {
            Arc::new(MemoryBindingStore::new())
        };

        let local = Arc::new(MemoryLocalStore::new());
        let queue = Arc::new(MemoryJobQueue::new(clock.clone()));
        let locks = MemoryAdvisoryLocks::new();
        let conn = Connector::new(self.config, store.clone(), local.clone(), registry)
            .with_clock(clock.clone())
            .with_advisory_locks(Arc::new(locks.clone()))
            .with_dispatcher(queue.clone());

        Fixture {
            conn,
            store,
            local,
            categories,
            products,
            log,
            clock,
            queue,
            locks,
            _temp_dir: temp_dir,
        }
    }
}

/// A connector over in-memory parts, with handles to all of them.
pub struct Fixture {
    /// The connector under test.
    pub conn: Connector,
    /// The binding store.
    pub store: Arc<dyn BindingStore>,
    /// The local system of record.
    pub local: Arc<MemoryLocalStore>,
    /// Remote category backend; ids start at 501.
    pub categories: Arc<MemoryAdapter>,
    /// Remote product backend; ids start at 900.
    pub products: Arc<MemoryAdapter>,
    /// Calls made to both backends, in order.
    pub log: CallLog,
    /// The clock used for timestamps and job etas.
    pub clock: Arc<ManualClock>,
    /// Where delayed work goes.
    pub queue: Arc<MemoryJobQueue>,
    /// Advisory locks used by imports.
    pub locks: MemoryAdvisoryLocks,
    _temp_dir: Option<TempDir>,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    /// A memory-backed fixture with the default config.
    pub fn new() -> Self {
        FixtureBuilder::default().build()
    }

    /// Starts configuring a fixture.
    pub fn builder() -> FixtureBuilder {
        FixtureBuilder::default()
    }

    /// Creates a local category.
    pub fn seed_category(&self, name: &str) -> LocalId {
        self.local.insert(&category_model(), named(name))
    }

    /// Creates a local product, optionally referencing a local category.
    pub fn seed_product(&self, name: &str, category: Option<LocalId>) -> LocalId {
        let mut fields = named(name);
        fields.insert(
            "default_code".into(),
            json!(format!("P-{}", name.to_uppercase())),
        );
        fields.insert(
            "categ_id".into(),
            category.map_or(serde_json::Value::Null, |c| json!(c.0)),
        );
        self.local.insert(&product_model(), fields)
    }

    /// Creates a remote category.
    pub fn remote_category(&self, name: &str, write_date: Option<Timestamp>) -> ExternalId {
        self.categories.insert(named(name), write_date)
    }

    /// Creates a remote product, optionally referencing a remote category.
    pub fn remote_product(
        &self,
        name: &str,
        category: Option<ExternalId>,
        write_date: Option<Timestamp>,
    ) -> ExternalId {
        let mut fields = named(name);
        fields.insert(
            "categ_id".into(),
            category.map_or(serde_json::Value::Null, |c| json!([c.get(), name])),
        );
        self.products.insert(fields, write_date)
    }

    /// Returns the binding of a local record, creating a placeholder.
    ///
    /// # Panics
    ///
    /// Panics if the store rejects the placeholder.
    pub fn placeholder(&self, model: &Model, local_id: LocalId) -> Binding {
        self.conn
            .binder(model)
            .ensure_binding(local_id, false)
            .expect("Failed to create placeholder binding")
    }

    /// Returns the active binding of a local record.
    ///
    /// # Panics
    ///
    /// Panics on a store error.
    pub fn binding_of(&self, model: &Model, local_id: LocalId) -> Option<Binding> {
        self.store
            .find_by_local(self.conn.config().backend_id, model, local_id, false)
            .expect("Failed to read binding")
    }

    /// Returns the binding of a remote record.
    ///
    /// # Panics
    ///
    /// Panics on a store error.
    pub fn binding_by_external(&self, model: &Model, external_id: ExternalId) -> Option<Binding> {
        self.store
            .find_by_external(self.conn.config().backend_id, model, external_id)
            .expect("Failed to read binding")
    }

    /// Reads a local record's fields.
    ///
    /// # Panics
    ///
    /// Panics on a local store error.
    pub fn local_fields(&self, model: &Model, local_id: LocalId) -> Option<Payload> {
        self.local
            .read(model, local_id)
            .expect("Failed to read local record")
            .map(|r| r.fields)
    }

    /// A worker draining this fixture's queue.
    pub fn worker(&self) -> Worker {
        Worker::new(self.conn.clone(), self.queue.clone())
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}
