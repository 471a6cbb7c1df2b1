//! The database facade: resolved schemas plus a shared store handle.

use std::sync::Arc;

use entimap_store::{InMemoryStore, StoreBackend};

use crate::config::DatabaseConfig;
use crate::error::{CoreError, CoreResult};
use crate::integrity::IntegrityEnforcer;
use crate::query::Query;
use crate::schema::{ModelSchema, Registry, SchemaMap};
use crate::session::Session;

/// An opened database: immutable resolved schemas, one store, one
/// configuration. Cheap to clone and share; sessions and queries are
/// spawned from it.
#[derive(Clone)]
pub struct Database {
    store: Arc<dyn StoreBackend>,
    schemas: Arc<SchemaMap>,
    config: DatabaseConfig,
}

impl Database {
    /// Opens a database over a store, resolving the registry's
    /// cross-model references.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] when resolution fails, such as a
    /// relation with no reciprocal column.
    pub fn new(
        store: Arc<dyn StoreBackend>,
        registry: Registry,
        config: DatabaseConfig,
    ) -> CoreResult<Self> {
        let schemas = Arc::new(registry.resolve()?);
        Ok(Self {
            store,
            schemas,
            config,
        })
    }

    /// Opens a database over a fresh in-memory store.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    ///
    /// # Example
    ///
    /// ```
    /// use entimap_core::{AttrKind, AttributeDef, Database, DatabaseConfig, ModelSchema, Registry};
    ///
    /// let mut registry = Registry::new();
    /// registry.register(
    ///     ModelSchema::new("user")
    ///         .attribute(AttributeDef::new("email", AttrKind::Text).unique()),
    /// )?;
    /// let db = Database::in_memory(registry, DatabaseConfig::new())?;
    ///
    /// let mut session = db.session();
    /// let user = session.new_entity("user")?;
    /// user.borrow_mut().set("email", "kim@example.com")?;
    /// session.save(&user)?;
    ///
    /// let found = session.get_by("user", "email", "kim@example.com")?;
    /// assert!(found.is_some());
    /// # Ok::<(), entimap_core::CoreError>(())
    /// ```
    pub fn in_memory(registry: Registry, config: DatabaseConfig) -> CoreResult<Self> {
        Self::new(Arc::new(InMemoryStore::new()), registry, config)
    }

    /// Starts a session with the configured caching behavior.
    #[must_use]
    pub fn session(&self) -> Session {
        Session::new(
            Arc::clone(&self.store),
            Arc::clone(&self.schemas),
            self.config,
            self.config.session_caching,
        )
    }

    /// Starts a session that never caches: every fetch rehydrates from
    /// the store and handles are always independent.
    #[must_use]
    pub fn passthrough_session(&self) -> Session {
        Session::new(
            Arc::clone(&self.store),
            Arc::clone(&self.schemas),
            self.config,
            false,
        )
    }

    /// Starts a query over one model.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownModel`] for an unregistered model.
    pub fn query(&self, model: &str) -> CoreResult<Query> {
        Ok(Query::new(
            self.schema(model)?,
            Arc::clone(&self.store),
            self.config,
        ))
    }

    /// Looks up one resolved model schema.
    pub fn schema(&self, model: &str) -> CoreResult<Arc<ModelSchema>> {
        self.schemas
            .get(model)
            .cloned()
            .ok_or_else(|| CoreError::unknown_model(model))
    }

    /// Registered model names, sorted.
    #[must_use]
    pub fn models(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Live entities referencing `pk` through one of its relationships.
    pub fn referrers(&self, model: &str, relation: &str, pk: u64) -> CoreResult<Vec<u64>> {
        let schema = self.schema(model)?;
        let enforcer = IntegrityEnforcer::new(self.store.as_ref(), &self.schemas, &self.config);
        enforcer.referrers(&schema, relation, pk)
    }

    /// The shared store handle.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StoreBackend> {
        &self.store
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> DatabaseConfig {
        self.config
    }

    pub(crate) fn schema_map(&self) -> &Arc<SchemaMap> {
        &self.schemas
    }
}
