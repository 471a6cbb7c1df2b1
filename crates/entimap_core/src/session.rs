//! Sessions: the unit-of-work surface over the store.
//!
//! A session tracks every entity it has handed out in an identity map
//! keyed by `(model, pk)`, so two lookups of the same entity alias one
//! shared handle. Handles are [`Rc`]-based and sessions are therefore
//! single-threaded; concurrent work uses one session per thread over
//! the same shared store.
//!
//! [`Rc`]: std::rc::Rc

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use entimap_store::StoreBackend;
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::entity::{hydrate, Entity, EntityRef};
use crate::error::{CoreError, CoreResult};
use crate::integrity::IntegrityEnforcer;
use crate::keys;
use crate::schema::{ModelSchema, SchemaMap};
use crate::value::AttrValue;
use crate::write::WriteEngine;

/// A single-threaded unit of work over the shared store.
pub struct Session {
    store: Arc<dyn StoreBackend>,
    schemas: Arc<SchemaMap>,
    config: DatabaseConfig,
    engine: WriteEngine,
    identity: HashMap<(String, u64), EntityRef>,
    caching: bool,
}

impl Session {
    pub(crate) fn new(
        store: Arc<dyn StoreBackend>,
        schemas: Arc<SchemaMap>,
        config: DatabaseConfig,
        caching: bool,
    ) -> Self {
        let engine = WriteEngine::new(Arc::clone(&store), config);
        Self {
            store,
            schemas,
            config,
            engine,
            identity: HashMap::new(),
            caching,
        }
    }

    /// Allocates a primary key and returns a fresh, unsaved entity.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownModel`] for an unregistered model.
    pub fn new_entity(&mut self, model: &str) -> CoreResult<EntityRef> {
        let schema = self.schema(model)?;
        let pk = self.engine.allocate_pk(model)?;
        let entity = Rc::new(RefCell::new(Entity::new_unsaved(schema, pk)));
        if self.caching {
            self.identity
                .insert((model.to_string(), pk), Rc::clone(&entity));
        }
        Ok(entity)
    }

    /// Fetches one entity by primary key. Repeated fetches of the same
    /// key return the same handle while the session tracks it.
    pub fn get(&mut self, model: &str, pk: u64) -> CoreResult<Option<EntityRef>> {
        if self.caching {
            if let Some(cached) = self.identity.get(&(model.to_string(), pk)) {
                return Ok(Some(Rc::clone(cached)));
            }
        }
        let schema = self.schema(model)?;
        let Some(values) = hydrate(self.store.as_ref(), &schema, pk)? else {
            return Ok(None);
        };
        let entity = Rc::new(RefCell::new(Entity::load_committed(schema, pk, values)));
        if self.caching {
            self.identity
                .insert((model.to_string(), pk), Rc::clone(&entity));
        }
        Ok(Some(entity))
    }

    /// Fetches several entities, preserving the id order and skipping
    /// ids that no longer exist.
    pub fn get_many(&mut self, model: &str, pks: &[u64]) -> CoreResult<Vec<EntityRef>> {
        let mut entities = Vec::with_capacity(pks.len());
        for &pk in pks {
            if let Some(entity) = self.get(model, pk)? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Fetches one entity through a single-attribute unique constraint.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingIndex`] when the attribute carries no
    /// unique constraint.
    pub fn get_by(
        &mut self,
        model: &str,
        attribute: &str,
        value: impl Into<AttrValue>,
    ) -> CoreResult<Option<EntityRef>> {
        let schema = self.schema(model)?;
        let def = schema
            .attribute_def(attribute)
            .ok_or_else(|| CoreError::unknown_attribute(model, attribute))?;
        if !def.flags().unique {
            return Err(CoreError::missing_index(model, attribute, "unique"));
        }
        let value = value.into();
        let key = keys::unique_key(model, attribute);
        match self.store.hget(&key, &value.encode())? {
            Some(holder) => {
                let pk: u64 = holder.parse().map_err(|_| {
                    CoreError::corrupt_index(format!("non-numeric id '{holder}' in '{key}'"))
                })?;
                self.get(model, pk)
            }
            None => Ok(None),
        }
    }

    /// Persists one entity's pending changes. Clean entities are left
    /// alone.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EntityDeleted`] for a deleted handle and
    /// [`CoreError::UniqueConstraintViolation`] on a constraint
    /// conflict, in which case the entity keeps its pending state.
    pub fn save(&mut self, entity: &EntityRef) -> CoreResult<()> {
        let (schema, pk, old, new) = {
            let entity = entity.borrow();
            if entity.is_deleted() {
                return Err(CoreError::EntityDeleted {
                    model: entity.model().to_string(),
                    pk: entity.pk(),
                });
            }
            if !entity.is_modified() {
                return Ok(());
            }
            (
                Arc::clone(entity.schema()),
                entity.pk(),
                entity.committed().clone(),
                entity.values().clone(),
            )
        };
        self.engine.save(&schema, pk, &old, &new)?;
        entity.borrow_mut().mark_committed();
        Ok(())
    }

    /// Saves every modified tracked entity, in `(model, pk)` order.
    /// Returns how many were written.
    ///
    /// # Errors
    ///
    /// Stops at the first failing save; earlier writes stay committed.
    pub fn commit(&mut self) -> CoreResult<usize> {
        let mut dirty: Vec<EntityRef> = self
            .identity
            .values()
            .filter(|e| {
                let e = e.borrow();
                e.is_modified() && !e.is_deleted()
            })
            .map(Rc::clone)
            .collect();
        dirty.sort_by_key(|e| {
            let e = e.borrow();
            (e.model().to_string(), e.pk())
        });

        for entity in &dirty {
            self.save(entity)?;
        }
        debug!(saved = dirty.len(), "session committed");
        Ok(dirty.len())
    }

    /// Alias for [`commit`](Self::commit).
    pub fn flush(&mut self) -> CoreResult<usize> {
        self.commit()
    }

    /// Reloads one entity from the store, discarding pending changes
    /// only when `force` is set.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] when the entity has
    /// unsaved changes and `force` is off, and [`CoreError::EntityDeleted`]
    /// when the stored entity is gone, marking the handle deleted.
    pub fn refresh(&mut self, entity: &EntityRef, force: bool) -> CoreResult<()> {
        let (schema, model, pk) = {
            let entity = entity.borrow();
            if entity.is_deleted() {
                return Err(CoreError::EntityDeleted {
                    model: entity.model().to_string(),
                    pk: entity.pk(),
                });
            }
            if entity.is_modified() && !force {
                return Err(CoreError::invalid_operation(
                    "refresh would discard unsaved changes; pass force to override",
                ));
            }
            (
                Arc::clone(entity.schema()),
                entity.model().to_string(),
                entity.pk(),
            )
        };
        match hydrate(self.store.as_ref(), &schema, pk)? {
            Some(values) => {
                entity.borrow_mut().replace_committed(values);
                Ok(())
            }
            None => {
                entity.borrow_mut().mark_deleted();
                self.identity.remove(&(model.clone(), pk));
                Err(CoreError::EntityDeleted { model, pk })
            }
        }
    }

    /// Reloads every tracked entity. Entities that vanished from the
    /// store are marked deleted and dropped from tracking rather than
    /// aborting the sweep.
    pub fn refresh_all(&mut self, force: bool) -> CoreResult<()> {
        let tracked: Vec<EntityRef> = self.identity.values().map(Rc::clone).collect();
        for entity in tracked {
            if entity.borrow().is_new() {
                continue;
            }
            match self.refresh(&entity, force) {
                Ok(()) | Err(CoreError::EntityDeleted { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Deletes one entity, enforcing relationship policies. Returns how
    /// many entities were removed, cascades included. Deleting an
    /// already-deleted or never-saved handle removes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReferentialIntegrity`] when a restrict
    /// relationship blocks the delete and [`CoreError::CascadeDepthExceeded`]
    /// when the cascade runs too deep. Both leave the store untouched.
    pub fn delete(&mut self, entity: &EntityRef) -> CoreResult<usize> {
        let (schema, model, pk, skip) = {
            let entity = entity.borrow();
            (
                Arc::clone(entity.schema()),
                entity.model().to_string(),
                entity.pk(),
                entity.is_deleted() || entity.is_new(),
            )
        };
        if skip {
            let was_new = {
                let mut entity = entity.borrow_mut();
                let was_new = entity.is_new() && !entity.is_deleted();
                entity.mark_deleted();
                was_new
            };
            if was_new {
                self.identity.remove(&(model, pk));
            }
            return Ok(0);
        }

        let plan = {
            let enforcer =
                IntegrityEnforcer::new(self.store.as_ref(), &self.schemas, &self.config);
            enforcer.plan_delete(&schema, pk)?
        };
        self.engine.delete_many(&plan.victims)?;

        let removed = plan.len();
        for victim in &plan.victims {
            if let Some(tracked) = self
                .identity
                .remove(&(victim.schema.name().to_string(), victim.pk))
            {
                tracked.borrow_mut().mark_deleted();
            }
        }
        // The handle itself may be untracked in a passthrough session.
        if !entity.borrow().is_deleted() {
            entity.borrow_mut().mark_deleted();
        }
        debug!(model = %model, pk, removed, "deleted entity");
        Ok(removed)
    }

    /// Drops one entity from the identity map without touching the
    /// store. Returns whether it was tracked.
    pub fn forget(&mut self, model: &str, pk: u64) -> bool {
        self.identity.remove(&(model.to_string(), pk)).is_some()
    }

    /// Number of entities the identity map currently tracks.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.identity.len()
    }

    fn schema(&self, model: &str) -> CoreResult<Arc<ModelSchema>> {
        self.schemas
            .get(model)
            .cloned()
            .ok_or_else(|| CoreError::unknown_model(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeDef, DeletePolicy, Registry};
    use crate::value::AttrKind;
    use entimap_store::InMemoryStore;

    fn schemas() -> Arc<SchemaMap> {
        let mut registry = Registry::new();
        registry
            .register(
                ModelSchema::new("user")
                    .attribute(AttributeDef::new("email", AttrKind::Text).unique())
                    .attribute(AttributeDef::new("age", AttrKind::Int).ordered())
                    .one_to_many("orders", "order", DeletePolicy::Cascade),
            )
            .unwrap();
        registry
            .register(
                ModelSchema::new("order")
                    .attribute(AttributeDef::new("total", AttrKind::Int))
                    .foreign_key("user_id", "user"),
            )
            .unwrap();
        Arc::new(registry.resolve().unwrap())
    }

    fn session() -> Session {
        Session::new(
            Arc::new(InMemoryStore::new()),
            schemas(),
            DatabaseConfig::new(),
            true,
        )
    }

    fn seeded_user(session: &mut Session) -> EntityRef {
        let user = session.new_entity("user").unwrap();
        user.borrow_mut().set("email", "kim@example.com").unwrap();
        user.borrow_mut().set("age", 31i64).unwrap();
        session.save(&user).unwrap();
        user
    }

    #[test]
    fn get_returns_the_identical_handle() {
        let mut session = session();
        let user = seeded_user(&mut session);
        let pk = user.borrow().pk();

        let again = session.get("user", pk).unwrap().unwrap();
        assert!(Rc::ptr_eq(&user, &again));

        // An update through one handle is visible through the other.
        again.borrow_mut().set("age", 32i64).unwrap();
        assert_eq!(user.borrow().get("age"), Some(&AttrValue::Int(32)));
    }

    #[test]
    fn passthrough_sessions_rehydrate_every_time() {
        let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
        let mut writer = Session::new(store.clone(), schemas(), DatabaseConfig::new(), true);
        let user = seeded_user(&mut writer);
        let pk = user.borrow().pk();

        let mut reader = Session::new(store, schemas(), DatabaseConfig::new(), false);
        let first = reader.get("user", pk).unwrap().unwrap();
        let second = reader.get("user", pk).unwrap().unwrap();
        assert!(!Rc::ptr_eq(&first, &second));
        assert_eq!(reader.tracked(), 0);
    }

    #[test]
    fn get_by_walks_the_unique_marker() {
        let mut session = session();
        let user = seeded_user(&mut session);

        let found = session
            .get_by("user", "email", "kim@example.com")
            .unwrap()
            .unwrap();
        assert!(Rc::ptr_eq(&user, &found));
        assert!(session.get_by("user", "email", "none@example.com").unwrap().is_none());
        assert!(matches!(
            session.get_by("user", "age", 31i64),
            Err(CoreError::MissingIndex { .. })
        ));
    }

    #[test]
    fn save_is_a_noop_for_clean_entities() {
        let mut session = session();
        let user = seeded_user(&mut session);
        assert!(!user.borrow().is_modified());
        session.save(&user).unwrap();
        assert_eq!(session.commit().unwrap(), 0);
    }

    #[test]
    fn commit_saves_every_dirty_entity() {
        let mut session = session();
        let a = seeded_user(&mut session);
        let b = session.new_entity("user").unwrap();
        b.borrow_mut().set("email", "lee@example.com").unwrap();
        a.borrow_mut().set("age", 40i64).unwrap();

        assert_eq!(session.commit().unwrap(), 2);
        assert!(!a.borrow().is_modified());
        assert!(!b.borrow().is_modified());
    }

    #[test]
    fn refresh_requires_force_for_dirty_entities() {
        let mut session = session();
        let user = seeded_user(&mut session);
        user.borrow_mut().set("age", 99i64).unwrap();

        assert!(matches!(
            session.refresh(&user, false),
            Err(CoreError::InvalidOperation { .. })
        ));
        session.refresh(&user, true).unwrap();
        assert_eq!(user.borrow().get("age"), Some(&AttrValue::Int(31)));
    }

    #[test]
    fn refresh_of_a_vanished_entity_marks_it_deleted() {
        let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
        let mut session = Session::new(store.clone(), schemas(), DatabaseConfig::new(), true);
        let user = seeded_user(&mut session);
        let pk = user.borrow().pk();

        store.del(&format!("user:{pk}")).unwrap();
        assert!(matches!(
            session.refresh(&user, false),
            Err(CoreError::EntityDeleted { .. })
        ));
        assert!(user.borrow().is_deleted());
        assert_eq!(session.tracked(), 0);
    }

    #[test]
    fn delete_cascades_and_poisons_tracked_handles() {
        let mut session = session();
        let user = seeded_user(&mut session);
        let user_pk = user.borrow().pk();

        let order = session.new_entity("order").unwrap();
        order.borrow_mut().set("total", 5i64).unwrap();
        order
            .borrow_mut()
            .set("user_id", i64::try_from(user_pk).unwrap())
            .unwrap();
        session.save(&order).unwrap();

        assert_eq!(session.delete(&user).unwrap(), 2);
        assert!(user.borrow().is_deleted());
        assert!(order.borrow().is_deleted());
        assert_eq!(session.tracked(), 0);
        assert!(matches!(
            session.save(&user),
            Err(CoreError::EntityDeleted { .. })
        ));

        // Deleting again removes nothing.
        assert_eq!(session.delete(&user).unwrap(), 0);
    }

    #[test]
    fn deleting_an_unsaved_entity_only_drops_tracking() {
        let mut session = session();
        let user = session.new_entity("user").unwrap();
        assert_eq!(session.delete(&user).unwrap(), 0);
        assert!(user.borrow().is_deleted());
        assert_eq!(session.tracked(), 0);
    }

    #[test]
    fn forget_releases_the_handle() {
        let mut session = session();
        let user = seeded_user(&mut session);
        let pk = user.borrow().pk();

        assert!(session.forget("user", pk));
        assert!(!session.forget("user", pk));

        let again = session.get("user", pk).unwrap().unwrap();
        assert!(!Rc::ptr_eq(&user, &again));
    }
}
