//! In-memory entity state and change tracking.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::schema::ModelSchema;
use crate::value::{AttrKind, AttrMap, AttrValue};

/// Shared handle to a session-tracked entity.
///
/// Sessions hand out one handle per `(model, pk)`; cloning the handle
/// aliases the same entity, so an update through one clone is visible
/// through all of them.
pub type EntityRef = Rc<RefCell<Entity>>;

/// One entity: a primary key plus its attribute values, with enough
/// bookkeeping to know what changed since the last save.
#[derive(Debug)]
pub struct Entity {
    schema: Arc<ModelSchema>,
    pk: u64,
    values: AttrMap,
    committed: AttrMap,
    new: bool,
    deleted: bool,
}

impl Entity {
    /// A freshly allocated entity that has never been written.
    pub(crate) fn new_unsaved(schema: Arc<ModelSchema>, pk: u64) -> Self {
        Self {
            schema,
            pk,
            values: AttrMap::new(),
            committed: AttrMap::new(),
            new: true,
            deleted: false,
        }
    }

    /// An entity hydrated from its stored attribute map.
    pub(crate) fn load_committed(schema: Arc<ModelSchema>, pk: u64, values: AttrMap) -> Self {
        Self {
            schema,
            pk,
            committed: values.clone(),
            values,
            new: false,
            deleted: false,
        }
    }

    /// The primary key.
    #[must_use]
    pub const fn pk(&self) -> u64 {
        self.pk
    }

    /// The model name.
    #[must_use]
    pub fn model(&self) -> &str {
        self.schema.name()
    }

    /// The schema this entity was created from.
    #[must_use]
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    /// Reads one attribute. `None` when the attribute is unset.
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&AttrValue> {
        self.values.get(attribute)
    }

    /// Sets one attribute, checking that it is declared and that the
    /// value matches the declared kind. Foreign-key columns take the
    /// referenced primary key as an integer.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EntityDeleted`] on a deleted entity,
    /// [`CoreError::UnknownAttribute`] for an undeclared name, and
    /// [`CoreError::InvalidValue`] on a kind mismatch.
    pub fn set(&mut self, attribute: &str, value: impl Into<AttrValue>) -> CoreResult<()> {
        self.check_live()?;
        let value = value.into();
        let expected = self.expected_kind(attribute)?;
        if value.kind() != expected {
            return Err(CoreError::invalid_value(
                attribute,
                format!("expected {}, got {}", expected.name(), value.kind().name()),
            ));
        }
        if let AttrValue::Float(f) = value {
            if f.is_nan() {
                return Err(CoreError::invalid_value(attribute, "NaN is not storable"));
            }
        }
        self.values.insert(attribute.to_string(), value);
        Ok(())
    }

    /// Unsets one attribute. Unset attributes leave all their index
    /// entries at the next save.
    ///
    /// # Errors
    ///
    /// Same checks as [`set`](Self::set), minus the kind check.
    pub fn clear(&mut self, attribute: &str) -> CoreResult<()> {
        self.check_live()?;
        self.expected_kind(attribute)?;
        self.values.remove(attribute);
        Ok(())
    }

    /// Whether the entity has never been saved.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.new
    }

    /// Whether the entity has been deleted from the store.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Whether the entity has unsaved changes.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.new || self.values != self.committed
    }

    pub(crate) fn values(&self) -> &AttrMap {
        &self.values
    }

    pub(crate) fn committed(&self) -> &AttrMap {
        &self.committed
    }

    pub(crate) fn mark_committed(&mut self) {
        self.committed = self.values.clone();
        self.new = false;
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    pub(crate) fn replace_committed(&mut self, values: AttrMap) {
        self.committed = values.clone();
        self.values = values;
        self.new = false;
    }

    fn check_live(&self) -> CoreResult<()> {
        if self.deleted {
            return Err(CoreError::EntityDeleted {
                model: self.model().to_string(),
                pk: self.pk,
            });
        }
        Ok(())
    }

    fn expected_kind(&self, attribute: &str) -> CoreResult<AttrKind> {
        if let Some(def) = self.schema.attribute_def(attribute) {
            return Ok(def.kind());
        }
        if self.schema.foreign_key_def(attribute).is_some() {
            return Ok(AttrKind::Int);
        }
        Err(CoreError::unknown_attribute(self.model(), attribute))
    }
}

/// Reads an entity's attribute map from its data hash. `None` when the
/// entity does not exist. Fields the schema no longer declares are
/// skipped rather than treated as corruption.
pub(crate) fn hydrate(
    store: &dyn entimap_store::StoreBackend,
    schema: &ModelSchema,
    pk: u64,
) -> CoreResult<Option<AttrMap>> {
    let pairs = store.hgetall(&crate::keys::data_key(schema.name(), pk))?;
    if pairs.is_empty() {
        return Ok(None);
    }
    let mut values = AttrMap::new();
    for (field, raw) in pairs {
        let kind = if let Some(def) = schema.attribute_def(&field) {
            def.kind()
        } else if schema.foreign_key_def(&field).is_some() {
            AttrKind::Int
        } else {
            tracing::debug!(model = schema.name(), pk, field, "skipping undeclared field");
            continue;
        };
        values.insert(field.clone(), AttrValue::decode(kind, &field, &raw)?);
    }
    Ok(Some(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeDef;

    fn schema() -> Arc<ModelSchema> {
        Arc::new(
            ModelSchema::new("user")
                .attribute(AttributeDef::new("email", AttrKind::Text).unique())
                .attribute(AttributeDef::new("age", AttrKind::Int).ordered())
                .attribute(AttributeDef::new("score", AttrKind::Float).ordered())
                .foreign_key("team_id", "team"),
        )
    }

    #[test]
    fn set_and_get_roundtrip() {
        let mut entity = Entity::new_unsaved(schema(), 7);
        entity.set("email", "kim@example.com").unwrap();
        entity.set("age", 31i64).unwrap();
        assert_eq!(entity.get("email"), Some(&AttrValue::Text("kim@example.com".into())));
        assert_eq!(entity.get("age"), Some(&AttrValue::Int(31)));
        assert_eq!(entity.get("missing"), None);
    }

    #[test]
    fn set_rejects_kind_mismatch() {
        let mut entity = Entity::new_unsaved(schema(), 7);
        let err = entity.set("age", "thirty").unwrap_err();
        assert!(matches!(err, CoreError::InvalidValue { .. }));
    }

    #[test]
    fn set_rejects_unknown_attribute() {
        let mut entity = Entity::new_unsaved(schema(), 7);
        let err = entity.set("nickname", "kim").unwrap_err();
        assert!(matches!(err, CoreError::UnknownAttribute { .. }));
    }

    #[test]
    fn set_rejects_nan() {
        let mut entity = Entity::new_unsaved(schema(), 7);
        assert!(entity.set("score", f64::NAN).is_err());
        assert!(entity.set("score", 0.5f64).is_ok());
    }

    #[test]
    fn foreign_key_column_takes_integers() {
        let mut entity = Entity::new_unsaved(schema(), 7);
        entity.set("team_id", 3i64).unwrap();
        assert!(entity.set("team_id", "three").is_err());
    }

    #[test]
    fn modification_tracking_follows_committed_snapshot() {
        let mut entity = Entity::new_unsaved(schema(), 7);
        assert!(entity.is_modified());

        entity.set("age", 31i64).unwrap();
        entity.mark_committed();
        assert!(!entity.is_modified());

        entity.set("age", 32i64).unwrap();
        assert!(entity.is_modified());

        entity.set("age", 31i64).unwrap();
        assert!(!entity.is_modified());
    }

    #[test]
    fn clear_drops_the_value() {
        let mut entity = Entity::new_unsaved(schema(), 7);
        entity.set("age", 31i64).unwrap();
        entity.mark_committed();
        entity.clear("age").unwrap();
        assert_eq!(entity.get("age"), None);
        assert!(entity.is_modified());
    }

    #[test]
    fn deleted_entity_rejects_writes() {
        let mut entity = Entity::new_unsaved(schema(), 7);
        entity.mark_deleted();
        let err = entity.set("age", 31i64).unwrap_err();
        assert!(matches!(err, CoreError::EntityDeleted { .. }));
    }
}
