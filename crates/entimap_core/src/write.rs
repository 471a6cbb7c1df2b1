//! Applying entity saves and deletes to the store.
//!
//! The engine turns an index delta plus the data-hash diff into store
//! commands. In [`WriteMode::Atomic`] everything ships as one guarded
//! program, so a uniqueness conflict rolls the whole save back. In
//! [`WriteMode::Fallback`] commands run one by one: unique markers are
//! claimed first and released again if a later command fails, which
//! keeps constraints safe at the cost of possibly stranding index
//! entries for maintenance to sweep up.

use std::sync::Arc;

use entimap_store::{
    AtomicGuard, AtomicOp, AtomicOutcome, AtomicProgram, StoreBackend, StoreResult,
};
use tracing::{debug, warn};

use crate::config::{DatabaseConfig, WriteMode};
use crate::error::{CoreError, CoreResult};
use crate::index::IndexDelta;
use crate::integrity::Victim;
use crate::keys;
use crate::schema::ModelSchema;
use crate::value::AttrMap;

/// Low-level writer shared by sessions. Stateless apart from its store
/// handle; safe to use from several sessions at once.
pub struct WriteEngine {
    store: Arc<dyn StoreBackend>,
    config: DatabaseConfig,
}

impl WriteEngine {
    /// Creates an engine over a store.
    #[must_use]
    pub fn new(store: Arc<dyn StoreBackend>, config: DatabaseConfig) -> Self {
        Self { store, config }
    }

    /// Allocates the next primary key of a model from its sequence
    /// counter. Allocated keys are never reused, even when the save
    /// that follows fails.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptIndex`] when the counter does not
    /// hold a usable number.
    pub fn allocate_pk(&self, model: &str) -> CoreResult<u64> {
        let next = self.store.incr_by(&keys::seq_key(model), 1)?;
        u64::try_from(next).map_err(|_| {
            CoreError::corrupt_index(format!("sequence counter of '{model}' holds {next}"))
        })
    }

    /// Persists one entity state, updating the data hash, every index
    /// the schema declares, and the footprint record.
    ///
    /// `old` is the last committed attribute map, empty for a first
    /// save. Attributes present in `old` but not in `new` are removed
    /// from the data hash and their index entries dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UniqueConstraintViolation`] when another
    /// entity holds a claimed unique value, and
    /// [`CoreError::InvalidOperation`] for an empty attribute map.
    pub fn save(
        &self,
        schema: &ModelSchema,
        pk: u64,
        old: &AttrMap,
        new: &AttrMap,
    ) -> CoreResult<()> {
        if new.is_empty() {
            return Err(CoreError::invalid_operation(
                "cannot save an entity with no attributes set",
            ));
        }
        let delta = IndexDelta::for_write(schema, &self.config, pk, old, new)?;
        let ops = save_ops(schema, pk, old, new, &delta)?;
        debug!(
            model = schema.name(),
            pk,
            ops = ops.len(),
            guards = delta.unique_sets.len(),
            "saving entity"
        );
        match self.config.write_mode {
            WriteMode::Atomic => self.save_atomic(schema, pk, &delta, ops),
            WriteMode::Fallback => self.save_fallback(schema, pk, &delta, ops),
        }
    }

    /// Removes one committed entity and all of its index entries.
    ///
    /// # Errors
    ///
    /// Propagates store failures. Integrity rules are the caller's
    /// concern; the engine removes unconditionally.
    pub fn delete(&self, schema: &ModelSchema, pk: u64, committed: &AttrMap) -> CoreResult<()> {
        let mut ops = Vec::new();
        self.delete_ops(schema, pk, committed, &mut ops)?;
        self.apply_unguarded(ops)
    }

    /// Removes a whole delete plan in one shot. In atomic mode the
    /// entire chain lands as a single program, so observers never see a
    /// half-deleted cascade.
    pub(crate) fn delete_many(&self, victims: &[Victim]) -> CoreResult<()> {
        let mut ops = Vec::new();
        for victim in victims {
            self.delete_ops(&victim.schema, victim.pk, &victim.committed, &mut ops)?;
        }
        debug!(victims = victims.len(), ops = ops.len(), "deleting entities");
        self.apply_unguarded(ops)
    }

    fn save_atomic(
        &self,
        schema: &ModelSchema,
        pk: u64,
        delta: &IndexDelta,
        ops: Vec<AtomicOp>,
    ) -> CoreResult<()> {
        let owner = pk.to_string();
        let mut program = AtomicProgram::new();
        for entry in &delta.unique_sets {
            program.guard(AtomicGuard::FieldFreeOrOwned {
                key: entry.key.clone(),
                field: entry.field.clone(),
                owner: owner.clone(),
            });
            program.push(AtomicOp::HSet {
                key: entry.key.clone(),
                field: entry.field.clone(),
                value: owner.clone(),
            });
        }
        for op in ops {
            program.push(op);
        }
        match self.store.run_atomic(&program)? {
            AtomicOutcome::Applied => Ok(()),
            AtomicOutcome::GuardFailed { index, holder, .. } => {
                let entry = &delta.unique_sets[index];
                debug!(
                    model = schema.name(),
                    pk,
                    attribute = %entry.attribute,
                    holder,
                    "unique guard failed"
                );
                Err(CoreError::unique_violation(
                    schema.name(),
                    &entry.attribute,
                    &entry.display,
                ))
            }
        }
    }

    fn save_fallback(
        &self,
        schema: &ModelSchema,
        pk: u64,
        delta: &IndexDelta,
        ops: Vec<AtomicOp>,
    ) -> CoreResult<()> {
        let owner = pk.to_string();
        for entry in &delta.unique_sets {
            if let Some(holder) = self.store.hget(&entry.key, &entry.field)? {
                if holder != owner {
                    return Err(CoreError::unique_violation(
                        schema.name(),
                        &entry.attribute,
                        &entry.display,
                    ));
                }
            }
        }

        // Claim markers first and remember which claims are new, so a
        // failure further down can release exactly those.
        let mut claimed: Vec<(&str, &str)> = Vec::with_capacity(delta.unique_sets.len());
        let mut failure: Option<CoreError> = None;
        for entry in &delta.unique_sets {
            match self.store.hset(&entry.key, &entry.field, &owner) {
                Ok(true) => claimed.push((&entry.key, &entry.field)),
                Ok(false) => {}
                Err(err) => {
                    failure = Some(err.into());
                    break;
                }
            }
        }
        if failure.is_none() {
            for op in &ops {
                if let Err(err) = apply_op(self.store.as_ref(), op) {
                    failure = Some(err.into());
                    break;
                }
            }
        }

        match failure {
            None => Ok(()),
            Some(err) => {
                for (key, field) in claimed {
                    if let Err(release) = self.store.hdel(key, &[field]) {
                        warn!(key, field, error = %release, "failed to release unique marker");
                    }
                }
                Err(err)
            }
        }
    }

    fn delete_ops(
        &self,
        schema: &ModelSchema,
        pk: u64,
        committed: &AttrMap,
        ops: &mut Vec<AtomicOp>,
    ) -> CoreResult<()> {
        let delta = IndexDelta::for_delete(schema, &self.config, pk, committed)?;
        push_unique_clears(&delta, ops);
        push_index_ops(&delta, ops);
        ops.push(AtomicOp::Del {
            key: keys::data_key(schema.name(), pk),
        });
        ops.push(AtomicOp::HDel {
            key: keys::footprint_key(schema.name()),
            fields: vec![pk.to_string()],
        });
        Ok(())
    }

    /// Runs ops that need no uniqueness guards, as one program in
    /// atomic mode or sequentially in fallback mode. Fallback deletes
    /// stop at the first failure; whatever they leave behind is index
    /// garbage a maintenance sweep removes.
    fn apply_unguarded(&self, ops: Vec<AtomicOp>) -> CoreResult<()> {
        match self.config.write_mode {
            WriteMode::Atomic => {
                let mut program = AtomicProgram::new();
                for op in ops {
                    program.push(op);
                }
                self.store.run_atomic(&program)?;
                Ok(())
            }
            WriteMode::Fallback => {
                for op in &ops {
                    apply_op(self.store.as_ref(), op)?;
                }
                Ok(())
            }
        }
    }
}

/// Index and data commands of one save, minus the unique markers that
/// the two write modes handle differently.
fn save_ops(
    schema: &ModelSchema,
    pk: u64,
    old: &AttrMap,
    new: &AttrMap,
    delta: &IndexDelta,
) -> CoreResult<Vec<AtomicOp>> {
    let mut ops = Vec::new();
    push_unique_clears(delta, &mut ops);

    let data_key = keys::data_key(schema.name(), pk);
    for (attribute, value) in new {
        if old.get(attribute) != Some(value) {
            ops.push(AtomicOp::HSet {
                key: data_key.clone(),
                field: attribute.clone(),
                value: value.encode(),
            });
        }
    }
    let dropped: Vec<String> = old
        .keys()
        .filter(|attribute| !new.contains_key(*attribute))
        .cloned()
        .collect();
    if !dropped.is_empty() {
        ops.push(AtomicOp::HDel {
            key: data_key,
            fields: dropped,
        });
    }

    push_index_ops(delta, &mut ops);

    if let Some(footprint) = &delta.footprint {
        ops.push(AtomicOp::HSet {
            key: keys::footprint_key(schema.name()),
            field: pk.to_string(),
            value: serde_json::to_string(footprint)?,
        });
    }
    Ok(ops)
}

fn push_unique_clears(delta: &IndexDelta, ops: &mut Vec<AtomicOp>) {
    for (key, field) in &delta.unique_clears {
        ops.push(AtomicOp::HDel {
            key: key.clone(),
            fields: vec![field.clone()],
        });
    }
}

fn push_index_ops(delta: &IndexDelta, ops: &mut Vec<AtomicOp>) {
    for (key, member) in &delta.zset_removes {
        ops.push(AtomicOp::ZRem {
            key: key.clone(),
            members: vec![member.clone()],
        });
    }
    for (key, member, score) in &delta.zset_adds {
        ops.push(AtomicOp::ZAdd {
            key: key.clone(),
            member: member.clone(),
            score: *score,
        });
    }
    for (key, member) in &delta.set_removes {
        ops.push(AtomicOp::SRem {
            key: key.clone(),
            members: vec![member.clone()],
        });
    }
    for (key, member) in &delta.set_adds {
        ops.push(AtomicOp::SAdd {
            key: key.clone(),
            members: vec![member.clone()],
        });
    }
}

fn apply_op(store: &dyn StoreBackend, op: &AtomicOp) -> StoreResult<()> {
    match op {
        AtomicOp::Set { key, value } => store.set(key, value),
        AtomicOp::Del { key } => store.del(key).map(drop),
        AtomicOp::Expire { key, ttl } => store.expire(key, *ttl).map(drop),
        AtomicOp::HSet { key, field, value } => store.hset(key, field, value).map(drop),
        AtomicOp::HDel { key, fields } => {
            let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
            store.hdel(key, &refs).map(drop)
        }
        AtomicOp::SAdd { key, members } => {
            let refs: Vec<&str> = members.iter().map(String::as_str).collect();
            store.sadd(key, &refs).map(drop)
        }
        AtomicOp::SRem { key, members } => {
            let refs: Vec<&str> = members.iter().map(String::as_str).collect();
            store.srem(key, &refs).map(drop)
        }
        AtomicOp::ZAdd { key, member, score } => store.zadd(key, member, *score).map(drop),
        AtomicOp::ZRem { key, members } => {
            let refs: Vec<&str> = members.iter().map(String::as_str).collect();
            store.zrem(key, &refs).map(drop)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeDef;
    use crate::value::{AttrKind, AttrValue};
    use entimap_store::InMemoryStore;

    fn schema() -> ModelSchema {
        ModelSchema::new("user")
            .attribute(AttributeDef::new("email", AttrKind::Text).unique())
            .attribute(AttributeDef::new("age", AttrKind::Int).ordered())
            .attribute(AttributeDef::new("name", AttrKind::Text).prefix().suffix())
    }

    fn engine(mode: WriteMode) -> (Arc<InMemoryStore>, WriteEngine) {
        let store = Arc::new(InMemoryStore::new());
        let engine = WriteEngine::new(
            store.clone(),
            DatabaseConfig::new().with_write_mode(mode),
        );
        (store, engine)
    }

    fn map(pairs: &[(&str, AttrValue)]) -> AttrMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn state(email: &str, age: i64, name: &str) -> AttrMap {
        map(&[
            ("email", email.into()),
            ("age", AttrValue::Int(age)),
            ("name", name.into()),
        ])
    }

    #[test]
    fn allocate_pk_counts_up_per_model() {
        let (_, engine) = engine(WriteMode::Atomic);
        assert_eq!(engine.allocate_pk("user").unwrap(), 1);
        assert_eq!(engine.allocate_pk("user").unwrap(), 2);
        assert_eq!(engine.allocate_pk("order").unwrap(), 1);
    }

    #[test]
    fn save_writes_data_indexes_and_footprint() {
        let (store, engine) = engine(WriteMode::Atomic);
        engine
            .save(&schema(), 1, &AttrMap::new(), &state("kim@example.com", 31, "kim"))
            .unwrap();

        assert_eq!(
            store.hget("user:1", "email").unwrap().as_deref(),
            Some("kim@example.com")
        );
        assert_eq!(store.hget("user:email:uidx", "kim@example.com").unwrap().as_deref(), Some("1"));
        assert_eq!(store.zscore("user:age:idx", "1").unwrap(), Some(31.0));
        assert_eq!(store.zscore("user:name:pre", "kim\u{0}1").unwrap(), Some(0.0));
        assert!(store.hget("user::", "1").unwrap().is_some());
    }

    #[test]
    fn conflicting_save_leaves_no_trace_in_atomic_mode() {
        let (store, engine) = engine(WriteMode::Atomic);
        engine
            .save(&schema(), 1, &AttrMap::new(), &state("kim@example.com", 31, "kim"))
            .unwrap();

        let err = engine
            .save(&schema(), 2, &AttrMap::new(), &state("kim@example.com", 40, "lee"))
            .unwrap_err();
        assert!(matches!(err, CoreError::UniqueConstraintViolation { .. }));

        assert!(!store.exists("user:2").unwrap());
        assert_eq!(store.zscore("user:age:idx", "2").unwrap(), None);
        assert!(store.hget("user::", "2").unwrap().is_none());
        // The original owner is untouched.
        assert_eq!(store.hget("user:email:uidx", "kim@example.com").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn fallback_mode_detects_conflicts_before_writing() {
        let (store, engine) = engine(WriteMode::Fallback);
        engine
            .save(&schema(), 1, &AttrMap::new(), &state("kim@example.com", 31, "kim"))
            .unwrap();

        let err = engine
            .save(&schema(), 2, &AttrMap::new(), &state("kim@example.com", 40, "lee"))
            .unwrap_err();
        assert!(matches!(err, CoreError::UniqueConstraintViolation { .. }));
        assert!(!store.exists("user:2").unwrap());
        assert_eq!(store.hget("user:email:uidx", "kim@example.com").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn resaving_the_same_unique_value_is_allowed() {
        for mode in [WriteMode::Atomic, WriteMode::Fallback] {
            let (store, engine) = engine(mode);
            let first = state("kim@example.com", 31, "kim");
            engine.save(&schema(), 1, &AttrMap::new(), &first).unwrap();
            // Same email, different age. The marker is already ours.
            engine
                .save(&schema(), 1, &first, &state("kim@example.com", 32, "kim"))
                .unwrap();
            assert_eq!(store.zscore("user:age:idx", "1").unwrap(), Some(32.0));
        }
    }

    #[test]
    fn update_moves_index_entries() {
        let (store, engine) = engine(WriteMode::Atomic);
        let first = state("kim@example.com", 31, "kim");
        engine.save(&schema(), 1, &AttrMap::new(), &first).unwrap();
        engine
            .save(&schema(), 1, &first, &state("kim@new.example", 31, "kima"))
            .unwrap();

        assert!(store.hget("user:email:uidx", "kim@example.com").unwrap().is_none());
        assert_eq!(store.hget("user:email:uidx", "kim@new.example").unwrap().as_deref(), Some("1"));
        assert_eq!(store.zscore("user:name:pre", "kim\u{0}1").unwrap(), None);
        assert_eq!(store.zscore("user:name:pre", "kima\u{0}1").unwrap(), Some(0.0));
    }

    #[test]
    fn cleared_attribute_leaves_hash_and_indexes() {
        let (store, engine) = engine(WriteMode::Atomic);
        let first = state("kim@example.com", 31, "kim");
        engine.save(&schema(), 1, &AttrMap::new(), &first).unwrap();

        let mut second = first.clone();
        second.remove("age");
        engine.save(&schema(), 1, &first, &second).unwrap();

        assert!(store.hget("user:1", "age").unwrap().is_none());
        assert_eq!(store.zscore("user:age:idx", "1").unwrap(), None);
        assert_eq!(store.hget("user:1", "email").unwrap().as_deref(), Some("kim@example.com"));
    }

    #[test]
    fn delete_removes_every_key_the_entity_touched() {
        for mode in [WriteMode::Atomic, WriteMode::Fallback] {
            let (store, engine) = engine(mode);
            let values = state("kim@example.com", 31, "kim");
            engine.save(&schema(), 1, &AttrMap::new(), &values).unwrap();
            engine.delete(&schema(), 1, &values).unwrap();

            assert!(!store.exists("user:1").unwrap());
            assert!(store.hget("user::", "1").unwrap().is_none());
            assert!(store.hget("user:email:uidx", "kim@example.com").unwrap().is_none());
            assert_eq!(store.zscore("user:age:idx", "1").unwrap(), None);
            assert_eq!(store.zscore("user:name:pre", "kim\u{0}1").unwrap(), None);
            assert_eq!(store.zscore("user:name:suf", "mik\u{0}1").unwrap(), None);
        }
    }

    #[test]
    fn empty_save_is_rejected() {
        let (_, engine) = engine(WriteMode::Atomic);
        let err = engine
            .save(&schema(), 1, &AttrMap::new(), &AttrMap::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }
}
