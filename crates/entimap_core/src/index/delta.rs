//! Computing the index updates one save or delete implies.
//!
//! A delta is derived purely from the schema and the before/after
//! attribute maps; it never touches the store. The write engine turns
//! it into store commands, so atomic and fallback mode apply exactly
//! the same changes.

use serde::{Deserialize, Serialize};

use crate::config::DatabaseConfig;
use crate::error::{CoreError, CoreResult};
use crate::index::tokens::tokenize;
use crate::keys;
use crate::schema::ModelSchema;
use crate::value::{AttrMap, AttrValue};

/// One unique-marker claim: `field` of hash `key` must be free or
/// already owned by the writing entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UniqueEntry {
    /// Unique-marker hash.
    pub key: String,
    /// Hash field, the encoded value or value tuple.
    pub field: String,
    /// Attribute name (or `a+b` tuple label) for error messages.
    pub attribute: String,
    /// Human-readable value for error messages.
    pub display: String,
}

/// Everything an entity currently occupies in the index keyspace,
/// stored as JSON in the model's footprint hash. Deletes and
/// maintenance remove index entries from this record instead of
/// recomputing them from attribute values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct IndexFootprint {
    /// Set keys holding the primary key as a member.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sets: Vec<String>,
    /// Sorted-set keys holding the primary key as a scored member.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scored: Vec<String>,
    /// `(key, member)` pairs in prefix indexes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prefix: Vec<(String, String)>,
    /// `(key, member)` pairs in suffix indexes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suffix: Vec<(String, String)>,
}

impl IndexFootprint {
    /// Whether the entity occupies no index keys at all.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
            && self.scored.is_empty()
            && self.prefix.is_empty()
            && self.suffix.is_empty()
    }
}

/// The index-keyspace difference between two states of one entity.
#[derive(Debug, Default)]
pub(crate) struct IndexDelta {
    /// Unique markers to claim, guarded in atomic mode.
    pub unique_sets: Vec<UniqueEntry>,
    /// `(key, field)` unique markers to release.
    pub unique_clears: Vec<(String, String)>,
    /// `(key, member, score)` sorted-set insertions.
    pub zset_adds: Vec<(String, String, f64)>,
    /// `(key, member)` sorted-set removals.
    pub zset_removes: Vec<(String, String)>,
    /// `(key, member)` set insertions.
    pub set_adds: Vec<(String, String)>,
    /// `(key, member)` set removals.
    pub set_removes: Vec<(String, String)>,
    /// The footprint record to store after a save. `None` for deletes,
    /// which drop the record instead.
    pub footprint: Option<IndexFootprint>,
}

impl IndexDelta {
    /// Computes the delta for saving `new` over `old` (empty for a
    /// first save).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidValue`] when an ordered value has no
    /// finite score order, such as a NaN float.
    pub fn for_write(
        schema: &ModelSchema,
        config: &DatabaseConfig,
        pk: u64,
        old: &AttrMap,
        new: &AttrMap,
    ) -> CoreResult<Self> {
        let mut delta = Self::default();
        let mut footprint = IndexFootprint::default();
        let model = schema.name();
        let pk_member = pk.to_string();

        for attr in schema.attributes() {
            let flags = attr.flags();
            if !flags.any() {
                continue;
            }
            let name = attr.name();
            let old_val = old.get(name);
            let new_val = new.get(name);
            let changed = old_val != new_val;

            if flags.unique && changed {
                let key = keys::unique_key(model, name);
                if let Some(value) = old_val {
                    delta.unique_clears.push((key.clone(), value.encode()));
                }
                if let Some(value) = new_val {
                    delta.unique_sets.push(UniqueEntry {
                        key,
                        field: value.encode(),
                        attribute: name.to_string(),
                        display: value.encode(),
                    });
                }
            }

            if flags.ordered {
                let key = keys::ordered_key(model, name);
                if changed {
                    if old_val.is_some() {
                        delta.zset_removes.push((key.clone(), pk_member.clone()));
                    }
                    if let Some(value) = new_val {
                        let score = checked_score(name, value)?;
                        delta.zset_adds.push((key.clone(), pk_member.clone(), score));
                    }
                }
                if new_val.is_some() {
                    footprint.scored.push(key);
                }
            }

            if flags.prefix {
                let key = keys::prefix_key(model, name);
                if changed {
                    if let Some(text) = old_val.and_then(AttrValue::as_text) {
                        delta
                            .zset_removes
                            .push((key.clone(), keys::lex_member(text, pk)));
                    }
                    if let Some(text) = new_val.and_then(AttrValue::as_text) {
                        delta
                            .zset_adds
                            .push((key.clone(), keys::lex_member(text, pk), 0.0));
                    }
                }
                if let Some(text) = new_val.and_then(AttrValue::as_text) {
                    footprint.prefix.push((key, keys::lex_member(text, pk)));
                }
            }

            if flags.suffix {
                let key = keys::suffix_key(model, name);
                if changed {
                    if let Some(text) = old_val.and_then(AttrValue::as_text) {
                        let member = keys::lex_member(&keys::reverse_text(text), pk);
                        delta.zset_removes.push((key.clone(), member));
                    }
                    if let Some(text) = new_val.and_then(AttrValue::as_text) {
                        let member = keys::lex_member(&keys::reverse_text(text), pk);
                        delta.zset_adds.push((key.clone(), member, 0.0));
                    }
                }
                if let Some(text) = new_val.and_then(AttrValue::as_text) {
                    let member = keys::lex_member(&keys::reverse_text(text), pk);
                    footprint.suffix.push((key, member));
                }
            }

            if flags.words {
                let old_words = old_val
                    .and_then(AttrValue::as_text)
                    .map(|t| tokenize(&config.tokenizer, t))
                    .unwrap_or_default();
                let new_words = new_val
                    .and_then(AttrValue::as_text)
                    .map(|t| tokenize(&config.tokenizer, t))
                    .unwrap_or_default();
                for word in old_words.difference(&new_words) {
                    delta
                        .set_removes
                        .push((keys::word_key(model, name, word), pk_member.clone()));
                }
                for word in new_words.difference(&old_words) {
                    delta
                        .set_adds
                        .push((keys::word_key(model, name, word), pk_member.clone()));
                }
                for word in &new_words {
                    footprint.sets.push(keys::word_key(model, name, word));
                }
            }
        }

        // Reference columns keep a sorted set per column, scored by the
        // referenced primary key, so referrer lookups are range reads.
        for fk in schema.foreign_keys() {
            let column = fk.column();
            let old_val = old.get(column);
            let new_val = new.get(column);
            let key = keys::ordered_key(model, column);
            if old_val != new_val {
                if old_val.is_some() {
                    delta.zset_removes.push((key.clone(), pk_member.clone()));
                }
                if let Some(value) = new_val {
                    let score = checked_score(column, value)?;
                    delta.zset_adds.push((key.clone(), pk_member.clone(), score));
                }
            }
            if new_val.is_some() {
                footprint.scored.push(key);
            }
        }

        for tuple in schema.composite_unique() {
            let key = keys::composite_unique_key(model, tuple);
            let label = tuple.join("+");
            let old_field = tuple_field(old, tuple);
            let new_field = tuple_field(new, tuple);
            if old_field == new_field {
                continue;
            }
            if let Some(field) = old_field {
                delta.unique_clears.push((key.clone(), field));
            }
            if let Some(field) = new_field {
                let display = tuple
                    .iter()
                    .filter_map(|part| new.get(part).map(AttrValue::encode))
                    .collect::<Vec<_>>()
                    .join(", ");
                delta.unique_sets.push(UniqueEntry {
                    key,
                    field,
                    attribute: label,
                    display,
                });
            }
        }

        delta.footprint = Some(footprint);
        Ok(delta)
    }

    /// Computes the delta that removes every index entry of a committed
    /// entity.
    pub fn for_delete(
        schema: &ModelSchema,
        config: &DatabaseConfig,
        pk: u64,
        committed: &AttrMap,
    ) -> CoreResult<Self> {
        let mut delta = Self::for_write(schema, config, pk, committed, &AttrMap::new())?;
        delta.footprint = None;
        Ok(delta)
    }
}

/// A composite marker exists only while every tuple attribute is set.
fn tuple_field(values: &AttrMap, tuple: &[String]) -> Option<String> {
    let parts: Vec<String> = tuple
        .iter()
        .filter_map(|part| values.get(part).map(AttrValue::encode))
        .collect();
    (parts.len() == tuple.len()).then(|| keys::encode_tuple(&parts))
}

fn checked_score(attribute: &str, value: &AttrValue) -> CoreResult<f64> {
    match value.score() {
        Some(score) if score.is_finite() => Ok(score),
        _ => Err(CoreError::invalid_value(
            attribute,
            format!("{} has no finite index order", value.kind().name()),
        )),
    }
}
