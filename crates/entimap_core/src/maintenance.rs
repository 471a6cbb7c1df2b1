//! Offline index maintenance.
//!
//! Fallback-mode writes can die between the data hash and the index
//! structures, and operators sometimes drop records out of band. The
//! sweep here walks each model's footprint hash and unique-marker
//! hashes, removes every index entry whose data record is gone, and
//! reports what it found. Runs are idempotent and never required for
//! correctness: readers already filter dead ids themselves.

use std::sync::Arc;

use tracing::{debug, info, warn};

use entimap_store::StoreBackend;

use crate::database::Database;
use crate::error::CoreResult;
use crate::index::IndexFootprint;
use crate::keys;
use crate::schema::ModelSchema;

/// Where a stale entry was discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleSource {
    /// The model's footprint hash still listed the id.
    Footprint,
    /// A unique marker still named the id as holder.
    UniqueMarker {
        /// The indexed attribute, or the `+`-joined names of a
        /// composite tuple.
        attribute: String,
    },
}

/// One index entry that outlived its data record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleIndexEntry {
    /// The model the entry belonged to.
    pub model: String,
    /// The id the entry pointed at.
    pub pk: u64,
    /// Where the entry was found.
    pub source: StaleSource,
}

/// Outcome of one [`clean_old_index`] run.
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Footprint and marker entries examined.
    pub scanned: u64,
    /// Entries removed across all index structures.
    pub removed_members: u64,
    /// The stale records that were cleaned, in discovery order.
    pub stale: Vec<StaleIndexEntry>,
}

impl CleanupReport {
    /// True when the sweep found nothing to remove.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.stale.is_empty() && self.removed_members == 0
    }
}

/// Sweeps stale index entries for one model, or for every registered
/// model when `model` is `None`.
///
/// # Errors
///
/// Returns [`CoreError::UnknownModel`](crate::CoreError::UnknownModel)
/// for an unregistered model name, and propagates store failures.
/// Malformed entries are logged and removed, never treated as errors.
pub fn clean_old_index(db: &Database, model: Option<&str>) -> CoreResult<CleanupReport> {
    let schemas: Vec<Arc<ModelSchema>> = match model {
        Some(name) => vec![db.schema(name)?],
        None => {
            let mut all: Vec<Arc<ModelSchema>> = db.schema_map().values().cloned().collect();
            all.sort_by(|a, b| a.name().cmp(b.name()));
            all
        }
    };

    let store = db.store().as_ref();
    let mut report = CleanupReport::default();
    for schema in &schemas {
        sweep_footprints(store, schema, &mut report)?;
        sweep_unique_markers(store, schema, &mut report)?;
        debug!(model = schema.name(), "model sweep finished");
    }
    info!(
        scanned = report.scanned,
        stale = report.stale.len(),
        removed = report.removed_members,
        "stale index cleanup finished"
    );
    Ok(report)
}

/// Wraps a scan iterator and logs progress every tenth of `total`.
pub fn show_progress<I>(iter: I, total: u64) -> impl Iterator<Item = I::Item>
where
    I: Iterator,
{
    let step = (total / 10).max(1);
    let mut seen = 0u64;
    iter.inspect(move |_| {
        seen += 1;
        if seen % step == 0 || seen == total {
            info!(seen, total, "scan progress");
        }
    })
}

fn sweep_footprints(
    store: &dyn StoreBackend,
    schema: &ModelSchema,
    report: &mut CleanupReport,
) -> CoreResult<()> {
    let model = schema.name();
    let fkey = keys::footprint_key(model);
    let entries = store.hgetall(&fkey)?;
    let total = entries.len() as u64;

    for (field, raw) in show_progress(entries.into_iter(), total) {
        report.scanned += 1;
        let pk = match field.parse::<u64>() {
            Ok(pk) => pk,
            Err(_) => {
                warn!(model, field = %field, "footprint field is not an id");
                report.removed_members += store.hdel(&fkey, &[&field])?;
                continue;
            }
        };
        if store.exists(&keys::data_key(model, pk))? {
            continue;
        }

        match serde_json::from_str::<IndexFootprint>(&raw) {
            Ok(footprint) => {
                let pk_member = pk.to_string();
                for key in &footprint.scored {
                    report.removed_members += store.zrem(key, &[&pk_member])?;
                }
                for key in &footprint.sets {
                    report.removed_members += store.srem(key, &[&pk_member])?;
                }
                for (key, member) in footprint.prefix.iter().chain(&footprint.suffix) {
                    report.removed_members += store.zrem(key, &[member])?;
                }
            }
            Err(err) => {
                warn!(model, pk, error = %err, "footprint record is unreadable, index entries may linger");
            }
        }
        report.removed_members += store.hdel(&fkey, &[&field])?;
        report.stale.push(StaleIndexEntry {
            model: model.to_string(),
            pk,
            source: StaleSource::Footprint,
        });
    }
    Ok(())
}

fn sweep_unique_markers(
    store: &dyn StoreBackend,
    schema: &ModelSchema,
    report: &mut CleanupReport,
) -> CoreResult<()> {
    let model = schema.name();
    let mut targets: Vec<(String, String)> = Vec::new();
    for attr in schema.attributes() {
        if attr.flags().unique {
            targets.push((
                keys::unique_key(model, attr.name()),
                attr.name().to_string(),
            ));
        }
    }
    for tuple in schema.composite_unique() {
        targets.push((keys::composite_unique_key(model, tuple), tuple.join("+")));
    }

    for (key, label) in targets {
        for (field, holder) in store.hgetall(&key)? {
            report.scanned += 1;
            let pk = match holder.parse::<u64>() {
                Ok(pk) => pk,
                Err(_) => {
                    warn!(model, key = %key, holder = %holder, "unique marker holds a malformed id");
                    report.removed_members += store.hdel(&key, &[&field])?;
                    continue;
                }
            };
            if store.exists(&keys::data_key(model, pk))? {
                continue;
            }
            report.removed_members += store.hdel(&key, &[&field])?;
            report.stale.push(StaleIndexEntry {
                model: model.to_string(),
                pk,
                source: StaleSource::UniqueMarker {
                    attribute: label.clone(),
                },
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::schema::{AttributeDef, Registry};
    use crate::value::AttrKind;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(
                ModelSchema::new("track")
                    .attribute(
                        AttributeDef::new("title", AttrKind::Text)
                            .unique()
                            .prefix()
                            .suffix()
                            .words(),
                    )
                    .attribute(AttributeDef::new("rating", AttrKind::Int).ordered())
                    .unique_together(["title", "rating"]),
            )
            .unwrap();
        registry
    }

    fn seed(db: &Database, title: &str, rating: i64) -> u64 {
        let mut session = db.session();
        let track = session.new_entity("track").unwrap();
        track.borrow_mut().set("title", title).unwrap();
        track.borrow_mut().set("rating", rating).unwrap();
        session.save(&track).unwrap();
        let pk = track.borrow().pk();
        pk
    }

    #[test]
    fn stale_entries_are_swept_and_reported() {
        let db = Database::in_memory(registry(), DatabaseConfig::new()).unwrap();
        let pk = seed(&db, "blue train", 5);
        db.store().del(&keys::data_key("track", pk)).unwrap();

        let report = clean_old_index(&db, None).unwrap();
        assert!(report
            .stale
            .contains(&StaleIndexEntry {
                model: "track".into(),
                pk,
                source: StaleSource::Footprint,
            }));
        assert!(report.stale.iter().any(|entry| {
            entry.source
                == StaleSource::UniqueMarker {
                    attribute: "title".into(),
                }
        }));
        assert!(report.stale.iter().any(|entry| {
            entry.source
                == StaleSource::UniqueMarker {
                    attribute: "title+rating".into(),
                }
        }));

        let store = db.store();
        assert_eq!(store.zcard(&keys::ordered_key("track", "rating")).unwrap(), 0);
        assert_eq!(store.zcard(&keys::prefix_key("track", "title")).unwrap(), 0);
        assert_eq!(store.zcard(&keys::suffix_key("track", "title")).unwrap(), 0);
        assert_eq!(store.scard(&keys::word_key("track", "title", "blue")).unwrap(), 0);
        assert!(store.hgetall(&keys::unique_key("track", "title")).unwrap().is_empty());
        assert!(store.hgetall(&keys::footprint_key("track")).unwrap().is_empty());

        let second = clean_old_index(&db, None).unwrap();
        assert_eq!(second.scanned, 0);
        assert!(second.is_clean());
    }

    #[test]
    fn live_entities_survive_the_sweep() {
        let db = Database::in_memory(registry(), DatabaseConfig::new()).unwrap();
        let dead = seed(&db, "stardust", 3);
        let alive = seed(&db, "solar", 4);
        db.store().del(&keys::data_key("track", dead)).unwrap();

        let report = clean_old_index(&db, Some("track")).unwrap();
        assert!(report.stale.iter().all(|entry| entry.pk == dead));

        let holder = db
            .store()
            .hget(&keys::unique_key("track", "title"), "solar")
            .unwrap();
        assert_eq!(holder, Some(alive.to_string()));
        let ids = db
            .query("track")
            .unwrap()
            .filter_prefix("title", "sol")
            .ids()
            .unwrap();
        assert_eq!(ids, vec![alive]);
    }

    #[test]
    fn scoped_sweep_leaves_other_models_alone() {
        let mut registry = Registry::new();
        registry
            .register(
                ModelSchema::new("a")
                    .attribute(AttributeDef::new("name", AttrKind::Text).unique()),
            )
            .unwrap();
        registry
            .register(
                ModelSchema::new("b")
                    .attribute(AttributeDef::new("name", AttrKind::Text).unique()),
            )
            .unwrap();
        let db = Database::in_memory(registry, DatabaseConfig::new()).unwrap();

        for model in ["a", "b"] {
            let mut session = db.session();
            let entity = session.new_entity(model).unwrap();
            entity.borrow_mut().set("name", "orphan").unwrap();
            session.save(&entity).unwrap();
            let pk = entity.borrow().pk();
            db.store().del(&keys::data_key(model, pk)).unwrap();
        }

        let scoped = clean_old_index(&db, Some("a")).unwrap();
        assert!(scoped.stale.iter().all(|entry| entry.model == "a"));
        assert!(!db.store().hgetall(&keys::footprint_key("b")).unwrap().is_empty());

        let rest = clean_old_index(&db, None).unwrap();
        assert!(rest.stale.iter().all(|entry| entry.model == "b"));
        assert!(clean_old_index(&db, None).unwrap().is_clean());
    }

    #[test]
    fn unreadable_footprints_are_still_retired() {
        let db = Database::in_memory(registry(), DatabaseConfig::new()).unwrap();
        let store = db.store();
        store
            .hset(&keys::footprint_key("track"), "999", "{not json")
            .unwrap();
        store.hset(&keys::footprint_key("track"), "junk", "{}").unwrap();

        let report = clean_old_index(&db, Some("track")).unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(
            report.stale,
            vec![StaleIndexEntry {
                model: "track".into(),
                pk: 999,
                source: StaleSource::Footprint,
            }]
        );
        assert!(store.hgetall(&keys::footprint_key("track")).unwrap().is_empty());
    }

    #[test]
    fn show_progress_preserves_the_stream() {
        let items: Vec<u64> = show_progress(0..25u64, 25).collect();
        assert_eq!(items.len(), 25);
        assert_eq!(items[24], 24);
    }
}
