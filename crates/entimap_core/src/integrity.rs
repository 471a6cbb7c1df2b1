//! Referential integrity: planning deletes across relationships.
//!
//! A delete first builds a plan by walking OneToMany relationships
//! depth-first. Restrict relationships with live referrers abort the
//! walk before anything is touched; cascade relationships pull their
//! referrers into the plan, children before parents. The plan is then
//! handed to the write engine in one piece, so in atomic mode the whole
//! chain disappears together.

use std::collections::HashSet;
use std::sync::Arc;

use entimap_store::{ScoreRange, StoreBackend};
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::entity::hydrate;
use crate::error::{CoreError, CoreResult};
use crate::keys;
use crate::schema::{DeletePolicy, ModelSchema, Relation, SchemaMap};
use crate::value::AttrMap;

/// One entity scheduled for removal, with the committed state whose
/// index entries must be cleared.
#[derive(Debug)]
pub(crate) struct Victim {
    pub schema: Arc<ModelSchema>,
    pub pk: u64,
    pub committed: AttrMap,
}

/// The full set of entities one delete removes, children first.
#[derive(Debug, Default)]
pub(crate) struct DeletePlan {
    pub victims: Vec<Victim>,
}

impl DeletePlan {
    /// Number of entities the plan removes.
    pub fn len(&self) -> usize {
        self.victims.len()
    }
}

/// Walks relationships to enforce delete policies.
pub(crate) struct IntegrityEnforcer<'a> {
    store: &'a dyn StoreBackend,
    schemas: &'a SchemaMap,
    config: &'a DatabaseConfig,
}

impl<'a> IntegrityEnforcer<'a> {
    pub fn new(
        store: &'a dyn StoreBackend,
        schemas: &'a SchemaMap,
        config: &'a DatabaseConfig,
    ) -> Self {
        Self {
            store,
            schemas,
            config,
        }
    }

    /// Plans the removal of `pk` and everything cascading from it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReferentialIntegrity`] when a restrict
    /// relationship still has live referrers, and
    /// [`CoreError::CascadeDepthExceeded`] when the chain runs deeper
    /// than the configured bound. A failed plan removes nothing.
    pub fn plan_delete(&self, schema: &Arc<ModelSchema>, pk: u64) -> CoreResult<DeletePlan> {
        let mut plan = DeletePlan::default();
        let mut visited = HashSet::new();
        self.visit(schema, pk, 0, &mut visited, &mut plan)?;
        debug!(
            model = schema.name(),
            pk,
            victims = plan.len(),
            "delete plan built"
        );
        Ok(plan)
    }

    /// Live entities referencing `pk` through one named relationship.
    pub fn referrers(&self, schema: &ModelSchema, relation: &str, pk: u64) -> CoreResult<Vec<u64>> {
        let relation = schema.relation(relation).ok_or_else(|| {
            CoreError::query_usage(format!(
                "model '{}' has no relation '{relation}'",
                schema.name()
            ))
        })?;
        self.live_referrers(relation, pk)
    }

    fn visit(
        &self,
        schema: &Arc<ModelSchema>,
        pk: u64,
        depth: u32,
        visited: &mut HashSet<(String, u64)>,
        plan: &mut DeletePlan,
    ) -> CoreResult<()> {
        if !visited.insert((schema.name().to_string(), pk)) {
            return Ok(());
        }
        if depth > self.config.max_cascade_depth {
            return Err(CoreError::CascadeDepthExceeded {
                limit: self.config.max_cascade_depth,
            });
        }

        for relation in schema.relations() {
            let referrers = self.live_referrers(relation, pk)?;
            match relation.on_delete() {
                DeletePolicy::Restrict => {
                    if !referrers.is_empty() {
                        return Err(CoreError::referential_integrity(
                            schema.name(),
                            pk,
                            relation.name(),
                        ));
                    }
                }
                DeletePolicy::Cascade => {
                    let child = self.target_schema(relation)?;
                    for referrer in referrers {
                        self.visit(&child, referrer, depth + 1, visited, plan)?;
                    }
                }
            }
        }

        if let Some(committed) = hydrate(self.store, schema, pk)? {
            plan.victims.push(Victim {
                schema: Arc::clone(schema),
                pk,
                committed,
            });
        }
        Ok(())
    }

    /// Reads the reciprocal column index and keeps only ids whose data
    /// hash still exists. Index entries may outlive their entity after
    /// an interrupted fallback write; those must not block a restrict
    /// delete or resurrect under a cascade.
    fn live_referrers(&self, relation: &Relation, pk: u64) -> CoreResult<Vec<u64>> {
        let child = self.target_schema(relation)?;
        let key = keys::ordered_key(child.name(), relation.via_column());
        #[allow(clippy::cast_precision_loss)]
        let score = pk as f64;
        let mut live = Vec::new();
        for (member, _) in self.store.zrange_by_score(&key, &ScoreRange::exact(score))? {
            let id: u64 = member.parse().map_err(|_| {
                CoreError::corrupt_index(format!("non-numeric id '{member}' in '{key}'"))
            })?;
            if self.store.exists(&keys::data_key(child.name(), id))? {
                live.push(id);
            }
        }
        Ok(live)
    }

    fn target_schema(&self, relation: &Relation) -> CoreResult<Arc<ModelSchema>> {
        self.schemas
            .get(relation.target_model())
            .cloned()
            .ok_or_else(|| CoreError::unknown_model(relation.target_model()))
    }
}
