//! Index-backed queries: filter, order, window, execute.
//!
//! A query is an immutable builder over one model. Filters narrow the
//! candidate set through the model's indexes; the planner validates
//! every predicate before touching the store, then resolves them
//! cheapest-first and intersects. Execution hydrates the surviving ids
//! through a session, so query results share handles with everything
//! else the session tracks.

mod paged;

pub use paged::{CachedResult, ResultIter, DEFAULT_PAGE_SIZE};

use std::collections::HashSet;
use std::sync::Arc;

use entimap_store::{ScoreRange, StoreBackend};
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::entity::EntityRef;
use crate::error::{CoreError, CoreResult};
use crate::index::{IndexReader, Predicate};
use crate::keys;
use crate::schema::ModelSchema;
use crate::session::Session;
use crate::value::AttrValue;

/// Explicit result ordering over one ordered index.
#[derive(Debug, Clone)]
struct OrderBy {
    attribute: String,
    descending: bool,
}

/// A filtered, optionally ordered and windowed read over one model.
///
/// Builder methods consume and return the query, so refinements chain:
///
/// ```ignore
/// let adults = db.query("user")?
///     .filter_at_least("age", 18)
///     .order_by("-age")
///     .limit(0, 20)
///     .execute(&mut session)?;
/// ```
pub struct Query {
    schema: Arc<ModelSchema>,
    store: Arc<dyn StoreBackend>,
    config: DatabaseConfig,
    predicates: Vec<Predicate>,
    order: Option<OrderBy>,
    window: Option<(usize, usize)>,
}

impl Query {
    pub(crate) fn new(
        schema: Arc<ModelSchema>,
        store: Arc<dyn StoreBackend>,
        config: DatabaseConfig,
    ) -> Self {
        Self {
            schema,
            store,
            config,
            predicates: Vec::new(),
            order: None,
            window: None,
        }
    }

    /// The model this query reads.
    #[must_use]
    pub fn model(&self) -> &str {
        self.schema.name()
    }

    /// Keeps entities whose attribute equals `value`. On a reference
    /// column a non-negative integer filters by the referenced id.
    #[must_use]
    pub fn filter_eq(mut self, attribute: &str, value: impl Into<AttrValue>) -> Self {
        let value = value.into();
        if self.schema.foreign_key_def(attribute).is_some() {
            if let AttrValue::Int(id) = value {
                if let Ok(target_pk) = u64::try_from(id) {
                    self.predicates.push(Predicate::References {
                        column: attribute.to_string(),
                        target_pk,
                    });
                    return self;
                }
            }
        }
        self.predicates.push(Predicate::Equals {
            attribute: attribute.to_string(),
            value,
        });
        self
    }

    /// Keeps entities whose attribute lies in `[min, max]`, both ends
    /// inclusive.
    #[must_use]
    pub fn filter_between(
        mut self,
        attribute: &str,
        min: impl Into<AttrValue>,
        max: impl Into<AttrValue>,
    ) -> Self {
        self.predicates.push(Predicate::Range {
            attribute: attribute.to_string(),
            min: Some(min.into()),
            max: Some(max.into()),
        });
        self
    }

    /// Keeps entities whose attribute is at least `min`, inclusive.
    #[must_use]
    pub fn filter_at_least(mut self, attribute: &str, min: impl Into<AttrValue>) -> Self {
        self.predicates.push(Predicate::Range {
            attribute: attribute.to_string(),
            min: Some(min.into()),
            max: None,
        });
        self
    }

    /// Keeps entities whose attribute is at most `max`, inclusive.
    #[must_use]
    pub fn filter_at_most(mut self, attribute: &str, max: impl Into<AttrValue>) -> Self {
        self.predicates.push(Predicate::Range {
            attribute: attribute.to_string(),
            min: None,
            max: Some(max.into()),
        });
        self
    }

    /// Keeps entities whose text attribute starts with `prefix`.
    #[must_use]
    pub fn filter_prefix(mut self, attribute: &str, prefix: impl Into<String>) -> Self {
        self.predicates.push(Predicate::Prefix {
            attribute: attribute.to_string(),
            prefix: prefix.into(),
        });
        self
    }

    /// Keeps entities whose text attribute ends with `suffix`.
    #[must_use]
    pub fn filter_suffix(mut self, attribute: &str, suffix: impl Into<String>) -> Self {
        self.predicates.push(Predicate::Suffix {
            attribute: attribute.to_string(),
            suffix: suffix.into(),
        });
        self
    }

    /// Keeps entities whose text attribute contains `pattern` anywhere,
    /// case-sensitively.
    #[must_use]
    pub fn filter_pattern(mut self, attribute: &str, pattern: impl Into<String>) -> Self {
        self.predicates.push(Predicate::Pattern {
            attribute: attribute.to_string(),
            pattern: pattern.into(),
        });
        self
    }

    /// Keeps entities whose word index contains every word of `text`.
    #[must_use]
    pub fn filter_words(mut self, attribute: &str, text: impl Into<String>) -> Self {
        self.predicates.push(Predicate::Words {
            attribute: attribute.to_string(),
            text: text.into(),
        });
        self
    }

    /// Keeps entities whose reference column points at `target_pk`.
    #[must_use]
    pub fn filter_reference(mut self, column: &str, target_pk: u64) -> Self {
        self.predicates.push(Predicate::References {
            column: column.to_string(),
            target_pk,
        });
        self
    }

    /// Orders results by an ordered attribute, ascending. A leading `-`
    /// orders descending. Entities with the attribute unset are dropped
    /// from the result.
    #[must_use]
    pub fn order_by(mut self, spec: &str) -> Self {
        let (attribute, descending) = match spec.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (spec, false),
        };
        self.order = Some(OrderBy {
            attribute: attribute.to_string(),
            descending,
        });
        self
    }

    /// Keeps `count` results starting at `offset`, applied after
    /// filtering and ordering.
    #[must_use]
    pub fn limit(mut self, offset: usize, count: usize) -> Self {
        self.window = Some((offset, count));
        self
    }

    /// Resolves to matching primary keys, ordered and windowed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::QueryUsage`] for a query with neither
    /// filters nor ordering, and whatever a predicate's validation
    /// raises; validation failures surface before any index is read.
    pub fn ids(&self) -> CoreResult<Vec<u64>> {
        let ids = self.resolve_ids()?;
        Ok(match self.window {
            None => ids,
            Some((offset, count)) => ids.into_iter().skip(offset).take(count).collect(),
        })
    }

    /// Number of matches, after the window.
    pub fn count(&self) -> CoreResult<usize> {
        Ok(self.ids()?.len())
    }

    /// Resolves and hydrates matches through a session. Ids whose
    /// entity vanished between index read and hydration are skipped.
    pub fn execute(&self, session: &mut Session) -> CoreResult<Vec<EntityRef>> {
        let ids = self.ids()?;
        session.get_many(self.model(), &ids)
    }

    /// The first match, or `None`.
    pub fn first(&self, session: &mut Session) -> CoreResult<Option<EntityRef>> {
        Ok(self.execute(session)?.into_iter().next())
    }

    /// Materializes the current matches into a server-side result set
    /// that lives for `ttl` (the configured default when `None`) and
    /// can be paged without re-running the query.
    pub fn cached_result(&self, ttl: Option<std::time::Duration>) -> CoreResult<CachedResult> {
        let ids = self.ids()?;
        CachedResult::create(
            Arc::clone(&self.store),
            self.model(),
            &ids,
            ttl.unwrap_or(self.config.default_result_ttl),
        )
    }

    /// Materializes the matches and walks them through `session`,
    /// hydrating `page_size` entities at a time. Each call takes a
    /// fresh snapshot; see [`CachedResult::iter`] for the paging
    /// behavior.
    pub fn iter_result<'s>(
        &self,
        session: &'s mut Session,
        ttl: Option<std::time::Duration>,
        page_size: usize,
    ) -> CoreResult<ResultIter<'s>> {
        Ok(self.cached_result(ttl)?.iter(session, page_size))
    }

    fn resolve_ids(&self) -> CoreResult<Vec<u64>> {
        let Some(order) = &self.order else {
            if self.predicates.is_empty() {
                return Err(CoreError::query_usage("missing filter or order criteria"));
            }
            return self.resolve_filtered(None);
        };
        self.validate_order(order)?;
        if self.predicates.is_empty() {
            let mut ids = self.order_index_scan(&order.attribute)?;
            if order.descending {
                ids.reverse();
            }
            return Ok(ids);
        }
        self.resolve_filtered(Some(order))
    }

    /// Validates every predicate, resolves them cheapest-first, and
    /// intersects. Single-predicate results keep their index's natural
    /// order; intersections fall back to ascending primary key unless
    /// an explicit ordering re-ranks them.
    fn resolve_filtered(&self, order: Option<&OrderBy>) -> CoreResult<Vec<u64>> {
        let reader = IndexReader::new(self.store.as_ref(), &self.schema, &self.config);
        for predicate in &self.predicates {
            reader.validate(predicate)?;
        }

        let mut priced: Vec<(u64, usize)> = Vec::with_capacity(self.predicates.len());
        for (index, predicate) in self.predicates.iter().enumerate() {
            priced.push((reader.estimate(predicate)?, index));
        }
        priced.sort_unstable();
        debug!(
            model = self.model(),
            predicates = priced.len(),
            cheapest = priced[0].0,
            "resolving query"
        );

        let mut ids = reader.resolve(&self.predicates[priced[0].1])?;
        for &(_, index) in &priced[1..] {
            if ids.is_empty() {
                break;
            }
            let matching: HashSet<u64> = reader
                .resolve(&self.predicates[index])?
                .into_iter()
                .collect();
            ids.retain(|id| matching.contains(id));
        }

        match order {
            Some(order) => {
                let keep: HashSet<u64> = ids.iter().copied().collect();
                let mut ranked: Vec<u64> = self
                    .order_index_scan(&order.attribute)?
                    .into_iter()
                    .filter(|id| keep.contains(id))
                    .collect();
                if order.descending {
                    ranked.reverse();
                }
                Ok(ranked)
            }
            None => {
                if self.predicates.len() > 1 {
                    ids.sort_unstable();
                }
                Ok(ids)
            }
        }
    }

    fn validate_order(&self, order: &OrderBy) -> CoreResult<()> {
        let attribute = order.attribute.as_str();
        if let Some(def) = self.schema.attribute_def(attribute) {
            if !def.flags().ordered {
                return Err(CoreError::missing_index(self.model(), attribute, "ordered"));
            }
            return Ok(());
        }
        if self.schema.foreign_key_def(attribute).is_some() {
            return Ok(());
        }
        Err(CoreError::unknown_attribute(self.model(), attribute))
    }

    /// Full ascending scan of one ordered index.
    fn order_index_scan(&self, attribute: &str) -> CoreResult<Vec<u64>> {
        let key = keys::ordered_key(self.model(), attribute);
        let mut ids = Vec::new();
        for (member, _) in self.store.zrange_by_score(&key, &ScoreRange::all())? {
            let id = member.parse().map_err(|_| {
                CoreError::corrupt_index(format!("non-numeric id '{member}' in '{key}'"))
            })?;
            ids.push(id);
        }
        Ok(ids)
    }
}
