//! Materialized result sets and page-at-a-time iteration.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use entimap_store::StoreBackend;
use tracing::debug;
use uuid::Uuid;

use crate::entity::EntityRef;
use crate::error::{CoreError, CoreResult};
use crate::keys;
use crate::session::Session;

/// Page size used by [`CachedResult::iter`] when none is given.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// A query result frozen into its own store key.
///
/// The ids live in a sorted set under a random token, ranked by their
/// position in the original result, and expire after the ttl. Every
/// page read pushes the expiry out again, so a result stays alive as
/// long as somebody keeps walking it.
pub struct CachedResult {
    store: Arc<dyn StoreBackend>,
    model: String,
    key: String,
    ttl: Duration,
}

impl CachedResult {
    pub(crate) fn create(
        store: Arc<dyn StoreBackend>,
        model: &str,
        ids: &[u64],
        ttl: Duration,
    ) -> CoreResult<Self> {
        let token = Uuid::new_v4();
        let key = keys::result_key(model, &token.to_string());
        for (rank, id) in ids.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            store.zadd(&key, &id.to_string(), rank as f64)?;
        }
        store.expire(&key, ttl)?;
        debug!(model, key = %key, ids = ids.len(), "cached result set");
        Ok(Self {
            store,
            model: model.to_string(),
            key,
            ttl,
        })
    }

    /// The model the ids belong to.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The store key holding the ids.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Number of ids still cached. Zero once the ttl has passed.
    pub fn len(&self) -> CoreResult<u64> {
        Ok(self.store.zcard(&self.key)?)
    }

    /// Whether the cached set is empty or expired.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Reads one page of ids in result order, extending the ttl first.
    pub fn page(&self, offset: usize, count: usize) -> CoreResult<Vec<u64>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.store.expire(&self.key, self.ttl)?;
        let start = i64::try_from(offset).unwrap_or(i64::MAX);
        let stop = i64::try_from(offset + count - 1).unwrap_or(i64::MAX);
        let mut ids = Vec::new();
        for member in self.store.zrange(&self.key, start, stop)? {
            let id = member.parse().map_err(|_| {
                CoreError::corrupt_index(format!("non-numeric id '{member}' in '{}'", self.key))
            })?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Walks the cached ids page by page, hydrating through `session`.
    ///
    /// Before each new page the iterator forgets the previous page's
    /// clean entities, so a long walk does not pin every visited entity
    /// in the session. Ids whose entity vanished since caching are
    /// skipped.
    pub fn iter(self, session: &mut Session, page_size: usize) -> ResultIter<'_> {
        ResultIter {
            cached: self,
            session,
            page_size: page_size.max(1),
            offset: 0,
            buffer: VecDeque::new(),
            previous: Vec::new(),
            finished: false,
        }
    }
}

/// Iterator over a [`CachedResult`], yielding hydrated entities.
pub struct ResultIter<'s> {
    cached: CachedResult,
    session: &'s mut Session,
    page_size: usize,
    offset: usize,
    buffer: VecDeque<EntityRef>,
    previous: Vec<EntityRef>,
    finished: bool,
}

impl Iterator for ResultIter<'_> {
    type Item = CoreResult<EntityRef>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entity) = self.buffer.pop_front() {
                return Some(Ok(entity));
            }
            if self.finished {
                return None;
            }

            for entity in self.previous.drain(..) {
                let (model, pk, clean) = {
                    let entity = entity.borrow();
                    (
                        entity.model().to_string(),
                        entity.pk(),
                        !entity.is_modified() && !entity.is_deleted(),
                    )
                };
                if clean {
                    self.session.forget(&model, pk);
                }
            }

            let page = match self.cached.page(self.offset, self.page_size) {
                Ok(page) => page,
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            };
            if page.is_empty() {
                self.finished = true;
                return None;
            }
            self.offset += page.len();
            if page.len() < self.page_size {
                self.finished = true;
            }

            match self.session.get_many(self.cached.model(), &page) {
                Ok(entities) => {
                    self.previous.clone_from(&entities);
                    self.buffer.extend(entities);
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
