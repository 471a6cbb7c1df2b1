//! In-memory store engine.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::atomic::{AtomicGuard, AtomicOp, AtomicOutcome, AtomicProgram};
use crate::backend::StoreBackend;
use crate::error::{StoreError, StoreResult};
use crate::types::{LexRange, ScoreRange};

/// Score wrapper with a total order, so ordered sets can live in B-trees.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScoreKey(f64);

impl Eq for ScoreKey {}

impl PartialOrd for ScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoreKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Ordered set kept in two views: member order for lex scans, score order
/// for rank and score scans. Ties in score order break by member, as the
/// contract requires.
#[derive(Debug, Clone, Default)]
struct ZSet {
    by_member: BTreeMap<String, f64>,
    by_score: BTreeSet<(ScoreKey, String)>,
}

impl ZSet {
    fn insert(&mut self, member: &str, score: f64) -> bool {
        match self.by_member.insert(member.to_string(), score) {
            Some(old) => {
                self.by_score.remove(&(ScoreKey(old), member.to_string()));
                self.by_score.insert((ScoreKey(score), member.to_string()));
                false
            }
            None => {
                self.by_score.insert((ScoreKey(score), member.to_string()));
                true
            }
        }
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.by_member.remove(member) {
            Some(old) => {
                self.by_score.remove(&(ScoreKey(old), member.to_string()));
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.by_member.len()
    }

    fn is_empty(&self) -> bool {
        self.by_member.is_empty()
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Scalar(String),
    Hash(BTreeMap<String, String>),
    Set(BTreeSet<String>),
    Sorted(ZSet),
}

impl Slot {
    const fn type_name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Hash(_) => "hash",
            Self::Set(_) => "set",
            Self::Sorted(_) => "ordered set",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(slot: Slot) -> Self {
        Self {
            slot,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn wrong_type(key: &str, expected: &'static str, found: &'static str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
        found,
    }
}

// Mutation helpers operate on an owned `Option<Entry>` so the direct path
// and atomic programs share one implementation. `None` on the way in means
// the key is absent; `None` on the way out deletes it, which is how empty
// collections disappear.

fn apply_set(entry: &mut Option<Entry>, key: &str, value: &str) -> StoreResult<()> {
    match entry {
        Some(e) => match &mut e.slot {
            Slot::Scalar(s) => {
                *s = value.to_string();
                Ok(())
            }
            other => Err(wrong_type(key, "scalar", other.type_name())),
        },
        None => {
            *entry = Some(Entry::new(Slot::Scalar(value.to_string())));
            Ok(())
        }
    }
}

fn apply_incr_by(entry: &mut Option<Entry>, key: &str, delta: i64) -> StoreResult<i64> {
    let current = match entry {
        Some(e) => match &e.slot {
            Slot::Scalar(s) => s
                .parse::<i64>()
                .map_err(|_| StoreError::NotInteger {
                    key: key.to_string(),
                })?,
            other => return Err(wrong_type(key, "scalar", other.type_name())),
        },
        None => 0,
    };
    let next = current.wrapping_add(delta);
    apply_set(entry, key, &next.to_string())?;
    Ok(next)
}

fn apply_expire(entry: &mut Option<Entry>, ttl: Duration, now: Instant) -> bool {
    match entry {
        Some(e) => {
            if ttl.is_zero() {
                *entry = None;
            } else {
                e.expires_at = Some(now + ttl);
            }
            true
        }
        None => false,
    }
}

fn apply_hset(entry: &mut Option<Entry>, key: &str, field: &str, value: &str) -> StoreResult<bool> {
    match entry {
        Some(e) => match &mut e.slot {
            Slot::Hash(h) => Ok(h.insert(field.to_string(), value.to_string()).is_none()),
            other => Err(wrong_type(key, "hash", other.type_name())),
        },
        None => {
            let mut h = BTreeMap::new();
            h.insert(field.to_string(), value.to_string());
            *entry = Some(Entry::new(Slot::Hash(h)));
            Ok(true)
        }
    }
}

fn apply_hdel(entry: &mut Option<Entry>, key: &str, fields: &[&str]) -> StoreResult<u64> {
    match entry {
        Some(e) => match &mut e.slot {
            Slot::Hash(h) => {
                let mut removed = 0;
                for field in fields {
                    if h.remove(*field).is_some() {
                        removed += 1;
                    }
                }
                if h.is_empty() {
                    *entry = None;
                }
                Ok(removed)
            }
            other => Err(wrong_type(key, "hash", other.type_name())),
        },
        None => Ok(0),
    }
}

fn apply_sadd(entry: &mut Option<Entry>, key: &str, members: &[&str]) -> StoreResult<u64> {
    match entry {
        Some(e) => match &mut e.slot {
            Slot::Set(s) => {
                let mut added = 0;
                for member in members {
                    if s.insert((*member).to_string()) {
                        added += 1;
                    }
                }
                Ok(added)
            }
            other => Err(wrong_type(key, "set", other.type_name())),
        },
        None => {
            let mut s = BTreeSet::new();
            for member in members {
                s.insert((*member).to_string());
            }
            let added = s.len() as u64;
            *entry = Some(Entry::new(Slot::Set(s)));
            Ok(added)
        }
    }
}

fn apply_srem(entry: &mut Option<Entry>, key: &str, members: &[&str]) -> StoreResult<u64> {
    match entry {
        Some(e) => match &mut e.slot {
            Slot::Set(s) => {
                let mut removed = 0;
                for member in members {
                    if s.remove(*member) {
                        removed += 1;
                    }
                }
                if s.is_empty() {
                    *entry = None;
                }
                Ok(removed)
            }
            other => Err(wrong_type(key, "set", other.type_name())),
        },
        None => Ok(0),
    }
}

fn apply_zadd(entry: &mut Option<Entry>, key: &str, member: &str, score: f64) -> StoreResult<bool> {
    match entry {
        Some(e) => match &mut e.slot {
            Slot::Sorted(z) => Ok(z.insert(member, score)),
            other => Err(wrong_type(key, "ordered set", other.type_name())),
        },
        None => {
            let mut z = ZSet::default();
            z.insert(member, score);
            *entry = Some(Entry::new(Slot::Sorted(z)));
            Ok(true)
        }
    }
}

fn apply_zrem(entry: &mut Option<Entry>, key: &str, members: &[&str]) -> StoreResult<u64> {
    match entry {
        Some(e) => match &mut e.slot {
            Slot::Sorted(z) => {
                let mut removed = 0;
                for member in members {
                    if z.remove(member) {
                        removed += 1;
                    }
                }
                if z.is_empty() {
                    *entry = None;
                }
                Ok(removed)
            }
            other => Err(wrong_type(key, "ordered set", other.type_name())),
        },
        None => Ok(0),
    }
}

/// An in-memory store engine.
///
/// Holds the whole keyspace behind one `parking_lot` lock. Atomic programs
/// keep the write lock for their full duration, which gives them the same
/// serialized, indivisible execution an external store's scripting offers.
/// Expiry is lazy: expired entries act absent and are dropped when next
/// touched by a write.
///
/// # Example
///
/// ```rust
/// use entimap_store::{InMemoryStore, StoreBackend};
///
/// let store = InMemoryStore::new();
/// store.set("greeting", "hello").unwrap();
/// assert_eq!(store.get("greeting").unwrap().as_deref(), Some("hello"));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All live keys, sorted. Useful in tests and diagnostics.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let entries = self.entries.read();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Removes every key.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Runs a read-only closure against the live slot of `key`.
    fn read_slot<T>(
        &self,
        key: &str,
        f: impl FnOnce(Option<&Slot>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let now = Instant::now();
        let entries = self.entries.read();
        let slot = entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| &e.slot);
        f(slot)
    }

    /// Runs a mutation helper against an owned copy of the entry for
    /// `key`, writing the result back (or deleting the key when the
    /// helper leaves `None`).
    fn write_slot<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut Option<Entry>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let mut entry = entries.remove(key).filter(|e| !e.is_expired(now));
        let result = f(&mut entry);
        if let Some(e) = entry {
            entries.insert(key.to_string(), e);
        }
        result
    }

    fn read_set<T>(
        &self,
        key: &str,
        f: impl FnOnce(Option<&BTreeSet<String>>) -> T,
    ) -> StoreResult<T> {
        self.read_slot(key, |slot| match slot {
            None => Ok(f(None)),
            Some(Slot::Set(s)) => Ok(f(Some(s))),
            Some(other) => Err(wrong_type(key, "set", other.type_name())),
        })
    }

    fn read_zset<T>(&self, key: &str, f: impl FnOnce(Option<&ZSet>) -> T) -> StoreResult<T> {
        self.read_slot(key, |slot| match slot {
            None => Ok(f(None)),
            Some(Slot::Sorted(z)) => Ok(f(Some(z))),
            Some(other) => Err(wrong_type(key, "ordered set", other.type_name())),
        })
    }

    /// Collects the named sets for an algebra operation, treating missing
    /// keys as empty.
    fn collect_sets(&self, keys: &[&str]) -> StoreResult<Vec<BTreeSet<String>>> {
        keys.iter()
            .map(|key| self.read_set(key, |s| s.cloned().unwrap_or_default()))
            .collect()
    }
}

impl StoreBackend for InMemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.read_slot(key, |slot| match slot {
            None => Ok(None),
            Some(Slot::Scalar(s)) => Ok(Some(s.clone())),
            Some(other) => Err(wrong_type(key, "scalar", other.type_name())),
        })
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.write_slot(key, |entry| apply_set(entry, key, value))
    }

    fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        self.write_slot(key, |entry| apply_incr_by(entry, key, delta))
    }

    fn del(&self, key: &str) -> StoreResult<bool> {
        self.write_slot(key, |entry| Ok(entry.take().is_some()))
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.read_slot(key, |slot| Ok(slot.is_some()))
    }

    fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        self.write_slot(key, |entry| Ok(apply_expire(entry, ttl, now)))
    }

    fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let now = Instant::now();
        let entries = self.entries.read();
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.read_slot(key, |slot| match slot {
            None => Ok(None),
            Some(Slot::Hash(h)) => Ok(h.get(field).cloned()),
            Some(other) => Err(wrong_type(key, "hash", other.type_name())),
        })
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        self.write_slot(key, |entry| apply_hset(entry, key, field, value))
    }

    fn hdel(&self, key: &str, fields: &[&str]) -> StoreResult<u64> {
        self.write_slot(key, |entry| apply_hdel(entry, key, fields))
    }

    fn hgetall(&self, key: &str) -> StoreResult<Vec<(String, String)>> {
        self.read_slot(key, |slot| match slot {
            None => Ok(Vec::new()),
            Some(Slot::Hash(h)) => Ok(h.iter().map(|(f, v)| (f.clone(), v.clone())).collect()),
            Some(other) => Err(wrong_type(key, "hash", other.type_name())),
        })
    }

    fn hlen(&self, key: &str) -> StoreResult<u64> {
        self.read_slot(key, |slot| match slot {
            None => Ok(0),
            Some(Slot::Hash(h)) => Ok(h.len() as u64),
            Some(other) => Err(wrong_type(key, "hash", other.type_name())),
        })
    }

    fn sadd(&self, key: &str, members: &[&str]) -> StoreResult<u64> {
        self.write_slot(key, |entry| apply_sadd(entry, key, members))
    }

    fn srem(&self, key: &str, members: &[&str]) -> StoreResult<u64> {
        self.write_slot(key, |entry| apply_srem(entry, key, members))
    }

    fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.read_set(key, |s| match s {
            None => Vec::new(),
            Some(s) => s.iter().cloned().collect(),
        })
    }

    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.read_set(key, |s| s.is_some_and(|s| s.contains(member)))
    }

    fn scard(&self, key: &str) -> StoreResult<u64> {
        self.read_set(key, |s| s.map_or(0, |s| s.len() as u64))
    }

    fn sinter(&self, keys: &[&str]) -> StoreResult<Vec<String>> {
        let sets = self.collect_sets(keys)?;
        let Some((first, rest)) = sets.split_first() else {
            return Ok(Vec::new());
        };
        Ok(first
            .iter()
            .filter(|m| rest.iter().all(|s| s.contains(*m)))
            .cloned()
            .collect())
    }

    fn sunion(&self, keys: &[&str]) -> StoreResult<Vec<String>> {
        let sets = self.collect_sets(keys)?;
        let mut union = BTreeSet::new();
        for set in sets {
            union.extend(set);
        }
        Ok(union.into_iter().collect())
    }

    fn sdiff(&self, keys: &[&str]) -> StoreResult<Vec<String>> {
        let sets = self.collect_sets(keys)?;
        let Some((first, rest)) = sets.split_first() else {
            return Ok(Vec::new());
        };
        Ok(first
            .iter()
            .filter(|m| !rest.iter().any(|s| s.contains(*m)))
            .cloned()
            .collect())
    }

    fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        self.write_slot(key, |entry| apply_zadd(entry, key, member, score))
    }

    fn zrem(&self, key: &str, members: &[&str]) -> StoreResult<u64> {
        self.write_slot(key, |entry| apply_zrem(entry, key, members))
    }

    fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        self.read_zset(key, |z| z.and_then(|z| z.by_member.get(member).copied()))
    }

    fn zcard(&self, key: &str) -> StoreResult<u64> {
        self.read_zset(key, |z| z.map_or(0, |z| z.len() as u64))
    }

    fn zcount(&self, key: &str, range: &ScoreRange) -> StoreResult<u64> {
        self.read_zset(key, |z| {
            z.map_or(0, |z| {
                z.by_member
                    .values()
                    .filter(|score| range.contains(**score))
                    .count() as u64
            })
        })
    }

    fn zrange_by_score(&self, key: &str, range: &ScoreRange) -> StoreResult<Vec<(String, f64)>> {
        self.read_zset(key, |z| {
            z.map_or_else(Vec::new, |z| {
                z.by_score
                    .iter()
                    .filter(|(score, _)| range.contains(score.0))
                    .map(|(score, member)| (member.clone(), score.0))
                    .collect()
            })
        })
    }

    fn zlexcount(&self, key: &str, range: &LexRange) -> StoreResult<u64> {
        self.read_zset(key, |z| {
            z.map_or(0, |z| {
                lex_scan(&z.by_member, range).count() as u64
            })
        })
    }

    fn zrange_by_lex(&self, key: &str, range: &LexRange) -> StoreResult<Vec<String>> {
        self.read_zset(key, |z| {
            z.map_or_else(Vec::new, |z| {
                lex_scan(&z.by_member, range).map(String::from).collect()
            })
        })
    }

    fn zrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        self.read_zset(key, |z| {
            let Some(z) = z else {
                return Vec::new();
            };
            let len = z.len() as i64;
            let start = normalize_rank(start, len);
            let stop = normalize_rank(stop, len).min(len - 1);
            if start > stop || start >= len {
                return Vec::new();
            }
            z.by_score
                .iter()
                .skip(start as usize)
                .take((stop - start + 1) as usize)
                .map(|(_, member)| member.clone())
                .collect()
        })
    }

    fn run_atomic(&self, program: &AtomicProgram) -> StoreResult<AtomicOutcome> {
        let now = Instant::now();
        let mut entries = self.entries.write();

        for (index, guard) in program.guards().iter().enumerate() {
            let AtomicGuard::FieldFreeOrOwned { key, field, owner } = guard;
            let holder = match entries.get(key).filter(|e| !e.is_expired(now)) {
                None => None,
                Some(e) => match &e.slot {
                    Slot::Hash(h) => h.get(field).cloned(),
                    other => return Err(wrong_type(key, "hash", other.type_name())),
                },
            };
            if let Some(holder) = holder {
                if holder != *owner {
                    return Ok(AtomicOutcome::GuardFailed {
                        index,
                        key: key.clone(),
                        field: field.clone(),
                        holder,
                    });
                }
            }
        }

        // Apply onto staged copies so a mid-program error leaves the base
        // keyspace untouched.
        let mut staged: HashMap<String, Option<Entry>> = HashMap::new();
        for op in program.ops() {
            let entry = staged.entry(op.key().to_string()).or_insert_with(|| {
                entries
                    .get(op.key())
                    .filter(|e| !e.is_expired(now))
                    .cloned()
            });
            match op {
                AtomicOp::Set { key, value } => apply_set(entry, key, value)?,
                AtomicOp::Del { .. } => {
                    *entry = None;
                }
                AtomicOp::Expire { ttl, .. } => {
                    apply_expire(entry, *ttl, now);
                }
                AtomicOp::HSet { key, field, value } => {
                    apply_hset(entry, key, field, value)?;
                }
                AtomicOp::HDel { key, fields } => {
                    let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
                    apply_hdel(entry, key, &fields)?;
                }
                AtomicOp::SAdd { key, members } => {
                    let members: Vec<&str> = members.iter().map(String::as_str).collect();
                    apply_sadd(entry, key, &members)?;
                }
                AtomicOp::SRem { key, members } => {
                    let members: Vec<&str> = members.iter().map(String::as_str).collect();
                    apply_srem(entry, key, &members)?;
                }
                AtomicOp::ZAdd { key, member, score } => {
                    apply_zadd(entry, key, member, *score)?;
                }
                AtomicOp::ZRem { key, members } => {
                    let members: Vec<&str> = members.iter().map(String::as_str).collect();
                    apply_zrem(entry, key, &members)?;
                }
            }
        }

        for (key, entry) in staged {
            match entry {
                Some(e) => {
                    entries.insert(key, e);
                }
                None => {
                    entries.remove(&key);
                }
            }
        }
        Ok(AtomicOutcome::Applied)
    }
}

/// Iterates the members of a lex-ordered view that fall inside `range`,
/// seeking to the range floor and stopping at the first member past its
/// end.
fn lex_scan<'a>(
    by_member: &'a BTreeMap<String, f64>,
    range: &'a LexRange,
) -> impl Iterator<Item = &'a str> {
    let start = match range.scan_floor() {
        Some(floor) => std::ops::Bound::Included(floor.to_string()),
        None => std::ops::Bound::Unbounded,
    };
    by_member
        .range::<String, _>((start, std::ops::Bound::Unbounded))
        .map(|(member, _)| member.as_str())
        .take_while(|member| !range.past_end(member))
        .filter(|member| range.contains(member))
}

fn normalize_rank(rank: i64, len: i64) -> i64 {
    if rank < 0 {
        (len + rank).max(0)
    } else {
        rank
    }
}
