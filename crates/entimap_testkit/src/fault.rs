//! A store wrapper that injects failures into mutations.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use entimap_store::{
    AtomicOutcome, AtomicProgram, LexRange, ScoreRange, StoreBackend, StoreError, StoreResult,
};

/// Wraps a store and fails one mutating call on demand.
///
/// Reads always pass through. Arm the wrapper, run a scenario, and the
/// nth mutation from that point returns [`StoreError::Backend`] without
/// touching the inner store. Exactly one call fails per arming, so a
/// scenario observes a single crash point.
pub struct FaultStore {
    inner: Arc<dyn StoreBackend>,
    budget: AtomicI64,
}

impl FaultStore {
    /// Wraps `inner` with no fault armed.
    #[must_use]
    pub fn wrap(inner: Arc<dyn StoreBackend>) -> Self {
        Self {
            inner,
            budget: AtomicI64::new(i64::MAX),
        }
    }

    /// Arms the wrapper: counting from now, the `nth` mutating call
    /// fails (1 fails the very next one).
    pub fn arm(&self, nth: i64) {
        self.budget.store(nth, Ordering::SeqCst);
    }

    /// Disarms the wrapper so every mutation passes through again.
    pub fn disarm(&self) {
        self.budget.store(i64::MAX, Ordering::SeqCst);
    }

    fn charge(&self, op: &'static str) -> StoreResult<()> {
        if self.budget.fetch_sub(1, Ordering::SeqCst) == 1 {
            return Err(StoreError::backend(format!("injected fault at {op}")));
        }
        Ok(())
    }
}

impl StoreBackend for FaultStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.charge("set")?;
        self.inner.set(key, value)
    }

    fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        self.charge("incr_by")?;
        self.inner.incr_by(key, delta)
    }

    fn del(&self, key: &str) -> StoreResult<bool> {
        self.charge("del")?;
        self.inner.del(key)
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key)
    }

    fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.charge("expire")?;
        self.inner.expire(key, ttl)
    }

    fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.inner.ttl(key)
    }

    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.inner.hget(key, field)
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        self.charge("hset")?;
        self.inner.hset(key, field, value)
    }

    fn hdel(&self, key: &str, fields: &[&str]) -> StoreResult<u64> {
        self.charge("hdel")?;
        self.inner.hdel(key, fields)
    }

    fn hgetall(&self, key: &str) -> StoreResult<Vec<(String, String)>> {
        self.inner.hgetall(key)
    }

    fn hlen(&self, key: &str) -> StoreResult<u64> {
        self.inner.hlen(key)
    }

    fn sadd(&self, key: &str, members: &[&str]) -> StoreResult<u64> {
        self.charge("sadd")?;
        self.inner.sadd(key, members)
    }

    fn srem(&self, key: &str, members: &[&str]) -> StoreResult<u64> {
        self.charge("srem")?;
        self.inner.srem(key, members)
    }

    fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.inner.smembers(key)
    }

    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.inner.sismember(key, member)
    }

    fn scard(&self, key: &str) -> StoreResult<u64> {
        self.inner.scard(key)
    }

    fn sinter(&self, keys: &[&str]) -> StoreResult<Vec<String>> {
        self.inner.sinter(keys)
    }

    fn sunion(&self, keys: &[&str]) -> StoreResult<Vec<String>> {
        self.inner.sunion(keys)
    }

    fn sdiff(&self, keys: &[&str]) -> StoreResult<Vec<String>> {
        self.inner.sdiff(keys)
    }

    fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        self.charge("zadd")?;
        self.inner.zadd(key, member, score)
    }

    fn zrem(&self, key: &str, members: &[&str]) -> StoreResult<u64> {
        self.charge("zrem")?;
        self.inner.zrem(key, members)
    }

    fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        self.inner.zscore(key, member)
    }

    fn zcard(&self, key: &str) -> StoreResult<u64> {
        self.inner.zcard(key)
    }

    fn zcount(&self, key: &str, range: &ScoreRange) -> StoreResult<u64> {
        self.inner.zcount(key, range)
    }

    fn zrange_by_score(&self, key: &str, range: &ScoreRange) -> StoreResult<Vec<(String, f64)>> {
        self.inner.zrange_by_score(key, range)
    }

    fn zlexcount(&self, key: &str, range: &LexRange) -> StoreResult<u64> {
        self.inner.zlexcount(key, range)
    }

    fn zrange_by_lex(&self, key: &str, range: &LexRange) -> StoreResult<Vec<String>> {
        self.inner.zrange_by_lex(key, range)
    }

    fn zrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        self.inner.zrange(key, start, stop)
    }

    fn run_atomic(&self, program: &AtomicProgram) -> StoreResult<AtomicOutcome> {
        self.charge("run_atomic")?;
        self.inner.run_atomic(program)
    }
}
