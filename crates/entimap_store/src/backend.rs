//! Store backend trait definition.

use std::time::Duration;

use crate::atomic::{AtomicOutcome, AtomicProgram};
use crate::error::StoreResult;
use crate::types::{LexRange, ScoreRange};

/// The key-value store capability set the entity mapper consumes.
///
/// A backend exposes scalars, hashes, unordered sets, ordered sets, key
/// expiry, and guarded atomic programs. It knows nothing about entities,
/// indexes, or key layout - the mapper owns all of that interpretation.
///
/// # Invariants
///
/// - Every key holds at most one structural type at a time; an operation
///   against a key of the wrong type fails with
///   [`StoreError::WrongType`](crate::StoreError::WrongType).
/// - Ordered-set members are unique per key; adding an existing member
///   updates its score.
/// - [`run_atomic`](Self::run_atomic) executes its whole program
///   indivisibly: concurrent programs over overlapping keys are totally
///   ordered, and a failed guard applies nothing.
/// - Expired keys behave as absent everywhere.
/// - Backends must be `Send + Sync`; the mapper shares one handle across
///   sessions and threads.
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - the in-process store engine
pub trait StoreBackend: Send + Sync {
    // --- scalars ---

    /// Reads a scalar key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-scalar type or the backend
    /// fails.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes a scalar key, replacing any previous scalar value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-scalar type or the backend
    /// fails.
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Atomically adds `delta` to the integer stored at `key` and returns
    /// the new value. A missing key counts from zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the existing value is not an integer, the key
    /// holds a non-scalar type, or the backend fails.
    fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64>;

    // --- keys ---

    /// Deletes a key of any type. Returns whether the key existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn del(&self, key: &str) -> StoreResult<bool>;

    /// Whether a key exists (and has not expired).
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Sets a time-to-live on a key. Returns whether the key existed.
    ///
    /// A zero or sub-millisecond TTL removes the key immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Remaining time-to-live of a key, `None` when the key is absent or
    /// carries no expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    // --- hashes ---

    /// Reads one hash field.
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-hash type or the backend
    /// fails.
    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Writes one hash field. Returns `true` when the field was newly
    /// created rather than overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-hash type or the backend
    /// fails.
    fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<bool>;

    /// Deletes hash fields. Returns how many existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-hash type or the backend
    /// fails.
    fn hdel(&self, key: &str, fields: &[&str]) -> StoreResult<u64>;

    /// All fields and values of a hash, sorted by field name.
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-hash type or the backend
    /// fails.
    fn hgetall(&self, key: &str) -> StoreResult<Vec<(String, String)>>;

    /// Number of fields in a hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-hash type or the backend
    /// fails.
    fn hlen(&self, key: &str) -> StoreResult<u64>;

    // --- unordered sets ---

    /// Adds members to a set. Returns how many were newly added.
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-set type or the backend
    /// fails.
    fn sadd(&self, key: &str, members: &[&str]) -> StoreResult<u64>;

    /// Removes members from a set. Returns how many were present.
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-set type or the backend
    /// fails.
    fn srem(&self, key: &str, members: &[&str]) -> StoreResult<u64>;

    /// All members of a set, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-set type or the backend
    /// fails.
    fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Whether `member` is in the set.
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-set type or the backend
    /// fails.
    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Cardinality of a set.
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-set type or the backend
    /// fails.
    fn scard(&self, key: &str) -> StoreResult<u64>;

    /// Intersection of the named sets, sorted. Empty input yields empty
    /// output.
    ///
    /// # Errors
    ///
    /// Returns an error if any key holds a non-set type or the backend
    /// fails.
    fn sinter(&self, keys: &[&str]) -> StoreResult<Vec<String>>;

    /// Union of the named sets, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if any key holds a non-set type or the backend
    /// fails.
    fn sunion(&self, keys: &[&str]) -> StoreResult<Vec<String>>;

    /// Members of the first set absent from every other, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if any key holds a non-set type or the backend
    /// fails.
    fn sdiff(&self, keys: &[&str]) -> StoreResult<Vec<String>>;

    // --- ordered sets ---

    /// Adds a member with a score, or updates the score of an existing
    /// member. Returns `true` when the member was newly added.
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-ordered-set type or the
    /// backend fails.
    fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<bool>;

    /// Removes members from an ordered set. Returns how many were present.
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-ordered-set type or the
    /// backend fails.
    fn zrem(&self, key: &str, members: &[&str]) -> StoreResult<u64>;

    /// Score of a member, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-ordered-set type or the
    /// backend fails.
    fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>>;

    /// Cardinality of an ordered set.
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-ordered-set type or the
    /// backend fails.
    fn zcard(&self, key: &str) -> StoreResult<u64>;

    /// Number of members whose score falls in `range`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-ordered-set type or the
    /// backend fails.
    fn zcount(&self, key: &str, range: &ScoreRange) -> StoreResult<u64>;

    /// Members whose score falls in `range`, with their scores, in score
    /// order (ties broken by member order).
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-ordered-set type or the
    /// backend fails.
    fn zrange_by_score(&self, key: &str, range: &ScoreRange) -> StoreResult<Vec<(String, f64)>>;

    /// Number of members inside the lexicographic `range`. Only
    /// well-defined when the ranged members share one score.
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-ordered-set type or the
    /// backend fails.
    fn zlexcount(&self, key: &str, range: &LexRange) -> StoreResult<u64>;

    /// Members inside the lexicographic `range`, in member order. Only
    /// well-defined when the ranged members share one score.
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-ordered-set type or the
    /// backend fails.
    fn zrange_by_lex(&self, key: &str, range: &LexRange) -> StoreResult<Vec<String>>;

    /// Members by rank position, inclusive on both ends; negative
    /// positions count from the highest rank, as in `zrange(key, 0, -1)`
    /// for the full set.
    ///
    /// # Errors
    ///
    /// Returns an error if the key holds a non-ordered-set type or the
    /// backend fails.
    fn zrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>>;

    // --- atomic programs ---

    /// Executes a guarded program indivisibly.
    ///
    /// Guards are evaluated first, in order; the first failure aborts the
    /// program with zero effect and reports the failing guard. Otherwise
    /// every operation is applied, in order, with no other mutation
    /// interleaved.
    ///
    /// # Errors
    ///
    /// Returns an error if an operation targets a key of the wrong type
    /// or the backend fails; a failed program applies none of its
    /// operations.
    fn run_atomic(&self, program: &AtomicProgram) -> StoreResult<AtomicOutcome>;
}
