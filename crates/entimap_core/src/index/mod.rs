//! Secondary indexes over the store keyspace.
//!
//! Every model keeps its indexes under its own key prefix: unique
//! markers in hashes, ordered attributes and reference columns in
//! score-sorted sets, prefix and suffix text in lex-sorted sets, and
//! words in plain sets. [`delta`] computes how one save or delete
//! changes that keyspace; [`lookup`] answers predicates from it.

pub(crate) mod delta;
pub(crate) mod lookup;
pub(crate) mod tokens;

pub(crate) use delta::{IndexDelta, IndexFootprint, UniqueEntry};
pub(crate) use lookup::{IndexReader, Predicate};
