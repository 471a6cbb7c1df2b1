//! # entimap store
//!
//! Key-value store contract and in-memory store engine for entimap.
//!
//! This crate defines the exact store capability set the entity mapper
//! consumes: scalars, hashes, unordered sets, ordered sets (with score and
//! lexicographic ranges), key expiry, and guarded atomic programs. The
//! mapper owns all key layout and interpretation; a backend is just the
//! data structures.
//!
//! ## Design Principles
//!
//! - Backends implement [`StoreBackend`] and stay ignorant of entities,
//!   indexes, and key naming
//! - Atomic programs ([`AtomicProgram`]) are checked-then-applied as one
//!   indivisible unit, the typed equivalent of server-side scripting
//! - Handles are `Send + Sync`; one store is shared across sessions
//!
//! ## Example
//!
//! ```rust
//! use entimap_store::{InMemoryStore, ScoreRange, StoreBackend};
//!
//! let store = InMemoryStore::new();
//! store.zadd("user:age:idx", "1", 36.0).unwrap();
//! store.zadd("user:age:idx", "2", 17.0).unwrap();
//!
//! let adults = store
//!     .zrange_by_score("user:age:idx", &ScoreRange::at_least(18.0))
//!     .unwrap();
//! assert_eq!(adults.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod atomic;
mod backend;
mod error;
mod memory;
mod types;

pub use atomic::{AtomicGuard, AtomicOp, AtomicOutcome, AtomicProgram};
pub use backend::StoreBackend;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use types::{LexBound, LexRange, ScoreBound, ScoreRange};
