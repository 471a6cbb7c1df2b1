//! # entimap core
//!
//! Relational-style entity mapping over a key-value store.
//!
//! This crate provides:
//! - Model schemas with typed attributes, secondary indexes, and
//!   cross-model relationships
//! - Sessions with an identity map and unit-of-work commit
//! - Indexed queries: equality, ranges, prefix, suffix, substring
//!   patterns, word search, and reference lookups
//! - Cached, paginated query results with sliding expiry
//! - Delete policies (restrict and cascade) enforced through the index
//! - Offline maintenance that sweeps index entries whose records are gone
//!
//! ## Design Principles
//!
//! - The mapper owns all key layout; the store (see [`entimap_store`])
//!   is plain data structures behind a trait
//! - Every write maintains its index entries in the same atomic program
//!   as the data, so readers never see a half-indexed entity
//! - Queries run without a session; sessions add identity and caching
//!   on top
//!
//! ## Example
//!
//! ```rust
//! use entimap_core::{
//!     AttrKind, AttributeDef, Database, DatabaseConfig, ModelSchema, Registry,
//! };
//!
//! let mut registry = Registry::new();
//! registry.register(
//!     ModelSchema::new("employee")
//!         .attribute(AttributeDef::new("name", AttrKind::Text).unique().prefix())
//!         .attribute(AttributeDef::new("salary", AttrKind::Int).ordered()),
//! )?;
//! let db = Database::in_memory(registry, DatabaseConfig::new())?;
//!
//! let mut session = db.session();
//! for (name, salary) in [("ada", 120_000i64), ("grace", 130_000)] {
//!     let employee = session.new_entity("employee")?;
//!     employee.borrow_mut().set("name", name)?;
//!     employee.borrow_mut().set("salary", salary)?;
//! }
//! session.commit()?;
//!
//! let well_paid = db
//!     .query("employee")?
//!     .filter_at_least("salary", 125_000i64)
//!     .count()?;
//! assert_eq!(well_paid, 1);
//! # Ok::<(), entimap_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
mod entity;
mod error;
mod index;
mod integrity;
mod keys;
mod maintenance;
mod query;
mod schema;
mod session;
mod value;
mod write;

pub use config::{DatabaseConfig, TokenizerConfig, WriteMode};
pub use database::Database;
pub use entity::{Entity, EntityRef};
pub use error::{CoreError, CoreResult};
pub use maintenance::{clean_old_index, show_progress, CleanupReport, StaleIndexEntry, StaleSource};
pub use query::{CachedResult, Query, ResultIter, DEFAULT_PAGE_SIZE};
pub use schema::{AttributeDef, DeletePolicy, ForeignKey, IndexFlags, ModelSchema, Registry, Relation};
pub use session::Session;
pub use value::{AttrKind, AttrMap, AttrValue};
