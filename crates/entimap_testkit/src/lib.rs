//! # entimap testkit
//!
//! Test utilities for entimap.
//!
//! This crate provides:
//! - Test fixtures: canned registries and a database wrapper with
//!   seeding helpers
//! - Property-based test generators using proptest
//! - A fault-injecting store wrapper for crash and compensation tests
//! - An index auditor that cross-checks the documented key layout
//!   against the data records
//!
//! ## Usage
//!
//! ```rust
//! use entimap_testkit::prelude::*;
//!
//! let db = TestDb::catalog();
//! let vendor = db.seed_vendor("acme");
//! let item = db.seed_item(vendor, "SKU-1", "anvil", 49.5, 3, "heavy iron");
//!
//! let report = audit_database(&db).unwrap();
//! assert!(report.is_clean(), "{report:?}");
//! assert!(item > 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod fault;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::audit::*;
    pub use crate::fault::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use audit::*;
pub use fault::*;
pub use fixtures::*;
pub use generators::*;
