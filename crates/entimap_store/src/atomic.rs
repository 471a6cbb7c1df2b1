//! Guarded command programs executed indivisibly by the store.
//!
//! A program is the typed equivalent of a server-side script: a list of
//! guards checked first, then a list of mutations applied only if every
//! guard holds. The store executes the whole program under its own
//! serialized execution, so concurrent programs over overlapping keys are
//! totally ordered and a failed guard leaves the store untouched.

use std::time::Duration;

/// A precondition evaluated before any mutation of the program runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomicGuard {
    /// The hash field must be absent, or already hold exactly `owner`.
    ///
    /// This is the uniqueness-marker check: a marker is free, or it is
    /// ours from a previous write of the same entity.
    FieldFreeOrOwned {
        /// Hash key holding the markers.
        key: String,
        /// Marker field.
        field: String,
        /// Value this program is allowed to find in the field.
        owner: String,
    },
}

/// A single mutation inside a program.
#[derive(Debug, Clone, PartialEq)]
pub enum AtomicOp {
    /// Set a scalar key.
    Set {
        /// Scalar key.
        key: String,
        /// New value.
        value: String,
    },
    /// Delete a key of any type.
    Del {
        /// Key to remove.
        key: String,
    },
    /// Set a time-to-live on a key.
    Expire {
        /// Key to expire.
        key: String,
        /// Time until expiry.
        ttl: Duration,
    },
    /// Set a hash field.
    HSet {
        /// Hash key.
        key: String,
        /// Field name.
        field: String,
        /// Field value.
        value: String,
    },
    /// Delete hash fields.
    HDel {
        /// Hash key.
        key: String,
        /// Fields to remove.
        fields: Vec<String>,
    },
    /// Add members to an unordered set.
    SAdd {
        /// Set key.
        key: String,
        /// Members to add.
        members: Vec<String>,
    },
    /// Remove members from an unordered set.
    SRem {
        /// Set key.
        key: String,
        /// Members to remove.
        members: Vec<String>,
    },
    /// Add or update a member of an ordered set.
    ZAdd {
        /// Ordered-set key.
        key: String,
        /// Member to add.
        member: String,
        /// Score to file it under.
        score: f64,
    },
    /// Remove members from an ordered set.
    ZRem {
        /// Ordered-set key.
        key: String,
        /// Members to remove.
        members: Vec<String>,
    },
}

impl AtomicOp {
    /// The key this operation mutates.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. }
            | Self::Del { key }
            | Self::Expire { key, .. }
            | Self::HSet { key, .. }
            | Self::HDel { key, .. }
            | Self::SAdd { key, .. }
            | Self::SRem { key, .. }
            | Self::ZAdd { key, .. }
            | Self::ZRem { key, .. } => key,
        }
    }
}

/// Outcome of running a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomicOutcome {
    /// Every guard held and every operation was applied.
    Applied,
    /// A guard failed; nothing was applied.
    GuardFailed {
        /// Index of the failed guard within the program.
        index: usize,
        /// Hash key of the failed guard.
        key: String,
        /// Field of the failed guard.
        field: String,
        /// Value the field actually held.
        holder: String,
    },
}

impl AtomicOutcome {
    /// Whether the program was applied in full.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// A guarded batch of store mutations, executed indivisibly.
#[derive(Debug, Clone, Default)]
pub struct AtomicProgram {
    guards: Vec<AtomicGuard>,
    ops: Vec<AtomicOp>,
}

impl AtomicProgram {
    /// Creates an empty program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a guard, evaluated before any operation runs.
    pub fn guard(&mut self, guard: AtomicGuard) -> &mut Self {
        self.guards.push(guard);
        self
    }

    /// Appends an operation.
    pub fn push(&mut self, op: AtomicOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    /// The program's guards, in evaluation order.
    #[must_use]
    pub fn guards(&self) -> &[AtomicGuard] {
        &self.guards
    }

    /// The program's operations, in application order.
    #[must_use]
    pub fn ops(&self) -> &[AtomicOp] {
        &self.ops
    }

    /// Whether the program carries neither guards nor operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty() && self.ops.is_empty()
    }
}
