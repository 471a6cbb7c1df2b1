//! Error types for entimap core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in entimap core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Store backend error.
    #[error("store error: {0}")]
    Store(#[from] entimap_store::StoreError),

    /// JSON encoding or decoding of a stored record failed.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A unique or composite-unique constraint already holds the value.
    #[error(
        "unique constraint violation on {model}.{attribute}: value '{value}' is already taken"
    )]
    UniqueConstraintViolation {
        /// Model whose constraint was violated.
        model: String,
        /// Attribute (or comma-joined attribute tuple) carrying the
        /// constraint.
        attribute: String,
        /// Human-readable form of the colliding value.
        value: String,
    },

    /// A restrict-policy relationship blocked a delete.
    #[error("cannot delete {model}:{pk}: restricted by live referrers through '{relation}'")]
    ReferentialIntegrity {
        /// Model of the entity that could not be deleted.
        model: String,
        /// Primary key of the entity that could not be deleted.
        pk: u64,
        /// Name of the blocking relationship.
        relation: String,
    },

    /// A cascade traversal exceeded the configured depth bound.
    #[error("cascade depth exceeded: chain is deeper than the configured bound of {limit}")]
    CascadeDepthExceeded {
        /// The configured recursion bound.
        limit: u32,
    },

    /// A query was misused, such as executing with neither filters nor
    /// ordering.
    #[error("query usage error: {message}")]
    QueryUsage {
        /// Description of the misuse.
        message: String,
    },

    /// A filter or ordering referenced an attribute with no supporting
    /// index.
    #[error("missing index: {model}.{attribute} has no {wanted} index")]
    MissingIndex {
        /// Model the query targeted.
        model: String,
        /// Attribute the query referenced.
        attribute: String,
        /// The index capability the operation needed.
        wanted: &'static str,
    },

    /// A model or relationship declaration is invalid.
    #[error("schema error: {message}")]
    Schema {
        /// Description of the declaration problem.
        message: String,
    },

    /// A value does not fit the declared attribute kind, or a stored
    /// value failed to parse back under it.
    #[error("invalid value for attribute '{attribute}': {message}")]
    InvalidValue {
        /// The attribute involved.
        attribute: String,
        /// Description of the mismatch.
        message: String,
    },

    /// An attribute name is not declared on the model.
    #[error("unknown attribute '{attribute}' on model '{model}'")]
    UnknownAttribute {
        /// The model that was addressed.
        model: String,
        /// The undeclared attribute name.
        attribute: String,
    },

    /// A model name is not registered.
    #[error("unknown model: {name}")]
    UnknownModel {
        /// The unregistered model name.
        name: String,
    },

    /// An operation addressed an entity that has been deleted.
    #[error("entity {model}:{pk} has been deleted")]
    EntityDeleted {
        /// Model of the deleted entity.
        model: String,
        /// Primary key of the deleted entity.
        pk: u64,
    },

    /// An index structure holds data the engine cannot interpret.
    #[error("corrupt index: {message}")]
    CorruptIndex {
        /// Description of the corruption.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a unique-constraint violation error.
    pub fn unique_violation(
        model: impl Into<String>,
        attribute: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::UniqueConstraintViolation {
            model: model.into(),
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Creates a referential-integrity error.
    pub fn referential_integrity(model: impl Into<String>, pk: u64, relation: impl Into<String>) -> Self {
        Self::ReferentialIntegrity {
            model: model.into(),
            pk,
            relation: relation.into(),
        }
    }

    /// Creates a query usage error.
    pub fn query_usage(message: impl Into<String>) -> Self {
        Self::QueryUsage {
            message: message.into(),
        }
    }

    /// Creates a missing-index error.
    pub fn missing_index(
        model: impl Into<String>,
        attribute: impl Into<String>,
        wanted: &'static str,
    ) -> Self {
        Self::MissingIndex {
            model: model.into(),
            attribute: attribute.into(),
            wanted,
        }
    }

    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates an invalid-value error.
    pub fn invalid_value(attribute: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            attribute: attribute.into(),
            message: message.into(),
        }
    }

    /// Creates an unknown-attribute error.
    pub fn unknown_attribute(model: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::UnknownAttribute {
            model: model.into(),
            attribute: attribute.into(),
        }
    }

    /// Creates an unknown-model error.
    pub fn unknown_model(name: impl Into<String>) -> Self {
        Self::UnknownModel { name: name.into() }
    }

    /// Creates a corrupt-index error.
    pub fn corrupt_index(message: impl Into<String>) -> Self {
        Self::CorruptIndex {
            message: message.into(),
        }
    }

    /// Creates an invalid-operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
