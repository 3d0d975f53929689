use thiserror::Error;

use crate::schema::PropertyKind;

/// Top-level error type for the Strata platform.
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Source error: {source}")]
    Source {
        source_name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StrataError {
    /// Whether this error means the store cannot be reached at all.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Store(StoreError::Unavailable(_)))
    }
}

/// Errors surfaced by a graph session adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Graph store unavailable: {0}")]
    Unavailable(String),

    #[error("Transient store error: {0}")]
    Transient(String),

    #[error("Store call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Query failed: {0}")]
    Query(String),
}

impl StoreError {
    /// Timeouts, deadlocks and dropped connections are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout { .. })
    }
}

/// A record that does not satisfy its schema's field contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing key property `{property}`")]
    MissingKey { property: String },

    #[error("missing required property `{property}`")]
    MissingRequired { property: String },

    #[error("property `{property}` expected {expected}, found {found}")]
    Coercion {
        property: String,
        expected: PropertyKind,
        found: String,
    },
}

/// An invalid schema declaration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Invalid {kind} identifier: {value:?}")]
    InvalidIdentifier { kind: &'static str, value: String },

    #[error("Schema {label} declares no key property")]
    EmptyKey { label: String },

    #[error("Key property {property} of {label} has unsupported kind {kind}")]
    UnsupportedKeyKind {
        label: String,
        property: String,
        kind: PropertyKind,
    },

    #[error("Property {property} of {label} uses a reserved name")]
    ReservedProperty { label: String, property: String },

    #[error("Property {property} of {label} is declared more than once")]
    DuplicateProperty { label: String, property: String },

    #[error("Label {0} is already registered")]
    DuplicateLabel(String),

    #[error("Schema {label} declares a relationship to unregistered label {target}")]
    UnknownTarget { label: String, target: String },

    #[error("Unknown label: {0}")]
    UnknownLabel(String),

    #[error("Failed to parse schema definitions: {0}")]
    Parse(String),
}
