//! strata-core: Shared types, schema registry, and error handling for Strata.
//!
//! This crate provides the foundational types used across all Strata components:
//! - Run tags and scope anchors that parameterize every load and cleanup
//! - Property values and the typed record contract of each schema
//! - The schema registry (labels, keys, scope links, declared relationships)
//! - Load/cleanup result types reported back to the orchestrator
//! - Engine tuning settings and common error types

pub mod config;
pub mod error;
pub mod schema;
pub mod types;

pub use config::{CleanupSettings, LoadSettings, RetryPolicy};
pub use error::{SchemaError, StoreError, StrataError, ValidationError};
pub use schema::{
    Direction, NodeSchema, PropertyKind, PropertySpec, RelSpec, SchemaRegistry, ScopeLink,
    ValidatedRecord,
};
pub use types::{
    BatchFailure, CleanupFailure, CleanupResult, CleanupStage, LoadResult, PropertyValue, Record,
    RecordFailure, RunTag, RunTagMinter, ScopeAnchor,
};
