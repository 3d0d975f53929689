//! Error types for the strata-sync crate.

use thiserror::Error;

use crate::orchestrator::ScopeState;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Schema error: {0}")]
    Schema(#[from] strata_core::SchemaError),

    #[error(transparent)]
    Strata(#[from] strata_core::StrataError),

    #[error("Store error: {0}")]
    Store(#[from] strata_core::StoreError),

    #[error("Illegal scope transition {from} -> {to}")]
    InvalidTransition { from: ScopeState, to: ScopeState },
}

pub type Result<T> = std::result::Result<T, SyncError>;
