//! Strata Graph: the single mutation point for the reconciled graph.
//!
//! Everything that touches the store goes through a [`GraphSession`]. The
//! [`BatchLoader`] upserts records stamped with a run tag; the
//! [`CleanupEngine`] retires what a scope did not see in that run. Both are
//! written against the trait, so they run unchanged on Neo4j
//! ([`GraphClient`]) and in memory ([`MemoryGraph`]).

pub mod cleanup;
pub mod client;
pub mod cypher;
pub mod load;
pub mod memory;
pub mod queries;
pub mod retry;
pub mod session;

pub use cleanup::CleanupEngine;
pub use client::{GraphClient, GraphConfig, GraphError};
pub use load::BatchLoader;
pub use memory::MemoryGraph;
pub use retry::{with_retry, Exhausted};
pub use session::{GraphSession, Reach, Row, Statement};
