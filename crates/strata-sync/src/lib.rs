//! strata-sync: runs source modules against the Strata graph.
//!
//! Each run mints one tag, loads every scope's observations under it, and
//! then retires what each fully observed scope no longer reports.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod scheduler;
pub mod source;
