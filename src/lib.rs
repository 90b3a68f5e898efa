//! LINESMITH — Market Signal & Settlement Engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod analytics;
pub mod config;
pub mod types;
pub mod storage;
pub mod history;
pub mod ingest;
pub mod signals;
pub mod ledger;
pub mod settlement;
pub mod dashboard;
