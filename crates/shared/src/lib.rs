//! Ledgerhook Shared Types and Utilities
//!
//! This crate contains the ledger entity types and database helpers shared
//! across the Ledgerhook workspace.

pub mod db;
pub mod types;

pub use db::*;
pub use types::*;
