// src/lib.rs

//! Recpack
//!
//! Versioned packages of business-object records kept in a SQLite document
//! store, with reversible update logs and import conflict detection.
//!
//! # Architecture
//!
//! - Store: records grouped in classes, with typed mutation triggers
//! - Packages: include/exclude rules decide which package owns a record
//! - Update log: every mutation is logged with a patch that reverts it
//! - Imports: incoming versions are reconciled against the lineage tree
//! - Mirrors: package contents are synced to JSON files for source control

pub mod condition;
pub mod config;
pub mod db;
pub mod diff;
mod error;
pub mod import;
pub mod mirror;
pub mod package;
pub mod session;
pub mod store;
pub mod update_log;
pub mod version;

pub use error::{Error, Result};
pub use session::Session;
