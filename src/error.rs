// src/error.rs

use thiserror::Error;

/// Core error types for Recpack
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Target class of an import is not known locally
    #[error("Class '{0}' is not defined")]
    MissingClass(String),

    /// No package definition exists for the given key
    #[error("Package '{0}' not found")]
    PackageNotFound(String),

    /// Package definition has nothing to install from
    #[error("Package '{0}' has no attached source")]
    NoPackageSource(String),

    /// Record cannot be stored or decoded
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Version identifier could not be parsed
    #[error("Invalid version identifier: {0}")]
    InvalidVersion(String),

    /// Include/exclude condition could not be parsed
    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    /// Log record cannot be reverted
    #[error("Rollback failed: {0}")]
    Rollback(String),
}

/// Result type alias using Recpack's Error type
pub type Result<T> = std::result::Result<T, Error>;
