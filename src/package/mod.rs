// src/package/mod.rs

//! Package definitions, configuration registry and package operations
//!
//! A package is a named, versionable grouping of records. Its definition is
//! itself a record of class `Package`; the registry turns the enabled
//! definitions into lookup tables used to classify every mutation.

pub mod ops;
pub mod registry;

pub use registry::{PackageConfig, PackageRegistry, RegistryHandle, Rule};

use crate::db::models::Record;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::store::catalog::PACKAGE_CLASS;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use tracing::warn;

/// Soft reference to a package: its key and definition record ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRef {
    pub key: String,
    pub id: String,
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// A package definition as stored in the `Package` class
///
/// `include` and `exclude` are kept raw so the registry can report
/// malformed rule lists instead of failing to decode the whole definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageDefinition {
    #[serde(skip)]
    pub id: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,
    /// Classify mutations into this package
    #[serde(default)]
    pub build: bool,
    /// Mirror package contents to the filesystem
    #[serde(default)]
    pub filesystem_sync: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_path: Option<PathBuf>,
    /// Directory the package is installed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<Value>,
}

impl PackageDefinition {
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            version: None,
            build: false,
            filesystem_sync: false,
            fs_path: None,
            source: None,
            include: None,
            exclude: None,
        }
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        let mut definition: PackageDefinition = record
            .to_typed()
            .map_err(|e| Error::InvalidRecord(format!("package {}: {}", record.id, e)))?;
        definition.id = record.id.clone();
        Ok(definition)
    }

    pub fn to_record(&self) -> Result<Record> {
        Record::from_typed(PACKAGE_CLASS, &self.id, self)
    }

    pub fn reference(&self) -> PackageRef {
        PackageRef {
            key: self.key.clone(),
            id: self.id.clone(),
        }
    }

    /// All decodable package definitions in store order
    pub fn list(store: &Store) -> Result<Vec<Self>> {
        let mut definitions = Vec::new();
        for record in store.find(PACKAGE_CLASS, None)? {
            match Self::from_record(&record) {
                Ok(definition) => definitions.push(definition),
                Err(e) => warn!("Ignoring unreadable package definition {}: {}", record.id, e),
            }
        }
        Ok(definitions)
    }

    /// Find the definition with the given key
    pub fn find_by_key(store: &Store, key: &str) -> Result<Option<Self>> {
        Ok(Self::list(store)?.into_iter().find(|d| d.key == key))
    }
}
