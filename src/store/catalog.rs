// src/store/catalog.rs

//! Class catalog
//!
//! Classes are defined by records of the schema class `ObjectClass`, whose
//! ID is the class name. The catalog is an in-memory cache of those
//! definitions, reloaded whenever a schema record is written or deleted.

use crate::db::models::Record;
use crate::error::{Error, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Class of the append-only update log
pub const UPDATE_LOG_CLASS: &str = "UpdateLog";
/// Class of package definition records
pub const PACKAGE_CLASS: &str = "Package";
/// Class of import conflict records
pub const CONFLICT_CLASS: &str = "PackageConflict";
/// Schema class: records defining other classes
pub const SCHEMA_CLASS: &str = "ObjectClass";

/// Bookkeeping classes that are never logged or packaged
pub const BOOKKEEPING_CLASSES: [&str; 3] = [UPDATE_LOG_CLASS, PACKAGE_CLASS, CONFLICT_CLASS];

pub fn is_bookkeeping(class: &str) -> bool {
    BOOKKEEPING_CLASSES.contains(&class)
}

/// Fallback fields used as a display label, in order
const LABEL_FIELDS: [&str; 3] = ["name", "title", "label"];

/// Storage kind of a class field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Json,
    /// Executable source, stored as `{"$fn": "<source>"}` or a plain string
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

/// Definition of a record class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectClass {
    #[serde(default, skip_serializing)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_field: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl ObjectClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_field: None,
            fields: Vec::new(),
        }
    }

    /// Decode a schema record
    pub fn from_record(record: &Record) -> Result<Self> {
        if record.class != SCHEMA_CLASS {
            return Err(Error::InvalidRecord(format!(
                "{} {} is not a class definition",
                record.class, record.id
            )));
        }
        let mut class: ObjectClass = record
            .to_typed()
            .map_err(|e| Error::InvalidRecord(format!("class {}: {}", record.id, e)))?;
        class.name = record.id.clone();
        Ok(class)
    }

    /// Encode as a schema record
    pub fn to_record(&self) -> Result<Record> {
        Record::from_typed(SCHEMA_CLASS, &self.name, self)
    }

    /// Names of fields holding executable source
    pub fn function_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.kind == FieldKind::Function)
            .map(|f| f.name.clone())
            .collect()
    }
}

/// In-memory cache of class definitions
#[derive(Debug, Default)]
pub struct ClassCatalog {
    classes: HashMap<String, ObjectClass>,
}

impl ClassCatalog {
    /// Load every class definition from the database
    ///
    /// A schema record that fails to decode is skipped with a debug message
    /// so one bad definition cannot hide the others.
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut classes = HashMap::new();
        for record in Record::list_by_class(conn, SCHEMA_CLASS)? {
            match ObjectClass::from_record(&record) {
                Ok(class) => {
                    classes.insert(class.name.clone(), class);
                }
                Err(e) => debug!("Skipping class definition {}: {}", record.id, e),
            }
        }
        debug!("Loaded {} class definitions", classes.len());
        Ok(Self { classes })
    }

    /// Whether records of `class` can be stored
    pub fn contains(&self, class: &str) -> bool {
        class == SCHEMA_CLASS || is_bookkeeping(class) || self.classes.contains_key(class)
    }

    pub fn get(&self, class: &str) -> Option<&ObjectClass> {
        self.classes.get(class)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Human-readable label of a record
    pub fn display_label(&self, record: &Record) -> String {
        let configured = self
            .get(&record.class)
            .and_then(|c| c.display_field.as_deref());

        configured
            .into_iter()
            .chain(LABEL_FIELDS)
            .find_map(|field| match record.field(field) {
                Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(serde_json::Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| record.id.clone())
    }

    /// Fields of `class` declared as executable
    pub fn function_fields(&self, class: &str) -> Vec<String> {
        self.get(class)
            .map(ObjectClass::function_fields)
            .unwrap_or_default()
    }
}
