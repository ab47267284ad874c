// src/import.rs

//! Import reconciliation
//!
//! Brings an incoming object, usually read from a package, into the live
//! store. The incoming version marker is compared with the stored one:
//!
//! - same version: nothing to do (class definitions are always reinstalled)
//! - incoming descends from the stored version: the record is refreshed
//! - anything else: a `PackageConflict` is recorded and the record is left
//!   untouched
//!
//! Conflicts never abort a batch; they are kept for later resolution.

use crate::db::models::{ID_KEY, Record, VER_KEY};
use crate::diff;
use crate::error::{Error, Result};
use crate::package::PackageRef;
use crate::store::catalog::{CONFLICT_CLASS, SCHEMA_CLASS};
use crate::store::{SaveOptions, Store};
use crate::version::{Relationship, VersionId};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use tracing::{debug, info, warn};

/// Why an incoming object could not be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictType {
    /// The object's class is not defined locally
    #[serde(rename = "missing class")]
    MissingClass,
    /// Local and incoming versions sit on different branches
    #[serde(rename = "divergent")]
    Divergent,
    /// The local copy has moved past the incoming version
    #[serde(rename = "independent update")]
    IndependentUpdate,
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictType::MissingClass => "missing class",
            ConflictType::Divergent => "divergent",
            ConflictType::IndependentUpdate => "independent update",
        };
        write!(f, "{}", name)
    }
}

/// A durable record of an import that could not be reconciled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageConflict {
    #[serde(skip)]
    pub id: String,
    pub package_ref: PackageRef,
    pub conflict_type: ConflictType,
    pub object_class: String,
    pub object_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_version_id: Option<VersionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_version_id: Option<VersionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_object: Option<Value>,
    /// Incoming object as it would have been written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_object: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<Value>,
    pub created_at: String,
}

impl PackageConflict {
    pub fn new(
        package_ref: &PackageRef,
        conflict_type: ConflictType,
        object_class: &str,
        object_id: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            package_ref: package_ref.clone(),
            conflict_type,
            object_class: object_class.to_string(),
            object_id: object_id.to_string(),
            installed_version_id: None,
            package_version_id: None,
            installed_object: None,
            merged_object: None,
            diff: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        let mut conflict: PackageConflict = record
            .to_typed()
            .map_err(|e| Error::InvalidRecord(format!("conflict {}: {}", record.id, e)))?;
        conflict.id = record.id.clone();
        Ok(conflict)
    }

    pub fn to_record(&self) -> Result<Record> {
        Record::from_typed(CONFLICT_CLASS, &self.id, self)
    }

    /// Persist without dispatching triggers
    pub fn save(&self, store: &Store) -> Result<()> {
        let mut record = self.to_record()?;
        store.save(&mut record, SaveOptions::quiet())?;
        warn!(
            "Conflict ({}) importing {} {} from package {}",
            self.conflict_type, self.object_class, self.object_id, self.package_ref
        );
        Ok(())
    }

    /// Recorded conflicts, optionally limited to one package key
    pub fn list(store: &Store, package_key: Option<&str>) -> Result<Vec<Self>> {
        let condition = package_key
            .map(|key| crate::condition::Condition::parse(&json!({ "package_ref.key": key })))
            .transpose()?;
        store
            .find(CONFLICT_CLASS, condition.as_ref())?
            .iter()
            .map(Self::from_record)
            .collect()
    }
}

/// Result of importing one object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Created,
    Updated,
    /// Already at the incoming version
    Unchanged,
    /// A class definition was (re)installed
    SchemaInstalled,
    Conflict(ConflictType),
}

/// Counts of outcomes over a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub schema_installed: usize,
    pub conflicts: usize,
}

impl ImportReport {
    fn add(&mut self, outcome: ImportOutcome) {
        match outcome {
            ImportOutcome::Created => self.created += 1,
            ImportOutcome::Updated => self.updated += 1,
            ImportOutcome::Unchanged => self.unchanged += 1,
            ImportOutcome::SchemaInstalled => self.schema_installed += 1,
            ImportOutcome::Conflict(_) => self.conflicts += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged + self.schema_installed + self.conflicts
    }
}

fn object_id(obj: &Value) -> String {
    match obj.get(ID_KEY) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn patch_value(from: &Value, to: &Value) -> Result<Option<Value>> {
    Ok(diff::diff(from, to).map(serde_json::to_value).transpose()?)
}

/// Import one plain object of `class`
///
/// Without a package reference an unknown class is an error and versions
/// are not compared. If either side carries no version the object is
/// applied.
pub fn import_object(
    store: &Store,
    class: &str,
    obj: &Value,
    package_ref: Option<&PackageRef>,
) -> Result<ImportOutcome> {
    if !store.class_exists(class) {
        let Some(package_ref) = package_ref else {
            return Err(Error::MissingClass(class.to_string()));
        };

        let mut conflict =
            PackageConflict::new(package_ref, ConflictType::MissingClass, class, &object_id(obj));
        conflict.package_version_id = obj
            .get(VER_KEY)
            .and_then(Value::as_str)
            .and_then(|v| v.parse().ok());
        conflict.merged_object = Some(obj.clone());
        conflict.save(store)?;
        return Ok(ImportOutcome::Conflict(ConflictType::MissingClass));
    }

    let incoming = Record::from_plain(class, obj)?;
    let local = store.find_one(class, &incoming.id)?;

    if let (Some(package_ref), Some(local)) = (package_ref, &local) {
        match (&incoming.ver, &local.ver) {
            (Some(incoming_ver), Some(local_ver)) => {
                let conflict_type = match incoming_ver.relationship_to(local_ver) {
                    Relationship::Same if class == SCHEMA_CLASS => {
                        debug!(
                            "Reinstalling class {} at unchanged version {}",
                            incoming.id, incoming_ver
                        );
                        None
                    }
                    Relationship::Same => {
                        debug!(
                            "{} {} already at version {}, not importing from {}",
                            class, incoming.id, incoming_ver, package_ref
                        );
                        return Ok(ImportOutcome::Unchanged);
                    }
                    Relationship::Descendant => None,
                    Relationship::Cousin => Some(ConflictType::Divergent),
                    Relationship::Ancestor => Some(ConflictType::IndependentUpdate),
                };

                if let Some(conflict_type) = conflict_type {
                    let installed = local.to_plain_object();
                    let mut conflict =
                        PackageConflict::new(package_ref, conflict_type, class, &incoming.id);
                    conflict.installed_version_id = Some(local_ver.clone());
                    conflict.package_version_id = Some(incoming_ver.clone());
                    if conflict_type == ConflictType::Divergent {
                        conflict.diff = patch_value(&installed, obj)?;
                        conflict.installed_object = Some(installed);
                        conflict.merged_object = Some(obj.clone());
                    } else {
                        conflict.diff = patch_value(obj, &installed)?;
                    }
                    conflict.save(store)?;
                    return Ok(ImportOutcome::Conflict(conflict_type));
                }
            }
            _ => debug!(
                "{} {} has no comparable version, importing from {}",
                class, incoming.id, package_ref
            ),
        }
    }

    apply(store, incoming, local, package_ref)
}

fn apply(
    store: &Store,
    incoming: Record,
    local: Option<Record>,
    package_ref: Option<&PackageRef>,
) -> Result<ImportOutcome> {
    let owner = local
        .as_ref()
        .and_then(|l| l.pkg.clone())
        .or_else(|| incoming.pkg.clone())
        .or_else(|| package_ref.map(|p| p.key.clone()));
    let version = incoming.ver.clone();

    if incoming.class == SCHEMA_CLASS {
        let mut record = incoming;
        record.pkg = owner;
        store.install_class(&mut record, version)?;
        return Ok(ImportOutcome::SchemaInstalled);
    }

    let (mut record, outcome) = match local {
        Some(mut existing) => {
            existing.data.extend(incoming.data);
            (existing, ImportOutcome::Updated)
        }
        None => {
            let mut record = incoming;
            record.ver = None;
            (record, ImportOutcome::Created)
        }
    };
    record.pkg = owner;
    store.save(&mut record, SaveOptions::installed(version))?;

    info!(
        "Imported {} {} at version {}",
        record.class,
        record.id,
        record.ver.as_ref().map(|v| v.to_string()).unwrap_or_default()
    );
    Ok(outcome)
}

/// Import objects one after another
///
/// Conflicts are recorded and counted; the first hard error stops the batch.
pub fn import_batch(
    store: &Store,
    objects: &[(String, Value)],
    package_ref: Option<&PackageRef>,
) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    for (class, obj) in objects {
        report.add(import_object(store, class, obj, package_ref)?);
    }
    info!(
        "Imported {} objects: {} created, {} updated, {} unchanged, {} classes, {} conflicts",
        report.total(),
        report.created,
        report.updated,
        report.unchanged,
        report.schema_installed,
        report.conflicts
    );
    Ok(report)
}
