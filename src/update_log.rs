// src/update_log.rs

//! Update logging and rollback
//!
//! Every persisted mutation of a non-bookkeeping record produces one
//! append-only `UpdateLog` record. Updates carry a patch that takes the
//! current object back to its previous state; deletes carry the full
//! previous snapshot. The logger is also where mutations are classified
//! into packages, owner tags are claimed and package mirrors are kept in
//! step with the store.

use crate::condition::Condition;
use crate::config::Config;
use crate::db::models::{Record, VER_KEY};
use crate::diff::{self, FUNCTION_KEY, Patch};
use crate::error::{Error, Result};
use crate::mirror;
use crate::package::{PackageRef, RegistryHandle};
use crate::store::catalog::{UPDATE_LOG_CLASS, is_bookkeeping};
use crate::store::triggers::{MutationKind, MutationObserver};
use crate::store::{SaveOptions, Store};
use crate::version::VersionId;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Type of a logged mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Create,
    Update,
    Delete,
}

impl From<MutationKind> for UpdateType {
    fn from(kind: MutationKind) -> Self {
        match kind {
            MutationKind::Create => UpdateType::Create,
            MutationKind::Update => UpdateType::Update,
            MutationKind::Delete => UpdateType::Delete,
        }
    }
}

impl UpdateType {
    pub fn as_str(&self) -> &str {
        match self {
            UpdateType::Create => "create",
            UpdateType::Update => "update",
            UpdateType::Delete => "delete",
        }
    }
}

/// One entry of the update log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateLogRecord {
    #[serde(skip)]
    pub id: String,
    pub timestamp: String,
    pub object_class: String,
    pub object_id: String,
    pub update_type: UpdateType,
    pub object_disp: String,
    /// Version of the object before the mutation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_version: Option<VersionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revert_patch: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_ref: Option<PackageRef>,
    #[serde(default)]
    pub external_pkg: bool,
}

impl UpdateLogRecord {
    pub fn new(update_type: UpdateType, record: &Record, object_disp: String) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            object_class: record.class.clone(),
            object_id: record.id.clone(),
            update_type,
            object_disp,
            updated_version: None,
            revert_patch: None,
            package_ref: None,
            external_pkg: false,
        }
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        let mut entry: UpdateLogRecord = record
            .to_typed()
            .map_err(|e| Error::InvalidRecord(format!("log record {}: {}", record.id, e)))?;
        entry.id = record.id.clone();
        Ok(entry)
    }

    pub fn to_record(&self) -> Result<Record> {
        Record::from_typed(UPDATE_LOG_CLASS, &self.id, self)
    }

    /// Persist without dispatching triggers, returning the stored record
    pub fn save(&self, store: &Store) -> Result<Record> {
        let mut record = self.to_record()?;
        store.save(&mut record, SaveOptions::quiet())?;
        Ok(record)
    }

    pub fn find(store: &Store, id: &str) -> Result<Option<Self>> {
        store
            .find_one(UPDATE_LOG_CLASS, id)?
            .map(|r| Self::from_record(&r))
            .transpose()
    }

    /// Log records in write order, optionally limited to one class or object
    pub fn list(store: &Store, class: Option<&str>, object_id: Option<&str>) -> Result<Vec<Self>> {
        let mut filter = serde_json::Map::new();
        if let Some(class) = class {
            filter.insert("object_class".to_string(), json!(class));
        }
        if let Some(id) = object_id {
            filter.insert("object_id".to_string(), json!(id));
        }
        let condition = Condition::parse(&Value::Object(filter))?;

        store
            .find(UPDATE_LOG_CLASS, Some(&condition))?
            .iter()
            .map(Self::from_record)
            .collect()
    }
}

/// Mutation observer writing the update log
pub struct UpdateLogger {
    registry: Arc<RegistryHandle>,
    config: Arc<Config>,
}

impl UpdateLogger {
    pub fn new(registry: Arc<RegistryHandle>, config: Arc<Config>) -> Self {
        Self { registry, config }
    }

    /// Log one mutation; returns the persisted entry, or `None` for
    /// bookkeeping classes
    pub fn log(
        &self,
        store: &Store,
        kind: MutationKind,
        record: &mut Record,
    ) -> Result<Option<UpdateLogRecord>> {
        if is_bookkeeping(&record.class) {
            return Ok(None);
        }

        let object_disp = store.catalog().display_label(record);
        let mut entry = UpdateLogRecord::new(kind.into(), record, object_disp);

        if kind != MutationKind::Create {
            if let Some(previous) = &record.previous {
                entry.updated_version = previous
                    .get(VER_KEY)
                    .and_then(Value::as_str)
                    .and_then(|v| v.parse().ok());

                if self.config.history {
                    entry.revert_patch = match kind {
                        MutationKind::Delete => Some(previous.clone()),
                        _ => {
                            let function_fields = store.catalog().function_fields(&record.class);
                            let current = diff::normalize_executable(
                                &record.to_plain_object(),
                                &function_fields,
                            );
                            let previous = diff::normalize_executable(previous, &function_fields);
                            diff::diff(&current, &previous)
                                .map(|patch| serde_json::to_value(patch))
                                .transpose()?
                        }
                    };
                }
            }
        }

        let mut mirror_dir = None;
        if self.config.packaging {
            let registry = self.registry.load();
            match registry.classify(record) {
                Some(package) => {
                    entry.external_pkg =
                        record.pkg.as_ref().is_some_and(|owner| *owner != package.key);
                    if kind != MutationKind::Delete {
                        store.claim_owner(record, &package.key)?;
                    }
                    entry.package_ref = Some(package.reference());
                    mirror_dir = package.mirror_path().map(Path::to_path_buf);
                }
                None => {
                    if let Some(owner) = &record.pkg {
                        match registry.reference_for(owner) {
                            Some(reference) => entry.package_ref = Some(reference),
                            None => warn!(
                                "{} {} is owned by unknown package {}, logging without a package",
                                record.class, record.id, owner
                            ),
                        }
                    }
                }
            }
        }

        let stored = entry.save(store)?;
        debug!(
            "Logged {} of {} {} as {}",
            kind.as_str(),
            record.class,
            record.id,
            entry.id
        );

        // Mirror writes only once the log record is durable
        if let Some(dir) = mirror_dir {
            mirror::remove_object_from_package_dir(&dir, record)?;
            if kind != MutationKind::Delete {
                mirror::write_object_to_package_dir(&dir, record)?;
            }
            if kind != MutationKind::Update || self.config.history {
                mirror::write_object_to_package_dir(&dir, &stored)?;
            }
        }

        Ok(Some(entry))
    }
}

impl MutationObserver for UpdateLogger {
    fn on_mutation(&self, store: &Store, kind: MutationKind, record: &mut Record) -> Result<()> {
        self.log(store, kind, record).map(|_| ())
    }
}

/// Undo the mutation described by a log record
///
/// Creates are undone by deleting the object, updates by applying the
/// revert patch to the current object, deletes by recreating the previous
/// snapshot. The restoring write goes through the normal save path, so it
/// is logged like any other mutation. Returns the affected record.
pub fn revert(store: &Store, log_id: &str) -> Result<Record> {
    let entry = UpdateLogRecord::find(store, log_id)?
        .ok_or_else(|| Error::Rollback(format!("no log record {}", log_id)))?;
    let class = entry.object_class.as_str();
    let id = entry.object_id.as_str();

    let record = match entry.update_type {
        UpdateType::Create => {
            let mut current = store
                .find_one(class, id)?
                .ok_or_else(|| Error::Rollback(format!("{} {} no longer exists", class, id)))?;
            store.delete(&mut current, SaveOptions::default())?;
            current
        }
        UpdateType::Update => {
            let patch: Patch = match &entry.revert_patch {
                Some(value) => serde_json::from_value(value.clone())?,
                None => {
                    return Err(Error::Rollback(format!(
                        "log record {} carries no revert patch",
                        log_id
                    )));
                }
            };
            let current = store
                .find_one(class, id)?
                .ok_or_else(|| Error::Rollback(format!("{} {} no longer exists", class, id)))?;

            let mut function_fields = store.catalog().function_fields(class);
            function_fields.extend(
                current
                    .data
                    .iter()
                    .filter(|(_, v)| is_function_value(v))
                    .map(|(k, _)| k.clone()),
            );

            let normalized =
                diff::normalize_executable(&current.to_plain_object(), &function_fields);
            let restored =
                rewrap_functions(diff::apply_patch(&normalized, &patch), &function_fields);

            let mut record = Record::from_plain(class, &restored)?;
            store.save(&mut record, SaveOptions::default())?;
            record
        }
        UpdateType::Delete => {
            let snapshot = entry.revert_patch.as_ref().ok_or_else(|| {
                Error::Rollback(format!("log record {} carries no snapshot", log_id))
            })?;
            if store.find_one(class, id)?.is_some() {
                return Err(Error::Rollback(format!("{} {} exists again", class, id)));
            }
            let mut record = Record::from_plain(class, snapshot)?;
            store.save(&mut record, SaveOptions::default())?;
            record
        }
    };

    info!(
        "Reverted {} of {} {} (log {})",
        entry.update_type.as_str(),
        class,
        id,
        log_id
    );
    Ok(record)
}

fn is_function_value(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.len() == 1 && map.get(FUNCTION_KEY).is_some_and(Value::is_string),
        _ => false,
    }
}

/// Turn normalized source strings back into `{"$fn": ...}` values
fn rewrap_functions(mut value: Value, function_fields: &[String]) -> Value {
    let fields: BTreeSet<&String> = function_fields.iter().collect();
    if let Value::Object(map) = &mut value {
        for (key, v) in map.iter_mut() {
            if fields.contains(key) {
                if let Value::String(source) = v {
                    *v = json!({ FUNCTION_KEY: source });
                }
            }
        }
    }
    value
}
