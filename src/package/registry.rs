// src/package/registry.rs

//! Package configuration registry and classifier
//!
//! The registry is an immutable snapshot built from every package definition
//! with building enabled. It is never patched: any change to a package
//! definition rebuilds a complete replacement, which is then published with
//! a single atomic swap. Readers keep whichever snapshot they loaded.

use super::{PackageDefinition, PackageRef};
use crate::condition::Condition;
use crate::config::Config;
use crate::db::models::Record;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::store::triggers::{MutationKind, MutationObserver};
use arc_swap::ArcSwap;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Membership rule for one class
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// Applies to every record of the class
    Always,
    /// Applies to records matching the condition
    When(Condition),
}

impl Rule {
    fn applies_to(&self, object: &Value) -> bool {
        match self {
            Rule::Always => true,
            Rule::When(condition) => condition.matches(object),
        }
    }
}

/// Build and sync configuration of one package
#[derive(Debug, Clone, PartialEq)]
pub struct PackageConfig {
    pub key: String,
    pub id: String,
    pub enable_filesystem_sync: bool,
    pub fs_path: Option<PathBuf>,
    /// `None` when the package declares no include list at all
    pub include: Option<HashMap<String, Rule>>,
    pub exclude: HashMap<String, Rule>,
}

impl PackageConfig {
    /// Normalize a definition into lookup tables
    ///
    /// A malformed include or exclude list leaves the package with no rules
    /// at all; the problem is reported and the config is still built.
    pub fn from_definition(definition: &PackageDefinition, config: &Config) -> Self {
        let key = &definition.key;
        let fs_entry = config.fs_sync_for(key);
        let enable_filesystem_sync = definition.filesystem_sync || fs_entry.is_some();

        let fs_path = if enable_filesystem_sync {
            Some(
                fs_entry
                    .and_then(|e| e.path.clone())
                    .or_else(|| definition.fs_path.clone())
                    .unwrap_or_else(|| config.default_fs_path(key)),
            )
        } else {
            definition.fs_path.clone()
        };

        let include = definition
            .include
            .as_ref()
            .filter(|v| !v.is_null())
            .map(|v| parse_rules(key, "include", v))
            .transpose();
        let exclude = definition
            .exclude
            .as_ref()
            .filter(|v| !v.is_null())
            .map(|v| parse_rules(key, "exclude", v))
            .transpose();

        let (include, exclude) = match (include, exclude) {
            (Ok(include), Ok(exclude)) => (include, exclude.unwrap_or_default()),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Package {} has malformed class rules, ignoring them: {}", key, e);
                (None, HashMap::new())
            }
        };

        Self {
            key: key.clone(),
            id: definition.id.clone(),
            enable_filesystem_sync,
            fs_path,
            include,
            exclude,
        }
    }

    pub fn reference(&self) -> PackageRef {
        PackageRef {
            key: self.key.clone(),
            id: self.id.clone(),
        }
    }

    /// Mirror directory, if filesystem sync is enabled
    pub fn mirror_path(&self) -> Option<&Path> {
        if self.enable_filesystem_sync {
            self.fs_path.as_deref()
        } else {
            None
        }
    }

    /// Whether a record of `class` with plain form `object` belongs here
    pub fn accepts(&self, class: &str, object: &Value) -> bool {
        if let Some(rule) = self.exclude.get(class) {
            if rule.applies_to(object) {
                return false;
            }
        }

        match &self.include {
            Some(include) => include.get(class).is_some_and(|rule| rule.applies_to(object)),
            None => true,
        }
    }
}

/// Parse an include/exclude list into per-class rules
///
/// Entries are a class name or `{"class_name": ..., "condition": {...}}`.
/// A value that is not a list is an error; bad entries are skipped.
fn parse_rules(key: &str, field: &str, raw: &Value) -> Result<HashMap<String, Rule>> {
    let Value::Array(entries) = raw else {
        return Err(Error::InvalidRecord(format!("{} of {} is not a list", field, key)));
    };

    let mut rules = HashMap::new();
    for entry in entries {
        match parse_rule(entry) {
            Ok((class, rule)) => {
                rules.insert(class, rule);
            }
            Err(e) => warn!("Skipping {} entry of package {}: {}", field, key, e),
        }
    }
    Ok(rules)
}

fn parse_rule(entry: &Value) -> Result<(String, Rule)> {
    match entry {
        Value::String(class) => Ok((class.clone(), Rule::Always)),
        Value::Object(map) => {
            let class = map
                .get("class_name")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidRecord(format!("entry {} has no class_name", entry)))?;
            let rule = match map.get("condition") {
                None | Some(Value::Null) => Rule::Always,
                Some(cond) => Rule::When(Condition::parse(cond)?),
            };
            Ok((class.to_string(), rule))
        }
        other => Err(Error::InvalidRecord(format!("unsupported entry {}", other))),
    }
}

/// Immutable snapshot of all configured packages
#[derive(Debug, Default)]
pub struct PackageRegistry {
    packages: Vec<Arc<PackageConfig>>,
    by_key: HashMap<String, Arc<PackageConfig>>,
    ids_by_key: HashMap<String, String>,
}

impl PackageRegistry {
    /// Build a registry from package definitions, preserving their order
    pub fn build(definitions: &[PackageDefinition], config: &Config) -> Self {
        let mut registry = Self::default();

        for definition in definitions {
            registry
                .ids_by_key
                .insert(definition.key.clone(), definition.id.clone());

            let enabled = definition.build
                || definition.filesystem_sync
                || config.fs_sync_for(&definition.key).is_some();
            if !enabled {
                debug!("Package {} is not built, skipping", definition.key);
                continue;
            }

            let package = Arc::new(PackageConfig::from_definition(definition, config));
            registry
                .by_key
                .insert(package.key.clone(), Arc::clone(&package));
            registry.packages.push(package);
        }

        registry
    }

    /// Package a record belongs to: the first configured package, in
    /// registry order, that accepts it
    pub fn classify(&self, record: &Record) -> Option<Arc<PackageConfig>> {
        let object = record.to_plain_object();
        self.packages
            .iter()
            .find(|p| p.accepts(&record.class, &object))
            .cloned()
    }

    pub fn get(&self, key: &str) -> Option<Arc<PackageConfig>> {
        self.by_key.get(key).cloned()
    }

    /// Reference to any defined package, built or not
    pub fn reference_for(&self, key: &str) -> Option<PackageRef> {
        self.ids_by_key.get(key).map(|id| PackageRef {
            key: key.to_string(),
            id: id.clone(),
        })
    }

    pub fn packages(&self) -> &[Arc<PackageConfig>] {
        &self.packages
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// Process-wide handle publishing the current registry snapshot
pub struct RegistryHandle {
    current: ArcSwap<PackageRegistry>,
    config: Arc<Config>,
}

impl RegistryHandle {
    /// Handle holding an empty registry until the first rebuild
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            current: ArcSwap::from_pointee(PackageRegistry::default()),
            config,
        }
    }

    /// Current snapshot
    pub fn load(&self) -> Arc<PackageRegistry> {
        self.current.load_full()
    }

    /// Rebuild from the stored definitions and publish the result
    pub fn rebuild(&self, store: &Store) -> Result<()> {
        let definitions = PackageDefinition::list(store)?;
        let registry = PackageRegistry::build(&definitions, &self.config);
        info!(
            "Package registry rebuilt: {} of {} packages configured",
            registry.len(),
            definitions.len()
        );
        self.current.store(Arc::new(registry));
        Ok(())
    }
}

impl MutationObserver for RegistryHandle {
    fn on_mutation(&self, store: &Store, kind: MutationKind, record: &mut Record) -> Result<()> {
        debug!("Package {} {}d, rebuilding registry", record.id, kind.as_str());
        self.rebuild(store)
    }
}
