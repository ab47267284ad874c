// src/package/ops.rs

//! Package-level operations: install from a source directory, export to a
//! mirror directory

use super::{PackageConfig, PackageDefinition};
use crate::config::Config;
use crate::db::models::Record;
use crate::error::{Error, Result};
use crate::import::{self, ImportReport};
use crate::mirror;
use crate::store::{SaveOptions, Store};
use crate::version::coerce_semver;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Install (or upgrade) a package from its attached source directory
///
/// Every object in the source is reconciled against the store; conflicts
/// are recorded and do not stop the install. The definition's version is
/// updated from the source's meta file afterwards.
pub fn install_package(store: &Store, key: &str) -> Result<ImportReport> {
    let mut definition = PackageDefinition::find_by_key(store, key)?
        .ok_or_else(|| Error::PackageNotFound(key.to_string()))?;
    let source = definition
        .source
        .clone()
        .ok_or_else(|| Error::NoPackageSource(key.to_string()))?;

    let package = mirror::read_package_dir(&source)?;
    let incoming_version = package
        .meta
        .as_ref()
        .and_then(|meta| meta.get("version"))
        .filter(|v| !v.is_null())
        .cloned();

    let installed = definition.version.as_ref().and_then(coerce_semver);
    let offered = incoming_version.as_ref().and_then(coerce_semver);
    match (&installed, &offered) {
        (Some(installed), Some(offered)) if offered < installed => {
            warn!(
                "Package {} source is older ({} < {}), installing anyway",
                key, offered, installed
            )
        }
        (Some(installed), Some(offered)) if offered == installed => {
            info!("Package {} is already at {}, refreshing", key, installed)
        }
        (_, Some(offered)) => info!("Installing package {} version {}", key, offered),
        _ => info!("Installing package {} from {}", key, source.display()),
    }

    let report = import::import_batch(store, &package.objects, Some(&definition.reference()))?;

    if incoming_version.is_some() && incoming_version != definition.version {
        definition.version = incoming_version;
        let mut record = definition.to_record()?;
        store.save(&mut record, SaveOptions::default())?;
    }

    Ok(report)
}

/// Result of an export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub objects: usize,
}

/// Write a package's meta file and every record it owns to a directory
///
/// Without an explicit `dir` the package's mirror path is used, falling
/// back to `<fs_root>/<key>`.
pub fn export_package(
    store: &Store,
    config: &Config,
    key: &str,
    dir: Option<&Path>,
) -> Result<ExportSummary> {
    let definition = PackageDefinition::find_by_key(store, key)?
        .ok_or_else(|| Error::PackageNotFound(key.to_string()))?;

    let path = match dir {
        Some(dir) => dir.to_path_buf(),
        None => PackageConfig::from_definition(&definition, config)
            .fs_path
            .unwrap_or_else(|| config.default_fs_path(key)),
    };

    mirror::write_meta_file(&path, &definition)?;
    let records = Record::list_by_package(store.conn(), key)?;
    for record in &records {
        mirror::write_object_to_package_dir(&path, record)?;
    }

    info!("Exported {} objects of package {} to {}", records.len(), key, path.display());
    Ok(ExportSummary {
        path,
        objects: records.len(),
    })
}
