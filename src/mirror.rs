// src/mirror.rs

//! Filesystem mirror of package contents
//!
//! A package directory holds one pretty-printed JSON file per record plus a
//! `package.json` meta file:
//!
//! ```text
//! <package dir>/
//!   package.json
//!   ObjectClass/Widget.json
//!   Widget/w1.json
//!   UpdateLog/<log id>.json
//! ```
//!
//! The layout is meant to be committed to source control and read back with
//! [`read_package_dir`].

use crate::db::models::Record;
use crate::error::{Error, Result};
use crate::package::PackageDefinition;
use crate::store::catalog::{SCHEMA_CLASS, UPDATE_LOG_CLASS};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the package meta file
pub const META_FILE: &str = "package.json";

/// Records and metadata read back from a package directory
#[derive(Debug, Default)]
pub struct PackageDir {
    pub meta: Option<Value>,
    /// `(class, plain object)` pairs, class definitions first
    pub objects: Vec<(String, Value)>,
}

/// File name used for a record ID
///
/// Bytes outside `[A-Za-z0-9_-]` are percent-encoded, so distinct IDs never
/// share a file and no name can climb out of the class directory.
fn file_name(id: &str) -> String {
    let mut name = String::with_capacity(id.len() + 5);
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-') {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("%{:02X}", byte));
        }
    }
    name.push_str(".json");
    name
}

fn object_path(dir: &Path, record: &Record) -> PathBuf {
    dir.join(&record.class).join(file_name(&record.id))
}

/// Write a record's plain object into the package directory
pub fn write_object_to_package_dir(dir: &Path, record: &Record) -> Result<PathBuf> {
    let path = object_path(dir, record);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(&record.to_plain_object())?;
    fs::write(&path, content + "\n")?;
    debug!("Mirrored {} {} to {}", record.class, record.id, path.display());
    Ok(path)
}

/// Remove a record's file from the package directory if present
pub fn remove_object_from_package_dir(dir: &Path, record: &Record) -> Result<()> {
    let path = object_path(dir, record);
    match fs::remove_file(&path) {
        Ok(()) => {
            debug!("Removed mirror file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Write the package meta file
pub fn write_meta_file(dir: &Path, definition: &PackageDefinition) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(META_FILE);

    let mut meta = serde_json::to_value(definition)?;
    meta["_id"] = Value::String(definition.id.clone());
    // Machine-local settings stay out of the shared tree
    if let Value::Object(map) = &mut meta {
        map.remove("fs_path");
        map.remove("source");
    }

    fs::write(&path, serde_json::to_string_pretty(&meta)? + "\n")?;
    Ok(path)
}

/// Read a package directory back into plain objects
///
/// Class definitions come first so the classes exist before their records
/// are imported; other classes follow in name order, files in name order.
/// Mirrored update log records are history, not content, and are left out.
/// Files that are not valid JSON objects are skipped with a warning.
pub fn read_package_dir(dir: &Path) -> Result<PackageDir> {
    if !dir.is_dir() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("package directory {} does not exist", dir.display()),
        )));
    }

    let mut package = PackageDir::default();

    let meta_path = dir.join(META_FILE);
    if meta_path.is_file() {
        package.meta = Some(serde_json::from_str(&fs::read_to_string(&meta_path)?)?);
    }

    let mut classes: Vec<String> = sorted_entries(dir)?
        .into_iter()
        .filter(|p| p.is_dir())
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
        .filter(|c| c != UPDATE_LOG_CLASS)
        .collect();
    classes.sort_by_key(|c| (c != SCHEMA_CLASS, c.clone()));

    for class in classes {
        for file in sorted_entries(&dir.join(&class))? {
            if file.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let value: Value = match serde_json::from_str(&fs::read_to_string(&file)?) {
                Ok(value @ Value::Object(_)) => value,
                Ok(_) => {
                    warn!("Skipping {}: not a JSON object", file.display());
                    continue;
                }
                Err(e) => {
                    warn!("Skipping {}: {}", file.display(), e);
                    continue;
                }
            };
            package.objects.push((class.clone(), value));
        }
    }

    debug!("Read {} objects from {}", package.objects.len(), dir.display());
    Ok(package)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn widget(id: &str) -> Record {
        let mut record = Record::new("Widget", id);
        record.ver = Some("1.2".parse().unwrap());
        record.set("name", json!("Sprocket"));
        record
    }

    #[test]
    fn test_file_names_are_encoded() {
        assert_eq!(file_name("w1"), "w1.json");
        assert_eq!(file_name("a/b c"), "a%2Fb%20c.json");
        assert_eq!(file_name("../etc"), "%2E%2E%2Fetc.json");
        assert_eq!(file_name(".."), "%2E%2E.json");
        assert_eq!(file_name("50%"), "50%25.json");
        assert_ne!(file_name("a b"), file_name("a_b"));
    }

    #[test]
    fn test_similar_ids_keep_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let spaced = widget("a b");
        let underscored = widget("a_b");
        write_object_to_package_dir(dir.path(), &spaced).unwrap();
        write_object_to_package_dir(dir.path(), &underscored).unwrap();

        let ids = |package: PackageDir| -> Vec<String> {
            package
                .objects
                .iter()
                .map(|(_, v)| v["_id"].as_str().unwrap().to_string())
                .collect()
        };
        let package = read_package_dir(dir.path()).unwrap();
        assert_eq!(ids(package), vec!["a b", "a_b"]);

        remove_object_from_package_dir(dir.path(), &spaced).unwrap();
        let package = read_package_dir(dir.path()).unwrap();
        assert_eq!(ids(package), vec!["a_b"]);
    }

    #[test]
    fn test_write_and_remove_object() {
        let dir = tempfile::tempdir().unwrap();
        let record = widget("w1");

        let path = write_object_to_package_dir(dir.path(), &record).unwrap();
        assert_eq!(path, dir.path().join("Widget/w1.json"));

        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["_id"], json!("w1"));
        assert_eq!(written["__ver"], json!("1.2"));

        remove_object_from_package_dir(dir.path(), &record).unwrap();
        assert!(!path.exists());
        // Removing again is fine
        remove_object_from_package_dir(dir.path(), &record).unwrap();
    }

    #[test]
    fn test_meta_file_omits_local_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut definition = PackageDefinition::new("p1", "core");
        definition.version = Some(json!("1.4.0"));
        definition.source = Some(PathBuf::from("/tmp/src"));

        let path = write_meta_file(dir.path(), &definition).unwrap();
        let meta: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(meta["key"], json!("core"));
        assert_eq!(meta["_id"], json!("p1"));
        assert_eq!(meta["version"], json!("1.4.0"));
        assert!(meta.get("source").is_none());
    }

    #[test]
    fn test_read_package_dir_orders_classes_first() {
        let dir = tempfile::tempdir().unwrap();
        write_object_to_package_dir(dir.path(), &widget("w2")).unwrap();
        write_object_to_package_dir(dir.path(), &widget("w1")).unwrap();

        let mut class = Record::new(SCHEMA_CLASS, "Widget");
        class.set("fields", json!([]));
        write_object_to_package_dir(dir.path(), &class).unwrap();

        let mut log = Record::new(UPDATE_LOG_CLASS, "l1");
        log.set("update_type", json!("create"));
        write_object_to_package_dir(dir.path(), &log).unwrap();

        fs::write(dir.path().join("Widget/broken.json"), "{ nope").unwrap();
        fs::write(dir.path().join("Widget/notes.txt"), "ignored").unwrap();
        write_meta_file(dir.path(), &PackageDefinition::new("p1", "core")).unwrap();

        let package = read_package_dir(dir.path()).unwrap();
        assert_eq!(package.meta.unwrap()["key"], json!("core"));

        let order: Vec<(String, String)> = package
            .objects
            .iter()
            .map(|(c, v)| (c.clone(), v["_id"].as_str().unwrap().to_string()))
            .collect();
        assert_eq!(
            order,
            vec![
                (SCHEMA_CLASS.to_string(), "Widget".to_string()),
                ("Widget".to_string(), "w1".to_string()),
                ("Widget".to_string(), "w2".to_string()),
            ]
        );
    }

    #[test]
    fn test_read_missing_dir_fails() {
        assert!(read_package_dir(Path::new("/nonexistent/package")).is_err());
    }
}
