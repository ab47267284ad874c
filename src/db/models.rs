// src/db/models.rs

//! Data models for Recpack database entities
//!
//! This module defines the record envelope stored in the `records` table and
//! the owner lookup stored in `object_owners`, with methods for creating,
//! reading, updating, and deleting them.

use crate::error::{Error, Result};
use crate::version::VersionId;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Plain-object key carrying the record identifier
pub const ID_KEY: &str = "_id";
/// Plain-object key carrying the version marker
pub const VER_KEY: &str = "__ver";
/// Plain-object key carrying the owner tag
pub const PKG_KEY: &str = "__pkg";
/// Key of the pre-mutation snapshot; never part of the plain object
pub const PREVIOUS_KEY: &str = "_previous";

const RECORD_COLUMNS: &str = "class, id, ver, pkg, installed, data";

/// A stored business object of some class
///
/// The envelope carries the identity, version marker and owner tag; the
/// plain fields live in `data`. After a mutation the store fills `previous`
/// with the plain object as it was before the change.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub class: String,
    pub id: String,
    pub ver: Option<VersionId>,
    pub pkg: Option<String>,
    /// Last write came from a package import
    pub installed: bool,
    pub data: Map<String, Value>,
    pub previous: Option<Value>,
}

impl Record {
    /// Create an empty record
    pub fn new(class: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            id: id.into(),
            ver: None,
            pkg: None,
            installed: false,
            data: Map::new(),
            previous: None,
        }
    }

    /// Build a record from its plain object form
    ///
    /// `_id` is required; `__ver` and `__pkg` are lifted into the envelope
    /// and every other `_`-prefixed bookkeeping key is dropped.
    pub fn from_plain(class: &str, plain: &Value) -> Result<Self> {
        let Value::Object(map) = plain else {
            return Err(Error::InvalidRecord(format!(
                "{} record is not a JSON object",
                class
            )));
        };

        let id = match map.get(ID_KEY) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(Error::InvalidRecord(format!(
                    "{} record has no {} field",
                    class, ID_KEY
                )));
            }
        };

        let ver = match map.get(VER_KEY) {
            Some(Value::String(s)) => Some(s.parse()?),
            Some(Value::Number(n)) => Some(n.to_string().parse()?),
            _ => None,
        };

        let pkg = map.get(PKG_KEY).and_then(Value::as_str).map(str::to_string);

        let data = map
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), ID_KEY | VER_KEY | PKG_KEY | PREVIOUS_KEY))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            class: class.to_string(),
            id,
            ver,
            pkg,
            installed: false,
            data,
            previous: None,
        })
    }

    /// The record as a plain JSON object (`_previous` excluded)
    pub fn to_plain_object(&self) -> Value {
        let mut map = self.data.clone();
        map.insert(ID_KEY.to_string(), Value::String(self.id.clone()));
        if let Some(ver) = &self.ver {
            map.insert(VER_KEY.to_string(), Value::String(ver.to_string()));
        }
        if let Some(pkg) = &self.pkg {
            map.insert(PKG_KEY.to_string(), Value::String(pkg.clone()));
        }
        Value::Object(map)
    }

    /// Store a serializable value as the record's plain fields
    pub fn from_typed<T: Serialize>(class: &str, id: &str, value: &T) -> Result<Self> {
        let Value::Object(data) = serde_json::to_value(value)? else {
            return Err(Error::InvalidRecord(format!(
                "{} {} does not serialize to an object",
                class, id
            )));
        };

        let mut record = Self::new(class, id);
        record.data = data;
        Ok(record)
    }

    /// Decode the record's plain fields into a typed value
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.data.clone()))?)
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Insert this record into the database
    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO records (class, id, ver, pkg, installed, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &self.class,
                &self.id,
                self.ver.as_ref().map(|v| v.to_string()),
                &self.pkg,
                self.installed,
                serde_json::to_string(&self.data)?,
            ],
        )?;
        Ok(())
    }

    /// Overwrite the stored envelope and data of this record
    pub fn update(&self, conn: &Connection) -> Result<()> {
        let changed = conn.execute(
            "UPDATE records
             SET ver = ?3, pkg = ?4, installed = ?5, data = ?6, updated_at = CURRENT_TIMESTAMP
             WHERE class = ?1 AND id = ?2",
            params![
                &self.class,
                &self.id,
                self.ver.as_ref().map(|v| v.to_string()),
                &self.pkg,
                self.installed,
                serde_json::to_string(&self.data)?,
            ],
        )?;

        if changed == 0 {
            return Err(Error::InvalidRecord(format!(
                "{} {} does not exist",
                self.class, self.id
            )));
        }
        Ok(())
    }

    /// Find a record by class and ID
    pub fn find(conn: &Connection, class: &str, id: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM records WHERE class = ?1 AND id = ?2",
            RECORD_COLUMNS
        ))?;

        let record = stmt.query_row([class, id], Self::from_row).optional()?;

        Ok(record)
    }

    /// List all records of a class in insertion order
    pub fn list_by_class(conn: &Connection, class: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM records WHERE class = ?1 ORDER BY rowid",
            RECORD_COLUMNS
        ))?;

        let records = stmt
            .query_map([class], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// List all records tagged with a package key
    pub fn list_by_package(conn: &Connection, package_key: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM records WHERE pkg = ?1 ORDER BY class, id",
            RECORD_COLUMNS
        ))?;

        let records = stmt
            .query_map([package_key], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Set the owner tag of a stored record unless it already has one
    ///
    /// Returns true if the tag was written.
    pub fn set_owner_if_unset(
        conn: &Connection,
        class: &str,
        id: &str,
        package_key: &str,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE records SET pkg = ?3 WHERE class = ?1 AND id = ?2 AND pkg IS NULL",
            [class, id, package_key],
        )?;
        Ok(changed > 0)
    }

    /// Delete a record by class and ID
    pub fn delete(conn: &Connection, class: &str, id: &str) -> Result<()> {
        conn.execute(
            "DELETE FROM records WHERE class = ?1 AND id = ?2",
            [class, id],
        )?;
        Ok(())
    }

    /// Convert a database row to a Record
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let ver = row
            .get::<_, Option<String>>(2)?
            .map(|s| s.parse::<VersionId>())
            .transpose()
            .map_err(|e| conversion_error(2, e))?;

        let data_str: String = row.get(5)?;
        let data = serde_json::from_str::<Map<String, Value>>(&data_str)
            .map_err(|e| conversion_error(5, e))?;

        Ok(Self {
            class: row.get(0)?,
            id: row.get(1)?,
            ver,
            pkg: row.get(3)?,
            installed: row.get(4)?,
            data,
            previous: None,
        })
    }
}

fn conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

/// Non-authoritative lookup from a record to the package that first claimed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerEntry {
    pub class: String,
    pub object_id: String,
    pub package_key: String,
    pub claimed_at: Option<String>,
}

impl OwnerEntry {
    /// Record `package_key` as owner unless the record is already claimed
    ///
    /// Returns true if this call created the claim.
    pub fn claim(
        conn: &Connection,
        class: &str,
        object_id: &str,
        package_key: &str,
    ) -> Result<bool> {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO object_owners (class, object_id, package_key)
             VALUES (?1, ?2, ?3)",
            [class, object_id, package_key],
        )?;
        Ok(inserted > 0)
    }

    /// Find the owner of a record
    pub fn find(conn: &Connection, class: &str, object_id: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT class, object_id, package_key, claimed_at
             FROM object_owners WHERE class = ?1 AND object_id = ?2",
        )?;

        let owner = stmt.query_row([class, object_id], Self::from_row).optional()?;

        Ok(owner)
    }

    /// List all records claimed by a package
    pub fn list_by_package(conn: &Connection, package_key: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT class, object_id, package_key, claimed_at
             FROM object_owners WHERE package_key = ?1 ORDER BY class, object_id",
        )?;

        let owners = stmt
            .query_map([package_key], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(owners)
    }

    /// Drop the claim on a record
    pub fn release(conn: &Connection, class: &str, object_id: &str) -> Result<()> {
        conn.execute(
            "DELETE FROM object_owners WHERE class = ?1 AND object_id = ?2",
            [class, object_id],
        )?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            class: row.get(0)?,
            object_id: row.get(1)?,
            package_key: row.get(2)?,
            claimed_at: row.get(3)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        schema::migrate(&conn).unwrap();
        (temp_file, conn)
    }

    #[test]
    fn test_record_crud() {
        let (_temp, conn) = create_test_db();

        let mut record = Record::new("Widget", "w1");
        record.ver = Some("1.2".parse().unwrap());
        record.set("name", json!("Sprocket"));
        record.insert(&conn).unwrap();

        let found = Record::find(&conn, "Widget", "w1").unwrap().unwrap();
        assert_eq!(found.field("name"), Some(&json!("Sprocket")));
        assert_eq!(found.ver, Some("1.2".parse().unwrap()));
        assert!(!found.installed);

        record.set("name", json!("Cog"));
        record.pkg = Some("core".to_string());
        record.update(&conn).unwrap();

        let found = Record::find(&conn, "Widget", "w1").unwrap().unwrap();
        assert_eq!(found.field("name"), Some(&json!("Cog")));
        assert_eq!(found.pkg.as_deref(), Some("core"));

        Record::delete(&conn, "Widget", "w1").unwrap();
        assert!(Record::find(&conn, "Widget", "w1").unwrap().is_none());
    }

    #[test]
    fn test_update_missing_record_fails() {
        let (_temp, conn) = create_test_db();
        let record = Record::new("Widget", "ghost");
        assert!(matches!(record.update(&conn), Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn test_list_by_class_and_package() {
        let (_temp, conn) = create_test_db();

        let rows = [
            ("Widget", "b", Some("core")),
            ("Widget", "a", None),
            ("Gadget", "c", Some("core")),
        ];
        for (class, id, pkg) in rows {
            let mut record = Record::new(class, id);
            record.pkg = pkg.map(str::to_string);
            record.insert(&conn).unwrap();
        }

        let widgets = Record::list_by_class(&conn, "Widget").unwrap();
        let ids: Vec<&str> = widgets.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let core = Record::list_by_package(&conn, "core").unwrap();
        assert_eq!(core.len(), 2);
        assert_eq!(core[0].class, "Gadget");
    }

    #[test]
    fn test_plain_object_roundtrip() {
        let plain = json!({
            "_id": "w1",
            "__ver": "2.1",
            "__pkg": "core",
            "_previous": {"name": "old"},
            "name": "Sprocket"
        });
        let record = Record::from_plain("Widget", &plain).unwrap();
        assert_eq!(record.id, "w1");
        assert_eq!(record.pkg.as_deref(), Some("core"));
        assert_eq!(record.data.len(), 1);

        let back = record.to_plain_object();
        assert_eq!(back["__ver"], json!("2.1"));
        assert!(back.get(PREVIOUS_KEY).is_none());
    }

    #[test]
    fn test_from_plain_requires_id() {
        let result = Record::from_plain("Widget", &json!({"name": "x"}));
        assert!(matches!(result, Err(Error::InvalidRecord(_))));
        let result = Record::from_plain("Widget", &json!(["not", "an", "object"]));
        assert!(matches!(result, Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn test_set_owner_if_unset() {
        let (_temp, conn) = create_test_db();
        Record::new("Widget", "w1").insert(&conn).unwrap();

        assert!(Record::set_owner_if_unset(&conn, "Widget", "w1", "core").unwrap());
        assert!(!Record::set_owner_if_unset(&conn, "Widget", "w1", "ext").unwrap());

        let found = Record::find(&conn, "Widget", "w1").unwrap().unwrap();
        assert_eq!(found.pkg.as_deref(), Some("core"));
    }

    #[test]
    fn test_typed_roundtrip() {
        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct Note {
            title: String,
            pinned: bool,
        }

        let note = Note {
            title: "hello".to_string(),
            pinned: true,
        };
        let record = Record::from_typed("Note", "n1", &note).unwrap();
        assert_eq!(record.field("title"), Some(&json!("hello")));
        assert_eq!(record.to_typed::<Note>().unwrap(), note);

        assert!(Record::from_typed("Note", "n2", &"just a string").is_err());
    }

    #[test]
    fn test_owner_claim_is_set_once() {
        let (_temp, conn) = create_test_db();

        assert!(OwnerEntry::claim(&conn, "Widget", "w1", "core").unwrap());
        assert!(!OwnerEntry::claim(&conn, "Widget", "w1", "ext").unwrap());

        let owner = OwnerEntry::find(&conn, "Widget", "w1").unwrap().unwrap();
        assert_eq!(owner.package_key, "core");
        assert_eq!(OwnerEntry::list_by_package(&conn, "core").unwrap().len(), 1);

        OwnerEntry::release(&conn, "Widget", "w1").unwrap();
        assert!(OwnerEntry::find(&conn, "Widget", "w1").unwrap().is_none());
    }
}
