// src/store/mod.rs

//! Document store
//!
//! The store is the persistence layer every other component talks to:
//! - `find` / `find_one` over named classes of records
//! - `save` / `delete` with automatic version bumps and owner bookkeeping
//! - typed mutation triggers dispatched before and after each write
//! - the class catalog deciding which classes exist locally

pub mod catalog;
pub mod triggers;

use crate::condition::Condition;
use crate::db::{
    self,
    models::{OwnerEntry, Record},
};
use crate::error::{Error, Result};
use crate::version::VersionId;
use catalog::{ClassCatalog, ObjectClass, SCHEMA_CLASS};
use rusqlite::Connection;
use std::cell::{Ref, RefCell};
use std::sync::Arc;
use tracing::{debug, info};
use triggers::{ClassFilter, MutationKind, MutationKinds, MutationObserver, Phase, TriggerRegistry};

/// Options for a single write
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Do not dispatch triggers for this write
    pub skip_triggers: bool,
    /// Store exactly this version instead of bumping; marks the record as
    /// installed from a package
    pub use_version_id: Option<VersionId>,
}

impl SaveOptions {
    /// Write without dispatching triggers
    pub fn quiet() -> Self {
        Self {
            skip_triggers: true,
            use_version_id: None,
        }
    }

    /// Write a package-provided version without dispatching triggers
    pub fn installed(version: Option<VersionId>) -> Self {
        Self {
            skip_triggers: true,
            use_version_id: version,
        }
    }
}

/// SQLite-backed record store with mutation triggers
pub struct Store {
    conn: Connection,
    triggers: TriggerRegistry,
    catalog: RefCell<ClassCatalog>,
}

impl Store {
    /// Wrap a migrated connection
    pub fn new(conn: Connection) -> Result<Self> {
        let catalog = ClassCatalog::load(&conn)?;
        Ok(Self {
            conn,
            triggers: TriggerRegistry::new(),
            catalog: RefCell::new(catalog),
        })
    }

    /// Open an existing database file
    pub fn open(db_path: &str) -> Result<Self> {
        Self::new(crate::db::open(db_path)?)
    }

    /// Fresh in-memory store
    pub fn open_in_memory() -> Result<Self> {
        Self::new(crate::db::open_in_memory()?)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Register a trigger; dispatch order is registration order
    pub fn subscribe(
        &mut self,
        filter: ClassFilter,
        phase: Phase,
        kinds: MutationKinds,
        observer: Arc<dyn MutationObserver>,
    ) {
        self.triggers.subscribe(filter, phase, kinds, observer);
    }

    pub fn catalog(&self) -> Ref<'_, ClassCatalog> {
        self.catalog.borrow()
    }

    /// Whether records of `class` are recognized locally
    pub fn class_exists(&self, class: &str) -> bool {
        self.catalog.borrow().contains(class)
    }

    /// Reload class definitions from the database
    pub fn reload_classes(&self) -> Result<()> {
        let catalog = ClassCatalog::load(&self.conn)?;
        *self.catalog.borrow_mut() = catalog;
        Ok(())
    }

    /// All records of a class, optionally filtered by a condition
    pub fn find(&self, class: &str, condition: Option<&Condition>) -> Result<Vec<Record>> {
        let records = Record::list_by_class(&self.conn, class)?;
        Ok(match condition {
            Some(cond) => records
                .into_iter()
                .filter(|r| cond.matches(&r.to_plain_object()))
                .collect(),
            None => records,
        })
    }

    pub fn find_one(&self, class: &str, id: &str) -> Result<Option<Record>> {
        Record::find(&self.conn, class, id)
    }

    /// Create or update a record
    ///
    /// Without `use_version_id` the version is bumped: new records start at
    /// the version they carry (or `1`), updates get the next version on the
    /// same branch, and the first local edit of an installed record opens a
    /// new branch. The owner tag is never cleared by a save. On return
    /// `record.previous` holds the pre-mutation plain object for updates.
    pub fn save(&self, record: &mut Record, opts: SaveOptions) -> Result<MutationKind> {
        if !self.class_exists(&record.class) {
            return Err(Error::MissingClass(record.class.clone()));
        }

        let existing = Record::find(&self.conn, &record.class, &record.id)?;
        let kind = match existing {
            Some(_) => MutationKind::Update,
            None => MutationKind::Create,
        };

        record.ver = match (&opts.use_version_id, &existing) {
            (Some(ver), _) => Some(ver.clone()),
            (None, Some(current)) => Some(match &current.ver {
                Some(ver) if current.installed => ver.branch(),
                Some(ver) => ver.next()?,
                None => VersionId::initial(),
            }),
            (None, None) => Some(record.ver.clone().unwrap_or_else(VersionId::initial)),
        };
        record.installed = opts.use_version_id.is_some();
        // A stored owner tag wins over whatever the caller carries
        if let Some(owner) = existing.as_ref().and_then(|current| current.pkg.clone()) {
            record.pkg = Some(owner);
        }
        record.previous = existing.as_ref().map(Record::to_plain_object);

        if !opts.skip_triggers {
            self.dispatch(Phase::Before, kind, record)?;
        }

        db::transaction(&self.conn, |tx| {
            match kind {
                MutationKind::Create => record.insert(tx)?,
                _ => record.update(tx)?,
            }
            if let Some(pkg) = &record.pkg {
                OwnerEntry::claim(tx, &record.class, &record.id, pkg)?;
            }
            Ok(())
        })?;
        debug!(
            "Saved {} {} at version {}",
            record.class,
            record.id,
            record.ver.as_ref().map(|v| v.to_string()).unwrap_or_default()
        );

        if record.class == SCHEMA_CLASS {
            self.reload_classes()?;
        }

        if !opts.skip_triggers {
            self.dispatch(Phase::After, kind, record)?;
        }

        Ok(kind)
    }

    /// Delete a stored record
    ///
    /// `record` is replaced by the stored state, with `previous` holding its
    /// plain object, before triggers run.
    pub fn delete(&self, record: &mut Record, opts: SaveOptions) -> Result<()> {
        let existing = Record::find(&self.conn, &record.class, &record.id)?.ok_or_else(|| {
            Error::InvalidRecord(format!("{} {} does not exist", record.class, record.id))
        })?;

        let previous = existing.to_plain_object();
        *record = existing;
        record.previous = Some(previous);

        if !opts.skip_triggers {
            self.dispatch(Phase::Before, MutationKind::Delete, record)?;
        }

        db::transaction(&self.conn, |tx| {
            Record::delete(tx, &record.class, &record.id)?;
            OwnerEntry::release(tx, &record.class, &record.id)
        })?;
        debug!("Deleted {} {}", record.class, record.id);

        if record.class == SCHEMA_CLASS {
            self.reload_classes()?;
        }

        if !opts.skip_triggers {
            self.dispatch(Phase::After, MutationKind::Delete, record)?;
        }

        Ok(())
    }

    /// Install a class definition and reload the catalog
    ///
    /// The definition replaces any stored one wholesale. The catalog is
    /// reloaded even when nothing changed.
    pub fn install_class(&self, record: &mut Record, version: Option<VersionId>) -> Result<()> {
        let class = ObjectClass::from_record(record)?;
        self.save(record, SaveOptions::installed(version))?;
        self.reload_classes()?;
        info!("Installed class {} ({} fields)", class.name, class.fields.len());
        Ok(())
    }

    /// Tag a stored record with its owning package unless already tagged
    ///
    /// Updates `record.pkg` to the effective owner.
    pub fn claim_owner(&self, record: &mut Record, package_key: &str) -> Result<()> {
        if record.pkg.is_some() {
            return Ok(());
        }
        db::transaction(&self.conn, |tx| {
            Record::set_owner_if_unset(tx, &record.class, &record.id, package_key)?;
            OwnerEntry::claim(tx, &record.class, &record.id, package_key)
        })?;
        record.pkg = Some(package_key.to_string());
        Ok(())
    }

    /// Package key recorded as owner of a record, if any
    pub fn owner_of(&self, class: &str, id: &str) -> Result<Option<String>> {
        Ok(OwnerEntry::find(&self.conn, class, id)?.map(|o| o.package_key))
    }

    fn dispatch(&self, phase: Phase, kind: MutationKind, record: &mut Record) -> Result<()> {
        for observer in self.triggers.matching(&record.class, phase, kind) {
            observer.on_mutation(self, kind, record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::catalog::UPDATE_LOG_CLASS;
    use serde_json::json;
    use std::sync::Mutex;

    fn store_with_widget() -> Store {
        let store = Store::open_in_memory().unwrap();
        let mut class = ObjectClass::new("Widget").to_record().unwrap();
        store.save(&mut class, SaveOptions::quiet()).unwrap();
        store
    }

    fn widget(id: &str, name: &str) -> Record {
        let mut record = Record::new("Widget", id);
        record.set("name", json!(name));
        record
    }

    #[test]
    fn test_save_unknown_class_fails() {
        let store = Store::open_in_memory().unwrap();
        let result = store.save(&mut widget("w1", "x"), SaveOptions::default());
        assert!(matches!(result, Err(Error::MissingClass(_))));
    }

    #[test]
    fn test_schema_save_registers_class() {
        let store = store_with_widget();
        assert!(store.class_exists("Widget"));
        assert!(!store.class_exists("Gadget"));
    }

    #[test]
    fn test_version_bumps() {
        let store = store_with_widget();

        let mut record = widget("w1", "a");
        assert_eq!(store.save(&mut record, SaveOptions::default()).unwrap(), MutationKind::Create);
        assert_eq!(record.ver, Some(VersionId::initial()));
        assert!(record.previous.is_none());

        record.set("name", json!("b"));
        assert_eq!(store.save(&mut record, SaveOptions::default()).unwrap(), MutationKind::Update);
        assert_eq!(record.ver.as_ref().unwrap().to_string(), "2");
        assert_eq!(record.previous.as_ref().unwrap()["name"], json!("a"));

        // Installed version, then a local edit branches
        store
            .save(&mut record, SaveOptions::installed(Some("1.5".parse().unwrap())))
            .unwrap();
        let stored = store.find_one("Widget", "w1").unwrap().unwrap();
        assert!(stored.installed);

        let mut edited = stored.clone();
        edited.set("name", json!("c"));
        store.save(&mut edited, SaveOptions::default()).unwrap();
        assert_eq!(edited.ver.as_ref().unwrap().to_string(), "1.5.1");
        assert!(!edited.installed);

        edited.set("name", json!("d"));
        store.save(&mut edited, SaveOptions::default()).unwrap();
        assert_eq!(edited.ver.as_ref().unwrap().to_string(), "1.5.2");
    }

    #[test]
    fn test_save_at_version_limit_fails_cleanly() {
        let store = store_with_widget();
        let mut record = widget("w1", "a");
        record.ver = Some("18446744073709551615".parse().unwrap());
        store.save(&mut record, SaveOptions::default()).unwrap();

        record.set("name", json!("b"));
        let result = store.save(&mut record, SaveOptions::default());
        assert!(matches!(result, Err(Error::InvalidVersion(_))));
        let stored = store.find_one("Widget", "w1").unwrap().unwrap();
        assert_eq!(stored.field("name"), Some(&json!("a")));
    }

    #[test]
    fn test_save_keeps_owner_tag() {
        let store = store_with_widget();
        let mut record = widget("w1", "a");
        record.pkg = Some("core".to_string());
        store.save(&mut record, SaveOptions::default()).unwrap();

        let mut replacement = widget("w1", "b");
        store.save(&mut replacement, SaveOptions::default()).unwrap();
        assert_eq!(replacement.pkg.as_deref(), Some("core"));
        assert_eq!(store.owner_of("Widget", "w1").unwrap().as_deref(), Some("core"));
    }

    #[test]
    fn test_save_never_replaces_owner_tag() {
        let store = store_with_widget();
        let mut record = widget("w1", "a");
        record.pkg = Some("A".to_string());
        store.save(&mut record, SaveOptions::default()).unwrap();

        // A plain object carrying a different owner
        let mut other = Record::from_plain("Widget", &json!({"_id": "w1", "__pkg": "B"})).unwrap();
        store.save(&mut other, SaveOptions::default()).unwrap();
        assert_eq!(other.pkg.as_deref(), Some("A"));

        let stored = store.find_one("Widget", "w1").unwrap().unwrap();
        assert_eq!(stored.pkg.as_deref(), Some("A"));
        assert_eq!(store.owner_of("Widget", "w1").unwrap().as_deref(), Some("A"));
    }

    #[test]
    fn test_failed_owner_claim_rolls_back_record() {
        let store = store_with_widget();
        store
            .conn()
            .execute_batch(
                "CREATE TRIGGER block_owner BEFORE INSERT ON object_owners
                 BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
            )
            .unwrap();

        let mut fresh = widget("w2", "b");
        fresh.pkg = Some("core".to_string());
        assert!(matches!(store.save(&mut fresh, SaveOptions::default()), Err(Error::Database(_))));
        assert!(store.find_one("Widget", "w2").unwrap().is_none());
    }

    #[test]
    fn test_claim_owner_never_overwrites() {
        let store = store_with_widget();
        let mut record = widget("w1", "a");
        store.save(&mut record, SaveOptions::default()).unwrap();

        store.claim_owner(&mut record, "core").unwrap();
        store.claim_owner(&mut record, "ext").unwrap();
        assert_eq!(record.pkg.as_deref(), Some("core"));

        let mut fresh = store.find_one("Widget", "w1").unwrap().unwrap();
        assert_eq!(fresh.pkg.as_deref(), Some("core"));
        store.claim_owner(&mut fresh, "ext").unwrap();
        assert_eq!(store.owner_of("Widget", "w1").unwrap().as_deref(), Some("core"));
    }

    #[test]
    fn test_triggers_dispatch_in_order_and_can_be_skipped() {
        let mut store = store_with_widget();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            store.subscribe(
                ClassFilter::class("Widget"),
                Phase::After,
                MutationKinds::ALL,
                Arc::new(move |_: &Store, kind: MutationKind, record: &mut Record| -> Result<()> {
                    seen.lock().unwrap().push(format!("{}:{}:{}", tag, kind.as_str(), record.id));
                    Ok(())
                }),
            );
        }

        let mut record = widget("w1", "a");
        store.save(&mut record, SaveOptions::default()).unwrap();
        store.save(&mut record, SaveOptions::quiet()).unwrap();
        store.delete(&mut record, SaveOptions::default()).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec!["first:create:w1", "second:create:w1", "first:delete:w1", "second:delete:w1"]
        );
    }

    #[test]
    fn test_before_trigger_can_reject() {
        let mut store = store_with_widget();
        store.subscribe(
            ClassFilter::Any,
            Phase::Before,
            MutationKinds::ALL,
            Arc::new(|_: &Store, _: MutationKind, record: &mut Record| -> Result<()> {
                if record.field("name") == Some(&json!("forbidden")) {
                    return Err(Error::InvalidRecord("forbidden name".to_string()));
                }
                Ok(())
            }),
        );

        let result = store.save(&mut widget("w1", "forbidden"), SaveOptions::default());
        assert!(matches!(result, Err(Error::InvalidRecord(_))));
        assert!(store.find_one("Widget", "w1").unwrap().is_none());
    }

    #[test]
    fn test_delete_fills_previous() {
        let store = store_with_widget();
        let mut record = widget("w1", "a");
        record.pkg = Some("core".to_string());
        store.save(&mut record, SaveOptions::default()).unwrap();

        let mut handle = Record::new("Widget", "w1");
        store.delete(&mut handle, SaveOptions::default()).unwrap();
        assert_eq!(handle.previous.as_ref().unwrap()["name"], json!("a"));
        assert_eq!(handle.pkg.as_deref(), Some("core"));
        assert!(store.owner_of("Widget", "w1").unwrap().is_none());

        let again = store.delete(&mut Record::new("Widget", "w1"), SaveOptions::default());
        assert!(matches!(again, Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn test_find_with_condition() {
        let store = store_with_widget();
        for (id, name) in [("w1", "a"), ("w2", "b"), ("w3", "a")] {
            store.save(&mut widget(id, name), SaveOptions::default()).unwrap();
        }

        let cond = Condition::parse(&json!({"name": "a"})).unwrap();
        let found = store.find("Widget", Some(&cond)).unwrap();
        let ids: Vec<&str> = found.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["w1", "w3"]);
        assert_eq!(store.find("Widget", None).unwrap().len(), 3);
        assert!(store.find(UPDATE_LOG_CLASS, None).unwrap().is_empty());
    }

    #[test]
    fn test_install_class_validates_and_reloads() {
        let store = Store::open_in_memory().unwrap();

        let mut bad = Record::new(SCHEMA_CLASS, "Gadget");
        bad.set("fields", json!(42));
        assert!(store.install_class(&mut bad, None).is_err());
        assert!(!store.class_exists("Gadget"));

        let mut good = ObjectClass::new("Gadget").to_record().unwrap();
        store
            .install_class(&mut good, Some("3".parse().unwrap()))
            .unwrap();
        assert!(store.class_exists("Gadget"));
        let stored = store.find_one(SCHEMA_CLASS, "Gadget").unwrap().unwrap();
        assert_eq!(stored.ver, Some("3".parse().unwrap()));
    }
}
