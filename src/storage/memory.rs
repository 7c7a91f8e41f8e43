//! In-process journal database.
//!
//! Follows the IndexedDB gateway's semantics (auto-increment identities that
//! are never reused, non-unique date index, all-or-nothing `write_all`) so the
//! router and client can be exercised without a browser. Data is not persisted
//! across restarts.

use super::{
    explicit_id, matches_date, Collection, JournalGateway, Record, RecordId, StorageConfig,
    StorageError, ID_FIELD, MAX_RECORD_ID,
};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

#[derive(Debug, Clone)]
struct MemoryCollection {
    collection: Collection,
    records: BTreeMap<RecordId, Record>,
    next_id: RecordId,
    /// `None` when index creation "failed" and lookups must scan.
    date_index: Option<BTreeMap<String, BTreeSet<RecordId>>>,
}

impl MemoryCollection {
    fn new(collection: Collection, indexed: bool) -> Self {
        Self {
            collection,
            records: BTreeMap::new(),
            next_id: 1,
            date_index: indexed.then(BTreeMap::new),
        }
    }

    /// Empties the collection. The key generator keeps counting.
    fn clear(&mut self) {
        self.records.clear();
        if let Some(index) = self.date_index.as_mut() {
            index.clear();
        }
    }

    fn insert(&mut self, mut record: Record) -> Result<RecordId, StorageError> {
        let id = match explicit_id(self.collection, &record)? {
            Some(id) => {
                if self.records.contains_key(&id) {
                    return Err(StorageError::ConstraintViolation {
                        collection: self.collection,
                        message: format!("key {} already exists", id),
                    });
                }
                // `explicit_id` caps ids at MAX_RECORD_ID, so this cannot overflow.
                self.next_id = self.next_id.max(id + 1);
                id
            }
            None => {
                let id = self.next_id;
                if id > MAX_RECORD_ID {
                    return Err(StorageError::ConstraintViolation {
                        collection: self.collection,
                        message: "key generator exhausted".to_string(),
                    });
                }
                self.next_id += 1;
                id
            }
        };

        record.insert(ID_FIELD.to_string(), Value::from(id));

        let field = self.collection.date_field();
        if let (Some(index), Some(date)) = (
            self.date_index.as_mut(),
            record.get(field).and_then(Value::as_str),
        ) {
            index.entry(date.to_string()).or_default().insert(id);
        }

        self.records.insert(id, record);
        Ok(id)
    }

    fn by_date(&self, date: &str) -> Vec<Record> {
        match &self.date_index {
            Some(index) => index
                .get(date)
                .into_iter()
                .flatten()
                .filter_map(|id| self.records.get(id).cloned())
                .collect(),
            None => {
                log::debug!("{}: no date index, scanning", self.collection);
                let field = self.collection.date_field();
                self.records
                    .values()
                    .filter(|r| matches_date(r, field, date))
                    .cloned()
                    .collect()
            }
        }
    }
}

/// A simple in-memory journal database.
#[derive(Clone, Default)]
pub struct MemoryGateway {
    config: StorageConfig,
    unindexed: BTreeSet<Collection>,
    db: Rc<RefCell<Option<BTreeMap<Collection, MemoryCollection>>>>,
}

impl MemoryGateway {
    /// Creates a new store with the given configuration.
    ///
    /// Note: The database is "opened" lazily on first use.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            unindexed: BTreeSet::new(),
            db: Rc::new(RefCell::new(None)),
        }
    }

    /// Simulates a schema where creating the date index on `collection`
    /// failed, forcing date lookups onto the scan path.
    pub fn without_date_index(mut self, collection: Collection) -> Self {
        self.unindexed.insert(collection);
        self
    }

    fn with_collection<T>(
        &self,
        collection: Collection,
        f: impl FnOnce(&mut MemoryCollection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut db = self.db.borrow_mut();
        let collections = db
            .as_mut()
            .ok_or_else(|| StorageError::DatabaseOpenFailed("Database not open".to_string()))?;
        let store = collections.get_mut(&collection).ok_or_else(|| {
            StorageError::TransactionFailed(format!("No object store named {}", collection))
        })?;
        f(store)
    }
}

impl JournalGateway for MemoryGateway {
    async fn open(&self) -> Result<(), StorageError> {
        if self.db.borrow().is_some() {
            return Ok(());
        }

        if self.config.version == 0 {
            return Err(StorageError::DatabaseOpenFailed(format!(
                "{}: version must be greater than zero",
                self.config.database_name
            )));
        }

        let collections = Collection::ALL
            .into_iter()
            .map(|c| (c, MemoryCollection::new(c, !self.unindexed.contains(&c))))
            .collect();
        *self.db.borrow_mut() = Some(collections);

        log::info!(
            "Opened in-memory database: {} v{}",
            self.config.database_name,
            self.config.version
        );
        Ok(())
    }

    async fn read_all(&self, collection: Collection) -> Result<Vec<Record>, StorageError> {
        self.open().await?;
        self.with_collection(collection, |store| {
            Ok(store.records.values().cloned().collect())
        })
    }

    async fn get_all_by_date(
        &self,
        collection: Collection,
        date: &str,
    ) -> Result<Vec<Record>, StorageError> {
        self.open().await?;
        self.with_collection(collection, |store| Ok(store.by_date(date)))
    }

    async fn write_all(
        &self,
        collection: Collection,
        records: Vec<Record>,
    ) -> Result<(), StorageError> {
        self.open().await?;
        self.with_collection(collection, |store| {
            // Stage on a copy so a rejected record leaves the live data untouched.
            let mut staged = store.clone();
            staged.clear();
            for record in records {
                staged.insert(record)?;
            }
            *store = staged;
            Ok(())
        })
    }

    async fn add(&self, collection: Collection, record: Record) -> Result<RecordId, StorageError> {
        self.open().await?;
        self.with_collection(collection, |store| store.insert(record))
    }
}
