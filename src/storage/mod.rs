//! Journal record storage.
//!
//! Every read and write the application performs ends up behind the
//! [`JournalGateway`] trait. On WASM targets the gateway is backed by
//! IndexedDB; [`memory::MemoryGateway`] mirrors the same semantics in process
//! (native builds, tests, and hosts without IndexedDB).
//!
//! ## Schema
//! ```text
//! IndexedDB "journal" v1
//! ├── intentions  key: id (auto)  by_date → date
//! ├── morning     key: id (auto)  by_date → date
//! ├── midday      key: id (auto)  by_date → date
//! ├── evening     key: id (auto)  by_date → date
//! ├── weekly      key: id (auto)  by_date → week_of
//! └── monthly     key: id (auto)  by_date → date
//! ```

#[cfg(target_arch = "wasm32")]
mod indexeddb;
pub mod memory;

#[cfg(target_arch = "wasm32")]
pub use indexeddb::IndexedDbGateway;
pub use memory::MemoryGateway;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;

/// A stored entry: field name to value, including the assigned `id`.
pub type Record = serde_json::Map<String, Value>;

/// Auto-assigned identity of a record within its collection.
pub type RecordId = u64;

/// Key path of the identity field on every record.
pub const ID_FIELD: &str = "id";

/// Largest identity a key generator can produce (2^53, the ceiling IndexedDB
/// enforces so keys stay exact as JS numbers).
pub const MAX_RECORD_ID: RecordId = 1 << 53;

/// Name of the non-unique date index present on every collection.
pub const DATE_INDEX: &str = "by_date";

/// The fixed set of record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Intentions,
    Morning,
    Midday,
    Evening,
    Weekly,
    Monthly,
}

impl Collection {
    /// Every collection, in schema creation order.
    pub const ALL: [Collection; 6] = [
        Collection::Intentions,
        Collection::Morning,
        Collection::Midday,
        Collection::Evening,
        Collection::Weekly,
        Collection::Monthly,
    ];

    /// Object store name.
    pub fn name(self) -> &'static str {
        match self {
            Collection::Intentions => "intentions",
            Collection::Morning => "morning",
            Collection::Midday => "midday",
            Collection::Evening => "evening",
            Collection::Weekly => "weekly",
            Collection::Monthly => "monthly",
        }
    }

    /// Field holding the date used as secondary lookup key.
    ///
    /// Weekly reviews are keyed by the week they cover, everything else by
    /// the day the entry was written for.
    pub fn date_field(self) -> &'static str {
        match self {
            Collection::Weekly => "week_of",
            _ => "date",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors that can occur during storage operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    /// The database could not be opened or its schema upgraded.
    #[error("Database open failed: {0}")]
    DatabaseOpenFailed(String),
    /// A transaction or one of its requests failed; nothing was committed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),
    /// A record was rejected by the store (bad or duplicate identity).
    #[error("Constraint violation in {collection}: {message}")]
    ConstraintViolation {
        collection: Collection,
        message: String,
    },
    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
    /// An unexpected error occurred.
    #[error("Storage error: {0}")]
    Other(String),
}

/// Exclusive access to the journal database.
///
/// All operations are asynchronous and report failure through their result;
/// none of them retry. Implementations open the database lazily on first use
/// and keep the handle for their lifetime.
///
/// Note: This trait does not require `Send` bounds since WASM is single-threaded
/// and JS types cannot be sent between threads.
pub trait JournalGateway {
    /// Opens (creating or upgrading the schema if needed) the database.
    ///
    /// Idempotent once it has succeeded. A failed open is not memoized, the
    /// next operation tries again.
    fn open(&self) -> impl Future<Output = Result<(), StorageError>>;

    /// Returns every record in a collection, in storage order.
    fn read_all(
        &self,
        collection: Collection,
    ) -> impl Future<Output = Result<Vec<Record>, StorageError>>;

    /// Returns all records whose date field equals `date`.
    ///
    /// Uses the date index when present and falls back to a full scan
    /// filtered on the collection's date field otherwise.
    fn get_all_by_date(
        &self,
        collection: Collection,
        date: &str,
    ) -> impl Future<Output = Result<Vec<Record>, StorageError>>;

    /// Clears the collection and writes `records`, in one transaction.
    ///
    /// If any record is rejected the previous contents are left in place.
    fn write_all(
        &self,
        collection: Collection,
        records: Vec<Record>,
    ) -> impl Future<Output = Result<(), StorageError>>;

    /// Inserts one record and returns its assigned identity.
    fn add(
        &self,
        collection: Collection,
        record: Record,
    ) -> impl Future<Output = Result<RecordId, StorageError>>;
}

/// Configuration for opening the journal database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Name of the database (used as IndexedDB database name on web).
    pub database_name: String,
    /// Database version (incrementing triggers upgrade).
    pub version: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_name: "journal".to_string(),
            version: 1,
        }
    }
}

impl StorageConfig {
    /// Creates a new configuration for the given database name.
    pub fn new(database_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            ..Self::default()
        }
    }

    /// Sets the database version.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}

/// Reads the caller-supplied identity of a record, if it carries one.
///
/// Identities are positive integers no larger than [`MAX_RECORD_ID`]; anything
/// else under `id` is rejected the same way on every backend.
pub(crate) fn explicit_id(
    collection: Collection,
    record: &Record,
) -> Result<Option<RecordId>, StorageError> {
    match record.get(ID_FIELD) {
        None => Ok(None),
        Some(value) => match value.as_u64() {
            Some(id) if (1..=MAX_RECORD_ID).contains(&id) => Ok(Some(id)),
            _ => Err(StorageError::ConstraintViolation {
                collection,
                message: format!("invalid record identity {}", value),
            }),
        },
    }
}

/// True when `record[field]` is the string `date`.
pub(crate) fn matches_date(record: &Record, field: &str, date: &str) -> bool {
    record.get(field).and_then(Value::as_str) == Some(date)
}
