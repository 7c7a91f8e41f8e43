//! IndexedDB-backed journal database for WASM targets.
//!
//! Wraps the low-level web-sys bindings in the [`JournalGateway`] interface.
//! Works from both a window and a dedicated worker scope.

use super::{
    explicit_id, matches_date, Collection, JournalGateway, Record, RecordId, StorageConfig,
    StorageError, DATE_INDEX, ID_FIELD,
};
use futures_channel::oneshot;
use futures_util::future::{FutureExt, LocalBoxFuture, Shared};
use js_sys::Array;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    IdbDatabase, IdbFactory, IdbIndexParameters, IdbObjectStore, IdbObjectStoreParameters,
    IdbOpenDbRequest, IdbRequest, IdbTransaction, IdbTransactionMode, IdbVersionChangeEvent,
    WorkerGlobalScope,
};

/// An open in progress or finished. Every caller awaits the same one.
type PendingOpen = Shared<LocalBoxFuture<'static, Result<IdbDatabase, StorageError>>>;
type OpenSlot = RefCell<Option<PendingOpen>>;

/// Runs inside `onupgradeneeded`.
type UpgradeFn = fn(&IdbOpenDbRequest) -> Result<(), JsValue>;

/// IndexedDB journal database.
///
/// The connection is opened lazily on first use and shared by clones.
/// Concurrent first requests wait on a single open. The handle is closed
/// and forgotten when another context upgrades the database.
#[derive(Clone)]
pub struct IndexedDbGateway {
    config: StorageConfig,
    db: Rc<OpenSlot>,
}

impl Default for IndexedDbGateway {
    fn default() -> Self {
        Self::new(StorageConfig::default())
    }
}

impl IndexedDbGateway {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: Rc::new(RefCell::new(None)),
        }
    }

    /// Gets the database reference, opening it if necessary.
    async fn get_db(&self) -> Result<IdbDatabase, StorageError> {
        let pending = {
            let mut slot = self.db.borrow_mut();
            match slot.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    let pending = connect(self.config.clone(), Rc::downgrade(&self.db))
                        .boxed_local()
                        .shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        let result = pending.await;
        if result.is_err() {
            // Failed opens are retried by the next caller.
            let mut slot = self.db.borrow_mut();
            if slot
                .as_ref()
                .and_then(|pending| pending.peek())
                .is_some_and(|done| done.is_err())
            {
                *slot = None;
            }
        }
        result
    }

    fn object_store(
        db: &IdbDatabase,
        collection: Collection,
        mode: IdbTransactionMode,
    ) -> Result<(IdbTransaction, IdbObjectStore), StorageError> {
        let tx = db
            .transaction_with_str_and_mode(collection.name(), mode)
            .map_err(|e| StorageError::TransactionFailed(format!("{:?}", e)))?;
        let store = tx
            .object_store(collection.name())
            .map_err(|e| StorageError::TransactionFailed(format!("{:?}", e)))?;
        Ok((tx, store))
    }
}

impl JournalGateway for IndexedDbGateway {
    async fn open(&self) -> Result<(), StorageError> {
        self.get_db().await.map(|_| ())
    }

    async fn read_all(&self, collection: Collection) -> Result<Vec<Record>, StorageError> {
        let db = self.get_db().await?;
        let (_tx, store) = Self::object_store(&db, collection, IdbTransactionMode::Readonly)?;

        let request = store
            .get_all()
            .map_err(|e| StorageError::TransactionFailed(format!("{:?}", e)))?;
        let result = wait_for_request(&request).await?;

        records_from_array(&result)
    }

    async fn get_all_by_date(
        &self,
        collection: Collection,
        date: &str,
    ) -> Result<Vec<Record>, StorageError> {
        let db = self.get_db().await?;
        let (_tx, store) = Self::object_store(&db, collection, IdbTransactionMode::Readonly)?;

        if store.index_names().contains(DATE_INDEX) {
            let index = store
                .index(DATE_INDEX)
                .map_err(|e| StorageError::TransactionFailed(format!("{:?}", e)))?;
            let request = index
                .get_all_with_key(&JsValue::from_str(date))
                .map_err(|e| StorageError::TransactionFailed(format!("{:?}", e)))?;
            let result = wait_for_request(&request).await?;
            return records_from_array(&result);
        }

        log::warn!("{} has no {} index, scanning", collection, DATE_INDEX);
        let request = store
            .get_all()
            .map_err(|e| StorageError::TransactionFailed(format!("{:?}", e)))?;
        let result = wait_for_request(&request).await?;

        let field = collection.date_field();
        Ok(records_from_array(&result)?
            .into_iter()
            .filter(|r| matches_date(r, field, date))
            .collect())
    }

    async fn write_all(
        &self,
        collection: Collection,
        records: Vec<Record>,
    ) -> Result<(), StorageError> {
        let db = self.get_db().await?;

        // Convert up front so a bad record never reaches the transaction.
        let mut values = Vec::with_capacity(records.len());
        for record in &records {
            explicit_id(collection, record)?;
            values.push(record_to_js(record)?);
        }

        let (tx, store) = Self::object_store(&db, collection, IdbTransactionMode::Readwrite)?;
        let done = TransactionWatch::new(&tx);

        if let Err(e) = store.clear() {
            let _ = tx.abort();
            return Err(StorageError::TransactionFailed(format!("{:?}", e)));
        }

        for value in &values {
            // `add` rather than `put`: a duplicate identity must fail the batch.
            if let Err(e) = store.add(value) {
                let _ = tx.abort();
                return Err(StorageError::ConstraintViolation {
                    collection,
                    message: format!("{:?}", e),
                });
            }
        }

        done.wait().await?;

        log::debug!("Replaced {} with {} record(s)", collection, values.len());
        Ok(())
    }

    async fn add(&self, collection: Collection, record: Record) -> Result<RecordId, StorageError> {
        let db = self.get_db().await?;
        explicit_id(collection, &record)?;
        let value = record_to_js(&record)?;

        let (tx, store) = Self::object_store(&db, collection, IdbTransactionMode::Readwrite)?;
        let done = TransactionWatch::new(&tx);

        let request = store.add(&value).map_err(|e| {
            let _ = tx.abort();
            StorageError::ConstraintViolation {
                collection,
                message: format!("{:?}", e),
            }
        })?;

        let key = wait_for_request(&request).await?;
        done.wait().await?;

        key.as_f64()
            .map(|k| k as RecordId)
            .ok_or_else(|| StorageError::Other(format!("Unexpected key {:?}", key)))
    }
}

/// Finds the IndexedDB factory on either a window or a worker global.
fn idb_factory() -> Result<IdbFactory, StorageError> {
    let factory = if let Some(window) = web_sys::window() {
        window.indexed_db()
    } else {
        js_sys::global()
            .dyn_into::<WorkerGlobalScope>()
            .map_err(|_| StorageError::DatabaseOpenFailed("No window or worker scope".to_string()))?
            .indexed_db()
    };

    factory
        .map_err(|e| StorageError::DatabaseOpenFailed(format!("{:?}", e)))?
        .ok_or_else(|| StorageError::DatabaseOpenFailed("IndexedDB not available".to_string()))
}

/// Opens the database and arranges for the memoized handle to be dropped
/// when a newer version is requested elsewhere.
async fn connect(config: StorageConfig, slot: Weak<OpenSlot>) -> Result<IdbDatabase, StorageError> {
    let db = open_database(&config, upgrade_schema).await?;

    let handle = db.clone();
    let onversionchange = Closure::wrap(Box::new(move |_: IdbVersionChangeEvent| {
        log::info!("Database upgraded elsewhere, closing connection");
        handle.close();
        if let Some(slot) = slot.upgrade() {
            *slot.borrow_mut() = None;
        }
    }) as Box<dyn FnMut(_)>);
    db.set_onversionchange(Some(onversionchange.as_ref().unchecked_ref()));
    onversionchange.forget();

    Ok(db)
}

/// Opens the journal database, running `upgrade` if the schema is older.
///
/// An upgrade error aborts the versionchange transaction, which fails the
/// open and leaves the previous schema in place.
async fn open_database(config: &StorageConfig, upgrade: UpgradeFn) -> Result<IdbDatabase, StorageError> {
    let open_request = idb_factory()?
        .open_with_u32(&config.database_name, config.version)
        .map_err(|e| StorageError::DatabaseOpenFailed(format!("{:?}", e)))?;

    let onupgradeneeded = Closure::wrap(Box::new(move |event: web_sys::IdbVersionChangeEvent| {
        let Some(request) = event
            .target()
            .and_then(|t| t.dyn_into::<IdbOpenDbRequest>().ok())
        else {
            log::error!("Upgrade event without an open request");
            return;
        };

        log::info!(
            "Upgrading IndexedDB from v{} to v{}",
            event.old_version(),
            event.new_version().unwrap_or_default()
        );

        if let Err(e) = upgrade(&request) {
            log::error!("Schema upgrade failed: {:?}", e);
            if let Some(tx) = request.transaction() {
                let _ = tx.abort();
            }
        }
    }) as Box<dyn FnMut(_)>);

    open_request.set_onupgradeneeded(Some(onupgradeneeded.as_ref().unchecked_ref()));
    onupgradeneeded.forget(); // Prevent closure from being dropped

    let db_result = wait_for_request(&open_request)
        .await
        .map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;

    let db: IdbDatabase = db_result.dyn_into().map_err(|_| {
        StorageError::DatabaseOpenFailed("Failed to cast to IdbDatabase".to_string())
    })?;

    log::info!(
        "Opened IndexedDB database: {} v{}",
        config.database_name,
        config.version
    );

    Ok(db)
}

/// Creates missing collections and date indexes. Existing ones are kept.
///
/// A collection that cannot be created is an error; a missing index is not.
fn upgrade_schema(request: &IdbOpenDbRequest) -> Result<(), JsValue> {
    let db: IdbDatabase = request.result()?.dyn_into()?;
    let upgrade_tx = request.transaction();

    for collection in Collection::ALL {
        let store = if db.object_store_names().contains(collection.name()) {
            match &upgrade_tx {
                Some(tx) => tx.object_store(collection.name())?,
                None => continue,
            }
        } else {
            let params = IdbObjectStoreParameters::new();
            params.set_key_path(&JsValue::from_str(ID_FIELD));
            params.set_auto_increment(true);
            let store = db.create_object_store_with_optional_parameters(collection.name(), &params)?;
            log::info!("Created IndexedDB object store: {}", collection);
            store
        };

        if store.index_names().contains(DATE_INDEX) {
            continue;
        }

        let params = IdbIndexParameters::new();
        params.set_unique(false);
        // Tolerated: lookups fall back to scanning when the index is missing.
        match store.create_index_with_str_and_optional_parameters(
            DATE_INDEX,
            collection.date_field(),
            &params,
        ) {
            Ok(_) => log::info!("Created index {} on {}", DATE_INDEX, collection),
            Err(e) => log::warn!(
                "Failed to create index {} on {}: {:?}",
                DATE_INDEX,
                collection,
                e
            ),
        }
    }

    Ok(())
}

/// Waits for an IDB request to complete and returns the result.
async fn wait_for_request(request: &IdbRequest) -> Result<JsValue, StorageError> {
    let (tx, rx) = oneshot::channel::<Result<JsValue, StorageError>>();
    let tx = Rc::new(RefCell::new(Some(tx)));

    let tx_success = tx.clone();
    let request_success = request.clone();
    let onsuccess = Closure::wrap(Box::new(move |_: web_sys::Event| {
        let result = request_success.result().unwrap_or(JsValue::UNDEFINED);
        if let Some(tx) = tx_success.borrow_mut().take() {
            let _ = tx.send(Ok(result));
        }
    }) as Box<dyn FnMut(_)>);

    let tx_error = tx;
    let request_error = request.clone();
    let onerror = Closure::wrap(Box::new(move |_: web_sys::Event| {
        let error_msg = request_error
            .error()
            .ok()
            .flatten()
            .map(|e| e.message())
            .unwrap_or_else(|| "Unknown error".to_string());
        if let Some(tx) = tx_error.borrow_mut().take() {
            let _ = tx.send(Err(StorageError::TransactionFailed(error_msg)));
        }
    }) as Box<dyn FnMut(_)>);

    request.set_onsuccess(Some(onsuccess.as_ref().unchecked_ref()));
    request.set_onerror(Some(onerror.as_ref().unchecked_ref()));

    let result = rx
        .await
        .map_err(|_| StorageError::Other("Channel closed".to_string()))?;

    request.set_onsuccess(None);
    request.set_onerror(None);

    drop(onsuccess);
    drop(onerror);

    result
}

/// Completion listener for a transaction.
///
/// Handlers are attached at construction, before any request is issued, so
/// the outcome can't be missed.
struct TransactionWatch {
    tx: IdbTransaction,
    rx: oneshot::Receiver<Result<(), StorageError>>,
    _handlers: [Closure<dyn FnMut(web_sys::Event)>; 3],
}

impl TransactionWatch {
    fn new(tx: &IdbTransaction) -> Self {
        let (sender, rx) = oneshot::channel::<Result<(), StorageError>>();
        let sender = Rc::new(RefCell::new(Some(sender)));

        let complete = sender.clone();
        let oncomplete = Closure::wrap(Box::new(move |_: web_sys::Event| {
            if let Some(s) = complete.borrow_mut().take() {
                let _ = s.send(Ok(()));
            }
        }) as Box<dyn FnMut(_)>);

        let failed = sender.clone();
        let failed_tx = tx.clone();
        let onerror = Closure::wrap(Box::new(move |_: web_sys::Event| {
            let message = failed_tx
                .error()
                .map(|e| e.message())
                .unwrap_or_else(|| "Transaction error".to_string());
            if let Some(s) = failed.borrow_mut().take() {
                let _ = s.send(Err(StorageError::TransactionFailed(message)));
            }
        }) as Box<dyn FnMut(_)>);

        let aborted = sender;
        let onabort = Closure::wrap(Box::new(move |_: web_sys::Event| {
            if let Some(s) = aborted.borrow_mut().take() {
                let _ = s.send(Err(StorageError::TransactionFailed(
                    "Transaction aborted".to_string(),
                )));
            }
        }) as Box<dyn FnMut(_)>);

        tx.set_oncomplete(Some(oncomplete.as_ref().unchecked_ref()));
        tx.set_onerror(Some(onerror.as_ref().unchecked_ref()));
        tx.set_onabort(Some(onabort.as_ref().unchecked_ref()));

        Self {
            tx: tx.clone(),
            rx,
            _handlers: [oncomplete, onerror, onabort],
        }
    }

    async fn wait(mut self) -> Result<(), StorageError> {
        (&mut self.rx)
            .await
            .map_err(|_| StorageError::Other("Channel closed".to_string()))?
    }
}

impl Drop for TransactionWatch {
    fn drop(&mut self) {
        // Detach before the closures go away; an aborted transaction still
        // fires its events after an early return.
        self.tx.set_oncomplete(None);
        self.tx.set_onerror(None);
        self.tx.set_onabort(None);
    }
}

/// Converts a record to a plain JS object via JSON.
fn record_to_js(record: &Record) -> Result<JsValue, StorageError> {
    let json =
        serde_json::to_string(record).map_err(|e| StorageError::SerializationError(e.to_string()))?;
    js_sys::JSON::parse(&json).map_err(|e| StorageError::SerializationError(format!("{:?}", e)))
}

/// Converts a `getAll` result array into records.
fn records_from_array(value: &JsValue) -> Result<Vec<Record>, StorageError> {
    let array = Array::from(value);
    let mut records = Vec::with_capacity(array.length() as usize);

    for item in array.iter() {
        let json = js_sys::JSON::stringify(&item)
            .map_err(|e| StorageError::SerializationError(format!("{:?}", e)))?;
        let json = json
            .as_string()
            .ok_or_else(|| StorageError::SerializationError("Expected string".to_string()))?;
        let record: Record = serde_json::from_str(&json)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    /// Database names survive between runs of the same browser profile.
    fn fresh_config(prefix: &str) -> StorageConfig {
        StorageConfig::new(format!("{}-{}", prefix, js_sys::Date::now()))
    }

    fn has_date_index(db: &IdbDatabase, collection: Collection) -> bool {
        let (_tx, store) =
            IndexedDbGateway::object_store(db, collection, IdbTransactionMode::Readonly).unwrap();
        store.index_names().contains(DATE_INDEX)
    }

    /// Schema with only a weekly store and no date index.
    fn bare_weekly_store(request: &IdbOpenDbRequest) -> Result<(), JsValue> {
        let db: IdbDatabase = request.result()?.dyn_into()?;
        let params = IdbObjectStoreParameters::new();
        params.set_key_path(&JsValue::from_str(ID_FIELD));
        params.set_auto_increment(true);
        db.create_object_store_with_optional_parameters(Collection::Weekly.name(), &params)?;
        Ok(())
    }

    #[wasm_bindgen_test(async)]
    async fn test_concurrent_first_requests_share_one_connection() {
        let db = IndexedDbGateway::new(fresh_config("journal-idb-shared"));
        let (a, b) = futures_util::future::join(db.get_db(), db.get_db()).await;
        assert!(js_sys::Object::is(&a.unwrap(), &b.unwrap()));
    }

    #[wasm_bindgen_test(async)]
    async fn test_failed_upgrade_rejects_open() {
        let config = fresh_config("journal-idb-bad-upgrade");
        let result = open_database(&config, |_| Err(JsValue::from_str("cannot create store"))).await;
        assert!(matches!(result, Err(StorageError::DatabaseOpenFailed(_))));

        // Nothing was committed, so a normal open still builds the full schema.
        let db = IndexedDbGateway::new(config).get_db().await.unwrap();
        assert_eq!(db.object_store_names().length(), Collection::ALL.len() as u32);
    }

    #[wasm_bindgen_test(async)]
    async fn test_upgrade_keeps_existing_data() {
        let config = fresh_config("journal-idb-upgrade");
        let v1 = IndexedDbGateway::new(config.clone());
        v1.add(
            Collection::Morning,
            record(json!({"date": "2024-01-01", "intention": "stay"})),
        )
        .await
        .unwrap();

        // The v1 connection closes itself when v2 asks for the upgrade.
        let v2 = IndexedDbGateway::new(config.with_version(2));
        let all = v2.read_all(Collection::Morning).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["intention"], "stay");

        let db = v2.get_db().await.unwrap();
        assert_eq!(db.version(), 2.0);
        for collection in Collection::ALL {
            assert!(db.object_store_names().contains(collection.name()), "{}", collection);
            assert!(has_date_index(&db, collection), "{}", collection);
        }
    }

    #[wasm_bindgen_test(async)]
    async fn test_lookup_scans_without_date_index() {
        let config = fresh_config("journal-idb-scan");
        open_database(&config, bare_weekly_store).await.unwrap().close();

        let db = IndexedDbGateway::new(config);
        assert!(!has_date_index(&db.get_db().await.unwrap(), Collection::Weekly));

        db.add(Collection::Weekly, record(json!({"week_of": "2024-01-08"})))
            .await
            .unwrap();
        db.add(
            Collection::Weekly,
            record(json!({"week_of": "2024-01-15", "date": "2024-01-08"})),
        )
        .await
        .unwrap();

        let found = db
            .get_all_by_date(Collection::Weekly, "2024-01-08")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["week_of"], "2024-01-08");
    }

    #[wasm_bindgen_test(async)]
    async fn test_add_and_lookup_by_date() {
        let db = IndexedDbGateway::new(StorageConfig::new("journal-idb-add"));
        db.write_all(Collection::Morning, Vec::new()).await.unwrap();

        let id = db
            .add(
                Collection::Morning,
                record(json!({"date": "2024-01-01", "intention": "meditate"})),
            )
            .await
            .unwrap();

        let found = db
            .get_all_by_date(Collection::Morning, "2024-01-01")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["id"], json!(id));
        assert_eq!(found[0]["intention"], "meditate");
    }

    #[wasm_bindgen_test(async)]
    async fn test_failed_write_all_rolls_back() {
        let db = IndexedDbGateway::new(StorageConfig::new("journal-idb-rollback"));
        db.write_all(
            Collection::Intentions,
            vec![record(json!({"date": "2024-01-01", "intention": "keep"}))],
        )
        .await
        .unwrap();

        let result = db
            .write_all(
                Collection::Intentions,
                vec![
                    record(json!({"id": 7, "date": "2024-02-01"})),
                    record(json!({"id": 7, "date": "2024-02-02"})),
                ],
            )
            .await;
        assert!(result.is_err());

        let all = db.read_all(Collection::Intentions).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["intention"], "keep");
    }
}
