use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::db;
use crate::derived::{self, Change, DashboardSummary};
use crate::error::{rules, StoreError, StoreResult};
use crate::migrate::{self, MigrationSummary};
use crate::model::{BusinessConfig, BusinessKind, Patch, Record};
use crate::observer::{WriteEvent, WriteObserver, WriteOp};
use crate::onboarding;
use crate::repo;
use crate::schema::Collection;

/// Masked account numbers: stars followed by the last few digits, like
/// "****0421". Full numbers never enter the store.
static ACCOUNT_MASK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\*[* \-]*[0-9]{2,4}$").expect("valid regex"));

/// Handle to one opened store. Cheap to share behind an `Arc`; every
/// write runs in its own transaction on the underlying pool.
pub struct Store {
    pool: SqlitePool,
    revision: AtomicI64,
    observers: Mutex<Vec<Arc<dyn WriteObserver>>>,
    migration: MigrationSummary,
}

impl Store {
    /// Open the store at `path`, creating it if needed, and bring its
    /// schema fully current before returning.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Store> {
        let pool = db::open_pool(path.as_ref()).await?;
        Store::from_pool(pool).await
    }

    /// In-memory store: same migrations, same seeding, nothing on disk.
    pub async fn open_in_memory() -> StoreResult<Store> {
        let pool = db::open_memory_pool().await?;
        Store::from_pool(pool).await
    }

    /// Migrate whatever the pool points at and wrap it.
    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Store> {
        let migration = migrate::apply_pending(&pool).await?;
        Ok(Store {
            pool,
            revision: AtomicI64::new(0),
            observers: Mutex::new(Vec::new()),
            migration,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// What the opening migration did.
    pub fn migration_summary(&self) -> &MigrationSummary {
        &self.migration
    }

    /// Monotonic write counter, bumped once per committed record write.
    /// Cheap to poll for cache invalidation.
    pub fn revision(&self) -> i64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Schema version currently on disk.
    pub async fn schema_version(&self) -> StoreResult<u32> {
        let mut conn = self.pool.acquire().await?;
        migrate::current_version(&mut conn).await
    }

    pub fn register_observer(&self, observer: Arc<dyn WriteObserver>) {
        self.observers
            .lock()
            .expect("observer registry poisoned")
            .push(observer);
    }

    fn notify(&self, events: &[WriteEvent]) {
        if events.is_empty() {
            return;
        }
        self.revision
            .fetch_add(events.len() as i64, Ordering::AcqRel);
        let observers = self.observers.lock().expect("observer registry poisoned");
        for event in events {
            for observer in observers.iter() {
                observer.record_written(event);
            }
        }
    }

    /// Insert a record. Meta is stamped fresh; derived fields the insert
    /// touches are recomputed before the transaction commits.
    pub async fn add<R: Record>(&self, record: R) -> StoreResult<String> {
        let collection = R::COLLECTION;
        let mut doc = repo::doc_of(&record)?;

        let mut tx = self.pool.begin().await?;
        normalize_doc(collection, &mut doc, None)?;
        validate_doc(&mut tx, collection, &doc, None).await?;
        let id = repo::insert_doc(&mut tx, collection, &mut doc).await?;
        derived::apply(&mut tx, collection, &Change::Added(doc)).await?;
        tx.commit().await?;

        info!(target: "tallybook", event = "record_added", collection = %collection, id = %id);
        self.notify(&[WriteEvent {
            collection,
            op: WriteOp::Added,
            id: id.clone(),
        }]);
        Ok(id)
    }

    pub async fn get<R: Record>(&self, id: &str) -> StoreResult<Option<R>> {
        let mut conn = self.pool.acquire().await?;
        repo::fetch_record(&mut conn, id).await
    }

    /// Like [`Store::get`] but absence is an error.
    pub async fn require<R: Record>(&self, id: &str) -> StoreResult<R> {
        self.get(id).await?.ok_or_else(|| StoreError::NotFound {
            collection: R::COLLECTION,
            id: id.to_string(),
        })
    }

    /// Every record, in insertion order.
    pub async fn get_all<R: Record>(&self) -> StoreResult<Vec<R>> {
        let mut conn = self.pool.acquire().await?;
        repo::list_records(&mut conn).await
    }

    /// Every record, sorted by a declared index.
    pub async fn get_all_ordered<R: Record>(&self, index: &str) -> StoreResult<Vec<R>> {
        let mut conn = self.pool.acquire().await?;
        repo::list_ordered(&mut conn, index).await
    }

    /// Records whose indexed field equals `value`, in insertion order.
    /// Passing `Value::Null` finds records that never set the field.
    pub async fn get_all_by_index<R: Record>(
        &self,
        index: &str,
        value: impl Into<Value>,
    ) -> StoreResult<Vec<R>> {
        let mut conn = self.pool.acquire().await?;
        repo::list_by_index(&mut conn, index, &value.into()).await
    }

    /// Merge a sparse patch onto the stored record. Identity and
    /// creation time are immutable; `updated_at` advances strictly.
    pub async fn update<P: Patch>(&self, id: &str, patch: P) -> StoreResult<()> {
        let collection = <P::Record as Record>::COLLECTION;
        let mut patch_doc = repo::doc_of(&patch)?;
        // Identity fields are never merged.
        patch_doc.remove("id");
        patch_doc.remove("created_at");
        patch_doc.remove("updated_at");
        patch_doc.remove("encrypted");

        let mut tx = self.pool.begin().await?;
        let before = repo::require_doc(&mut tx, collection, id).await?;
        let mut after = before.clone();
        for (key, value) in patch_doc {
            after.insert(key, value);
        }
        normalize_doc(collection, &mut after, Some(id))?;
        // Reparse through the typed record so a patch cannot leave the
        // document in a shape the model would refuse to read back.
        let _: P::Record = serde_json::from_value(Value::Object(after.clone()))?;
        validate_doc(&mut tx, collection, &after, Some(id)).await?;
        repo::update_doc(&mut tx, collection, id, &mut after).await?;
        derived::apply(&mut tx, collection, &Change::Updated { before, after }).await?;
        tx.commit().await?;

        info!(target: "tallybook", event = "record_updated", collection = %collection, id = %id);
        self.notify(&[WriteEvent {
            collection,
            op: WriteOp::Updated,
            id: id.to_string(),
        }]);
        Ok(())
    }

    /// Delete by id. Absent ids are a quiet no-op. The business profile
    /// is the one record that refuses to go; everything else, the default
    /// account included, deletes unconditionally.
    pub async fn delete<R: Record>(&self, id: &str) -> StoreResult<()> {
        let collection = R::COLLECTION;
        if collection == Collection::BusinessConfig {
            return Err(StoreError::violation(
                rules::CONFIG_UNDELETABLE,
                "the business profile cannot be deleted",
            ));
        }

        let mut tx = self.pool.begin().await?;
        let existing = match repo::delete_doc(&mut tx, collection, id).await? {
            Some(doc) => doc,
            None => return Ok(()),
        };
        derived::apply(&mut tx, collection, &Change::Deleted(existing)).await?;
        tx.commit().await?;

        info!(target: "tallybook", event = "record_deleted", collection = %collection, id = %id);
        self.notify(&[WriteEvent {
            collection,
            op: WriteOp::Deleted,
            id: id.to_string(),
        }]);
        Ok(())
    }

    /// Atomically hand the default flag to `id`, clearing any current
    /// holder in the same transaction.
    pub async fn set_default_account(&self, id: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let mut target = repo::require_doc(&mut tx, Collection::Accounts, id).await?;
        let mut events = Vec::new();

        let holders: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM accounts WHERE json_extract(data, '$.is_default') = 1 AND id != ?",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;
        for (holder,) in holders {
            let mut doc = repo::require_doc(&mut tx, Collection::Accounts, &holder).await?;
            doc.insert("is_default".to_string(), Value::Bool(false));
            repo::update_doc(&mut tx, Collection::Accounts, &holder, &mut doc).await?;
            events.push(WriteEvent {
                collection: Collection::Accounts,
                op: WriteOp::Updated,
                id: holder,
            });
        }
        if !doc_bool(&target, "is_default") {
            target.insert("is_default".to_string(), Value::Bool(true));
            repo::update_doc(&mut tx, Collection::Accounts, id, &mut target).await?;
            events.push(WriteEvent {
                collection: Collection::Accounts,
                op: WriteOp::Updated,
                id: id.to_string(),
            });
        }
        tx.commit().await?;
        self.notify(&events);
        Ok(())
    }

    /// First-run setup: writes the business profile and seeds whatever
    /// the chosen kind needs, as one transaction. Returns the profile id.
    pub async fn complete_onboarding(
        &self,
        kind: BusinessKind,
        name: &str,
    ) -> StoreResult<String> {
        let outcome = onboarding::complete_onboarding(&self.pool, kind, name).await?;
        self.notify(&outcome.events);
        Ok(outcome.profile_id)
    }

    /// The singleton business profile, if onboarding ever ran.
    pub async fn business_config(&self) -> StoreResult<Option<BusinessConfig>> {
        let mut conn = self.pool.acquire().await?;
        repo::first_record(&mut conn).await
    }

    /// Net income and cash position over `[from, to]`, epoch ms
    /// inclusive. Computed from the ledger on every call.
    pub async fn dashboard_summary(&self, from: i64, to: i64) -> StoreResult<DashboardSummary> {
        let mut conn = self.pool.acquire().await?;
        derived::dashboard_summary(&mut conn, from, to).await
    }

    /// Row counts per collection.
    pub async fn collection_counts(&self) -> StoreResult<Vec<(Collection, i64)>> {
        let mut conn = self.pool.acquire().await?;
        let mut counts = Vec::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            counts.push((collection, repo::count(&mut conn, collection).await?));
        }
        Ok(counts)
    }
}

fn doc_str<'a>(doc: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    doc.get(key).and_then(Value::as_str)
}

fn doc_i64(doc: &Map<String, Value>, key: &str) -> i64 {
    doc.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn doc_bool(doc: &Map<String, Value>, key: &str) -> bool {
    doc.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Collection-specific rewrites applied before any write persists.
fn normalize_doc(
    collection: Collection,
    doc: &mut Map<String, Value>,
    current_id: Option<&str>,
) -> StoreResult<()> {
    match collection {
        Collection::Invoices => derived::normalize_invoice(doc)?,
        // Completion state belongs to the onboarding flow; a profile
        // written through `add` starts unfinished.
        Collection::BusinessConfig if current_id.is_none() => {
            doc.insert("setup_complete".to_string(), Value::Bool(false));
            doc.remove("onboarded_at");
        }
        _ => {}
    }
    Ok(())
}

async fn validate_doc(
    conn: &mut SqliteConnection,
    collection: Collection,
    doc: &Map<String, Value>,
    current_id: Option<&str>,
) -> StoreResult<()> {
    match collection {
        Collection::Accounts => validate_account(conn, doc, current_id).await,
        Collection::Transactions => validate_transaction(conn, doc).await,
        Collection::Transfers => validate_transfer(conn, doc).await,
        Collection::ClientFiles => validate_client_file(conn, doc).await,
        Collection::FileExpenses | Collection::ExtraFees => validate_file_child(conn, doc).await,
        Collection::Invoices => validate_invoice(doc),
        Collection::BusinessConfig => validate_config(conn, current_id).await,
        Collection::Products | Collection::Services => validate_priced_item(doc),
        _ => Ok(()),
    }
}

fn require_non_negative(doc: &Map<String, Value>, field: &str) -> StoreResult<()> {
    let value = doc_i64(doc, field);
    if value < 0 {
        return Err(StoreError::violation(
            rules::AMOUNT_NEGATIVE,
            format!("{field} must not be negative, got {value}"),
        ));
    }
    Ok(())
}

/// Checked reference: the target row must exist at write time.
async fn require_exists(
    conn: &mut SqliteConnection,
    collection: Collection,
    id: &str,
) -> StoreResult<()> {
    if repo::fetch_doc(conn, collection, id).await?.is_none() {
        return Err(StoreError::violation(
            rules::REFERENCE_MISSING,
            format!("{collection} {id} does not exist"),
        ));
    }
    Ok(())
}

async fn validate_account(
    conn: &mut SqliteConnection,
    doc: &Map<String, Value>,
    current_id: Option<&str>,
) -> StoreResult<()> {
    if let Some(number) = doc_str(doc, "account_number") {
        if !number.is_empty() && !ACCOUNT_MASK.is_match(number) {
            return Err(StoreError::violation(
                rules::ACCOUNT_NUMBER_MASK,
                format!("{number:?} is not a masked account number"),
            ));
        }
    }
    if doc_bool(doc, "is_default") {
        ensure_sole_default(conn, current_id).await?;
    }
    Ok(())
}

/// At most one default account may exist store-wide.
async fn ensure_sole_default(
    conn: &mut SqliteConnection,
    allow_id: Option<&str>,
) -> StoreResult<()> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT id FROM accounts WHERE json_extract(data, '$.is_default') = 1")
            .fetch_all(&mut *conn)
            .await?;
    for (id,) in rows {
        if Some(id.as_str()) != allow_id {
            return Err(StoreError::violation(
                rules::ACCOUNT_DEFAULT_UNIQUE,
                format!("account {id} is already the default"),
            ));
        }
    }
    Ok(())
}

async fn validate_transaction(
    conn: &mut SqliteConnection,
    doc: &Map<String, Value>,
) -> StoreResult<()> {
    require_non_negative(doc, "amount")?;
    if doc_str(doc, "customer_id").is_some() && doc_str(doc, "vendor_id").is_some() {
        return Err(StoreError::violation(
            rules::COUNTERPARTY_EXCLUSIVE,
            "a transaction names a customer or a vendor, never both",
        ));
    }
    if doc_str(doc, "product_id").is_some() && doc_str(doc, "service_id").is_some() {
        return Err(StoreError::violation(
            rules::ITEM_LINK_EXCLUSIVE,
            "a transaction links a product or a service, never both",
        ));
    }
    if let Some(account) = doc_str(doc, "account_id") {
        require_exists(conn, Collection::Accounts, account).await?;
    }
    if let Some(file) = doc_str(doc, "client_file_id") {
        require_exists(conn, Collection::ClientFiles, file).await?;
    }
    Ok(())
}

async fn validate_transfer(
    conn: &mut SqliteConnection,
    doc: &Map<String, Value>,
) -> StoreResult<()> {
    let amount = doc_i64(doc, "amount");
    if amount <= 0 {
        return Err(StoreError::violation(
            rules::TRANSFER_AMOUNT_POSITIVE,
            format!("transfer amount must be positive, got {amount}"),
        ));
    }
    let from = doc_str(doc, "from_account_id").unwrap_or_default();
    let to = doc_str(doc, "to_account_id").unwrap_or_default();
    if from == to {
        return Err(StoreError::violation(
            rules::TRANSFER_SAME_ACCOUNT,
            format!("transfer endpoints must differ, both are {from:?}"),
        ));
    }
    require_exists(conn, Collection::Accounts, from).await?;
    require_exists(conn, Collection::Accounts, to).await?;
    Ok(())
}

async fn validate_client_file(
    conn: &mut SqliteConnection,
    doc: &Map<String, Value>,
) -> StoreResult<()> {
    require_non_negative(doc, "fees_to_be_paid")?;
    require_non_negative(doc, "deposit_paid")?;
    let client = doc_str(doc, "client_id").unwrap_or_default();
    require_exists(conn, Collection::Clients, client).await
}

async fn validate_file_child(
    conn: &mut SqliteConnection,
    doc: &Map<String, Value>,
) -> StoreResult<()> {
    require_non_negative(doc, "amount")?;
    let file = doc_str(doc, "client_file_id").unwrap_or_default();
    require_exists(conn, Collection::ClientFiles, file).await
}

fn validate_invoice(doc: &Map<String, Value>) -> StoreResult<()> {
    require_non_negative(doc, "tax_rate_bps")?;
    if let Some(lines) = doc.get("lines").and_then(Value::as_array) {
        for line in lines {
            if let Some(line) = line.as_object() {
                require_non_negative(line, "quantity")?;
                require_non_negative(line, "unit_price")?;
            }
        }
    }
    Ok(())
}

/// The profile is a singleton; only the row that already exists may be
/// written again.
async fn validate_config(
    conn: &mut SqliteConnection,
    current_id: Option<&str>,
) -> StoreResult<()> {
    if current_id.is_some() {
        return Ok(());
    }
    if repo::count(conn, Collection::BusinessConfig).await? > 0 {
        return Err(StoreError::violation(
            rules::CONFIG_SINGLETON,
            "a business profile already exists",
        ));
    }
    Ok(())
}

fn validate_priced_item(doc: &Map<String, Value>) -> StoreResult<()> {
    if doc.contains_key("unit_price") {
        require_non_negative(doc, "unit_price")?;
    }
    if doc.contains_key("hourly_rate") {
        require_non_negative(doc, "hourly_rate")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_mask_accepts_masked_forms_only() {
        for ok in ["****0421", "****0000", "**** 1234", "*-99"] {
            assert!(ACCOUNT_MASK.is_match(ok), "{ok} should match");
        }
        for bad in ["1234", "12345678", "acct-1", "*", "****0421x", "0421****"] {
            assert!(!ACCOUNT_MASK.is_match(bad), "{bad} should not match");
        }
    }
}
