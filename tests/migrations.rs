mod util;

use anyhow::Result;
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use tallybook::model::{Account, AccountKind, ExpenseCategory, Transaction, TransactionKind};
use tallybook::{Collection, Store, StoreError, SCHEMA_VERSION};
use tempfile::tempdir;

const TOTAL_STEPS: u32 = 12 + 9 + 8 + 15;

async fn connect(db_path: &Path) -> Result<SqlitePool> {
    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await?;
    Ok(pool)
}

async fn assert_table_exists(pool: &SqlitePool, name: &str) -> Result<()> {
    let exists: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM sqlite_master WHERE type='table' AND name=?")
            .bind(name)
            .fetch_optional(pool)
            .await?;
    assert!(exists.is_some(), "expected table `{name}`");
    Ok(())
}

async fn assert_index_state(pool: &SqlitePool, name: &str, present: bool) -> Result<()> {
    let exists: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM sqlite_master WHERE type='index' AND name=?")
            .bind(name)
            .fetch_optional(pool)
            .await?;
    assert_eq!(
        exists.is_some(),
        present,
        "index `{name}` presence mismatch"
    );
    Ok(())
}

async fn insert_doc_raw(
    pool: &SqlitePool,
    table: &str,
    id: &str,
    doc: serde_json::Value,
) -> Result<()> {
    let created = doc.get("created_at").and_then(|v| v.as_i64()).unwrap_or(0);
    let updated = doc
        .get("updated_at")
        .and_then(|v| v.as_i64())
        .unwrap_or(created);
    sqlx::query(&format!(
        "INSERT INTO {table} (id, data, created_at, updated_at) VALUES (?, ?, ?, ?)"
    ))
    .bind(id)
    .bind(doc.to_string())
    .bind(created)
    .bind(updated)
    .execute(pool)
    .await?;
    Ok(())
}

/// Hand-build a database exactly as the first release left it: seven
/// tables, five expression indexes, version 1 on record.
async fn seed_v1_store(pool: &SqlitePool) -> Result<()> {
    for table in [
        "accounts",
        "transactions",
        "clients",
        "client_files",
        "file_expenses",
        "invoices",
        "settings",
    ] {
        sqlx::query(&format!(
            "CREATE TABLE {table} (\
               id TEXT PRIMARY KEY,\
               data TEXT NOT NULL,\
               created_at INTEGER NOT NULL,\
               updated_at INTEGER NOT NULL\
             )"
        ))
        .execute(pool)
        .await?;
    }
    for (index, table, path) in [
        ("idx_transactions_date", "transactions", "$.date"),
        ("idx_transactions_type", "transactions", "$.type"),
        ("idx_client_files_client", "client_files", "$.client_id"),
        ("idx_file_expenses_file", "file_expenses", "$.client_file_id"),
        ("idx_settings_key", "settings", "$.key"),
    ] {
        sqlx::query(&format!(
            "CREATE INDEX {index} ON {table} (json_extract(data, '{path}'))"
        ))
        .execute(pool)
        .await?;
    }
    sqlx::query(
        "CREATE TABLE store_meta (\
           id INTEGER PRIMARY KEY CHECK (id = 1),\
           schema_version INTEGER NOT NULL,\
           migrated_at INTEGER NOT NULL\
         )",
    )
    .execute(pool)
    .await?;
    sqlx::query("INSERT INTO store_meta (id, schema_version, migrated_at) VALUES (1, 1, 0)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE TABLE schema_history (\
           version INTEGER PRIMARY KEY,\
           applied_at INTEGER NOT NULL,\
           steps INTEGER NOT NULL\
         )",
    )
    .execute(pool)
    .await?;
    sqlx::query("INSERT INTO schema_history (version, applied_at, steps) VALUES (1, 0, 12)")
        .execute(pool)
        .await?;

    insert_doc_raw(
        pool,
        "accounts",
        "acct-legacy",
        json!({
            "id": "acct-legacy",
            "name": "Main",
            "bank": "First National",
            "balance": 15000,
            "created_at": 1000,
            "updated_at": 1000,
        }),
    )
    .await?;
    insert_doc_raw(
        pool,
        "transactions",
        "tx-credit",
        json!({
            "id": "tx-credit",
            "type": "credit",
            "amount": 15000,
            "date": 1000,
            "account_id": "acct-legacy",
            "created_at": 1000,
            "updated_at": 1000,
        }),
    )
    .await?;
    insert_doc_raw(
        pool,
        "transactions",
        "tx-debit",
        json!({
            "id": "tx-debit",
            "type": "debit",
            "amount": 4000,
            "date": 2000,
            "account_id": "acct-legacy",
            "created_at": 1000,
            "updated_at": 1000,
        }),
    )
    .await?;
    Ok(())
}

#[tokio::test]
async fn fresh_store_migrates_to_current_and_seeds_catalogue() -> Result<()> {
    let store = util::memory_store().await;
    let summary = *store.migration_summary();
    assert_eq!(summary.previous_version, 0);
    assert_eq!(summary.version, SCHEMA_VERSION);
    assert_eq!(summary.steps_applied, TOTAL_STEPS);
    assert_eq!(summary.seed.categories, 12);
    // Accounts and sample clients wait for onboarding to declare a kind.
    assert_eq!(summary.seed.accounts, 0);
    assert_eq!(summary.seed.clients, 0);
    assert_eq!(store.schema_version().await?, SCHEMA_VERSION);

    for (collection, rows) in store.collection_counts().await? {
        let expected = if collection == Collection::ExpenseCategories {
            12
        } else {
            0
        };
        assert_eq!(rows, expected, "{collection} row count");
    }
    Ok(())
}

#[tokio::test]
async fn migrated_schema_has_declared_tables_and_indexes() -> Result<()> {
    let store = util::memory_store().await;
    let pool = store.pool();

    for name in [
        "accounts",
        "transactions",
        "transfers",
        "clients",
        "client_files",
        "file_expenses",
        "extra_fees",
        "invoices",
        "products",
        "services",
        "expense_categories",
        "business_config",
        "settings",
        "store_meta",
        "schema_history",
    ] {
        assert_table_exists(pool, name).await?;
    }
    assert_index_state(pool, "idx_transactions_date", true).await?;
    assert_index_state(pool, "idx_transactions_kind", true).await?;
    assert_index_state(pool, "idx_transactions_type", false).await?;
    assert_index_state(pool, "idx_transfers_from_account", true).await?;
    assert_index_state(pool, "idx_expense_categories_applicability", true).await?;

    let history: Vec<(i64, i64)> =
        sqlx::query_as("SELECT version, steps FROM schema_history ORDER BY version")
            .fetch_all(pool)
            .await?;
    assert_eq!(history, vec![(1, 12), (2, 9), (3, 8), (4, 15)]);
    Ok(())
}

#[tokio::test]
async fn reopen_applies_nothing_and_reseeds_nothing() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("tallybook.sqlite3");

    let first = Store::open(&db_path).await?;
    assert_eq!(first.migration_summary().steps_applied, TOTAL_STEPS);
    // A category the user removed must not resurrect on reopen.
    let categories = first.get_all::<ExpenseCategory>().await?;
    first
        .delete::<ExpenseCategory>(&categories[0].meta.id)
        .await?;
    first.pool().close().await;

    let second = Store::open(&db_path).await?;
    assert_eq!(second.migration_summary().steps_applied, 0);
    assert!(!second.migration_summary().seed.seeded_anything());
    assert_eq!(second.get_all::<ExpenseCategory>().await?.len(), 11);
    Ok(())
}

#[tokio::test]
async fn v1_store_upgrades_in_place() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("legacy.sqlite3");
    let pool = connect(&db_path).await?;
    seed_v1_store(&pool).await?;
    pool.close().await;

    let store = Store::open(&db_path).await?;
    let summary = store.migration_summary();
    assert_eq!(summary.previous_version, 1);
    assert_eq!(summary.version, SCHEMA_VERSION);
    assert_eq!(summary.steps_applied, 9 + 8 + 15);
    // No business profile existed, so only the category catalogue seeds.
    assert_eq!(summary.seed.categories, 12);
    assert_eq!(summary.seed.accounts, 0);
    assert_eq!(summary.seed.clients, 0);

    let account: Account = store.require("acct-legacy").await?;
    assert_eq!(account.bank_name, "First National");
    assert_eq!(account.account_type, AccountKind::Checking);
    assert_eq!(account.account_number, "****0000");
    assert!(!account.is_default);
    assert!(account.is_active);
    assert_eq!(account.balance, 15000);
    assert_eq!(account.meta.created_at, 1000, "transforms keep timestamps");

    let credit: Transaction = store.require("tx-credit").await?;
    assert_eq!(credit.kind, TransactionKind::Income);
    assert!(credit.tags.is_empty());
    let debit: Transaction = store.require("tx-debit").await?;
    assert_eq!(debit.kind, TransactionKind::Expense);

    // The legacy field is gone from the stored document, not just hidden
    // by the typed view.
    let raw: String =
        sqlx::query_scalar("SELECT data FROM transactions WHERE id = 'tx-credit'")
            .fetch_one(store.pool())
            .await?;
    let doc: serde_json::Value = serde_json::from_str(&raw)?;
    assert!(doc.get("type").is_none());
    assert_eq!(doc["kind"], json!("income"));

    assert_index_state(store.pool(), "idx_transactions_type", false).await?;
    assert_index_state(store.pool(), "idx_transactions_kind", true).await?;

    let incomes = store
        .get_all_by_index::<Transaction>("kind", "income")
        .await?;
    assert_eq!(incomes.len(), 1);
    assert_eq!(incomes[0].meta.id, "tx-credit");
    Ok(())
}

#[tokio::test]
async fn refuses_stores_from_the_future() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("future.sqlite3");
    let pool = connect(&db_path).await?;
    sqlx::query(
        "CREATE TABLE store_meta (\
           id INTEGER PRIMARY KEY CHECK (id = 1),\
           schema_version INTEGER NOT NULL,\
           migrated_at INTEGER NOT NULL\
         )",
    )
    .execute(&pool)
    .await?;
    sqlx::query("INSERT INTO store_meta (id, schema_version, migrated_at) VALUES (1, 9, 0)")
        .execute(&pool)
        .await?;
    pool.close().await;

    let err = match Store::open(&db_path).await {
        Ok(_) => panic!("a v9 store must not open"),
        Err(err) => err,
    };
    match err {
        StoreError::MigrationFailed {
            last_good_version,
            failed_version,
            ..
        } => {
            assert_eq!(last_good_version, 9);
            assert_eq!(failed_version, 9);
        }
        other => panic!("expected MigrationFailed, got {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn failed_upgrade_rolls_back_to_last_good_version() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("wedged.sqlite3");
    let store = Store::open(&db_path).await?;
    // Rewind the recorded version so v4 replays; its kind index already
    // exists, so the replayed CREATE INDEX must fail.
    sqlx::query("UPDATE store_meta SET schema_version = 3")
        .execute(store.pool())
        .await?;
    store.pool().close().await;

    let err = match Store::open(&db_path).await {
        Ok(_) => panic!("index collision must fail the upgrade"),
        Err(err) => err,
    };
    match err {
        StoreError::MigrationFailed {
            last_good_version,
            failed_version,
            ..
        } => {
            assert_eq!(last_good_version, 3);
            assert_eq!(failed_version, 4);
        }
        other => panic!("expected MigrationFailed, got {other}"),
    }

    let pool = connect(&db_path).await?;
    let version: i64 = sqlx::query_scalar("SELECT schema_version FROM store_meta WHERE id = 1")
        .fetch_one(&pool)
        .await?;
    assert_eq!(version, 3, "failed attempt must leave the version alone");
    let ok: String = sqlx::query_scalar("PRAGMA integrity_check;")
        .fetch_one(&pool)
        .await?;
    assert_eq!(ok, "ok");
    pool.close().await;
    Ok(())
}
