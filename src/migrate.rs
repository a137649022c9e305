use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{error, info};

use crate::error::{rules, StoreError, StoreResult};
use crate::model::BusinessConfig;
use crate::repo;
use crate::schema::{steps_for, Collection, MigrationStep, TransformFn, SCHEMA_VERSION};
use crate::seed::{self, SeedReport};
use crate::time::now_ms;

/// Outcome of one open: where the store was, where it is now, and how
/// much work that took. `steps_applied` stays 0 on a no-op reopen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationSummary {
    pub previous_version: u32,
    pub version: u32,
    pub steps_applied: u32,
    pub seed: SeedReport,
}

/// Version recorded on disk; 0 means a store that has never migrated.
pub async fn current_version(conn: &mut SqliteConnection) -> StoreResult<u32> {
    let has_meta: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'store_meta'",
    )
    .fetch_optional(&mut *conn)
    .await?;
    if has_meta.is_none() {
        return Ok(0);
    }
    let version: Option<i64> =
        sqlx::query_scalar("SELECT schema_version FROM store_meta WHERE id = 1")
            .fetch_optional(&mut *conn)
            .await?;
    Ok(version.unwrap_or(0) as u32)
}

/// Bring the store up to `SCHEMA_VERSION`. Every pending version's
/// steps, seeding included, commit as one transaction: a crash at any
/// point leaves the store wholly at the old version, and the next open
/// takes this same path again.
pub async fn apply_pending(pool: &SqlitePool) -> StoreResult<MigrationSummary> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS store_meta (\
           id INTEGER PRIMARY KEY CHECK (id = 1),\
           schema_version INTEGER NOT NULL,\
           migrated_at INTEGER NOT NULL\
         )",
    )
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_history (\
           version INTEGER PRIMARY KEY,\
           applied_at INTEGER NOT NULL,\
           steps INTEGER NOT NULL\
         )",
    )
    .execute(&mut *tx)
    .await?;

    let from = current_version(&mut tx).await?;
    if from > SCHEMA_VERSION {
        return Err(StoreError::MigrationFailed {
            last_good_version: from,
            failed_version: from,
            source: Box::new(StoreError::violation(
                rules::SCHEMA_AHEAD,
                format!("store is at schema v{from}, this build supports up to v{SCHEMA_VERSION}"),
            )),
        });
    }
    if from == SCHEMA_VERSION {
        tx.commit().await?;
        info!(target: "tallybook", event = "migration_noop", version = from);
        return Ok(MigrationSummary {
            previous_version: from,
            version: from,
            steps_applied: 0,
            seed: SeedReport::default(),
        });
    }

    info!(target: "tallybook", event = "migration_begin", from, to = SCHEMA_VERSION);
    let mut steps_applied = 0u32;
    for version in (from + 1)..=SCHEMA_VERSION {
        let steps = steps_for(version);
        for step in steps {
            execute_step(&mut tx, version, step)
                .await
                .map_err(|source| migration_failed(from, version, source))?;
            steps_applied += 1;
        }
        sqlx::query("INSERT INTO schema_history (version, applied_at, steps) VALUES (?, ?, ?)")
            .bind(version as i64)
            .bind(now_ms())
            .bind(steps.len() as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| migration_failed(from, version, e.into()))?;
    }

    let kind = repo::first_record::<BusinessConfig>(&mut tx)
        .await
        .map_err(|e| migration_failed(from, SCHEMA_VERSION, e))?
        .map(|config| config.business_kind);
    let seed = seed::seed_defaults(&mut tx, kind)
        .await
        .map_err(|e| migration_failed(from, SCHEMA_VERSION, e))?;

    sqlx::query(
        "INSERT INTO store_meta (id, schema_version, migrated_at) VALUES (1, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET schema_version = excluded.schema_version, \
         migrated_at = excluded.migrated_at",
    )
    .bind(SCHEMA_VERSION as i64)
    .bind(now_ms())
    .execute(&mut *tx)
    .await
    .map_err(|e| migration_failed(from, SCHEMA_VERSION, e.into()))?;

    tx.commit()
        .await
        .map_err(|e| migration_failed(from, SCHEMA_VERSION, e.into()))?;
    info!(
        target: "tallybook",
        event = "migration_complete",
        from,
        to = SCHEMA_VERSION,
        steps = steps_applied
    );
    Ok(MigrationSummary {
        previous_version: from,
        version: SCHEMA_VERSION,
        steps_applied,
        seed,
    })
}

fn migration_failed(last_good: u32, failed: u32, source: StoreError) -> StoreError {
    match source {
        already @ StoreError::MigrationFailed { .. } => already,
        source => StoreError::MigrationFailed {
            last_good_version: last_good,
            failed_version: failed,
            source: Box::new(source),
        },
    }
}

async fn execute_step(
    tx: &mut Transaction<'static, Sqlite>,
    version: u32,
    step: &MigrationStep,
) -> StoreResult<()> {
    info!(target: "tallybook", event = "migration_step", version, step = %step.describe());
    let outcome = match step {
        MigrationStep::CreateCollection(collection) => create_collection(tx, *collection).await,
        MigrationStep::CreateIndex {
            collection,
            name,
            field,
        } => create_index(tx, *collection, name, field).await,
        MigrationStep::DropIndex { collection, name } => drop_index(tx, *collection, name).await,
        MigrationStep::Transform {
            collection,
            name,
            apply,
        } => run_transform(tx, *collection, name, *apply).await,
    };
    if let Err(ref e) = outcome {
        error!(
            target: "tallybook",
            event = "migration_step_error",
            version,
            step = %step.describe(),
            error = %e
        );
    }
    outcome
}

/// Uniform document-table shape. Entity fields live in `data`; lookups
/// beyond the primary key go through expression indexes over it.
async fn create_collection(
    tx: &mut Transaction<'static, Sqlite>,
    collection: Collection,
) -> StoreResult<()> {
    let sql = format!(
        "CREATE TABLE {} (\
           id TEXT PRIMARY KEY,\
           data TEXT NOT NULL,\
           created_at INTEGER NOT NULL,\
           updated_at INTEGER NOT NULL\
         )",
        collection.as_str()
    );
    sqlx::query(&sql).execute(&mut **tx).await?;
    Ok(())
}

async fn create_index(
    tx: &mut Transaction<'static, Sqlite>,
    collection: Collection,
    name: &str,
    field: &str,
) -> StoreResult<()> {
    let sql = format!(
        "CREATE INDEX idx_{table}_{name} ON {table} (json_extract(data, '$.{field}'))",
        table = collection.as_str()
    );
    sqlx::query(&sql).execute(&mut **tx).await?;
    Ok(())
}

/// IF EXISTS keeps hand-assembled legacy stores importable; the step
/// itself is still version-gated like every other.
async fn drop_index(
    tx: &mut Transaction<'static, Sqlite>,
    collection: Collection,
    name: &str,
) -> StoreResult<()> {
    let sql = format!("DROP INDEX IF EXISTS idx_{}_{}", collection.as_str(), name);
    sqlx::query(&sql).execute(&mut **tx).await?;
    Ok(())
}

/// Stream every row through the transform, rewriting only changed docs.
/// A row that fails to parse fails the step, and with it the upgrade.
async fn run_transform(
    tx: &mut Transaction<'static, Sqlite>,
    collection: Collection,
    name: &str,
    apply: TransformFn,
) -> StoreResult<()> {
    let select = format!("SELECT id, data FROM {} ORDER BY rowid", collection.as_str());
    let rows: Vec<(String, String)> = sqlx::query_as(&select).fetch_all(&mut **tx).await?;
    let update = format!("UPDATE {} SET data = ? WHERE id = ?", collection.as_str());
    let total = rows.len();
    let mut rewritten = 0usize;
    for (id, raw) in rows {
        let mut doc: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&raw)?;
        if apply(&mut doc) {
            let data = serde_json::to_string(&doc)?;
            sqlx::query(&update)
                .bind(&data)
                .bind(&id)
                .execute(&mut **tx)
                .await?;
            rewritten += 1;
        }
    }
    info!(
        target: "tallybook",
        event = "migration_transform",
        collection = %collection,
        transform = name,
        rows = total,
        rewritten
    );
    Ok(())
}
