use serde::ser::Error as _;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::SqliteConnection;

use crate::error::{StoreError, StoreResult};
use crate::id::new_uuid_v7;
use crate::model::Record;
use crate::schema::{Collection, IndexDef};
use crate::time::{now_after, now_ms};

type DocQuery<'q> =
    sqlx::query::QueryAs<'q, sqlx::Sqlite, (String,), sqlx::sqlite::SqliteArguments<'q>>;

/// Serialize any record-shaped value into its document map.
pub(crate) fn doc_of<T: Serialize>(value: &T) -> StoreResult<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::Serde(serde_json::Error::custom(
            "record did not serialize to an object",
        ))),
    }
}

pub(crate) fn resolve_index(collection: Collection, name: &str) -> StoreResult<&'static IndexDef> {
    collection.index(name).ok_or_else(|| StoreError::UnknownIndex {
        collection,
        index: name.to_string(),
    })
}

fn decode_all<R: Record>(rows: Vec<(String,)>) -> StoreResult<Vec<R>> {
    rows.into_iter()
        .map(|(raw,)| serde_json::from_str(&raw).map_err(StoreError::from))
        .collect()
}

/// Stamp meta fields into `doc` and insert it. The id and both
/// timestamps are always assigned here; whatever the caller put in the
/// meta block is overwritten.
pub(crate) async fn insert_doc(
    conn: &mut SqliteConnection,
    collection: Collection,
    doc: &mut Map<String, Value>,
) -> StoreResult<String> {
    let id = new_uuid_v7();
    let now = now_ms();
    doc.insert("id".to_string(), Value::from(id.clone()));
    doc.insert("created_at".to_string(), Value::from(now));
    doc.insert("updated_at".to_string(), Value::from(now));
    doc.entry("encrypted").or_insert(Value::Bool(false));

    let data = serde_json::to_string(&*doc)?;
    let sql = format!(
        "INSERT INTO {} (id, data, created_at, updated_at) VALUES (?, ?, ?, ?)",
        collection.as_str()
    );
    sqlx::query(&sql)
        .bind(&id)
        .bind(&data)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::from_insert(e, collection, &id))?;
    Ok(id)
}

pub(crate) async fn fetch_doc(
    conn: &mut SqliteConnection,
    collection: Collection,
    id: &str,
) -> StoreResult<Option<Map<String, Value>>> {
    let sql = format!("SELECT data FROM {} WHERE id = ?", collection.as_str());
    let row: Option<(String,)> = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some((raw,)) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub(crate) async fn require_doc(
    conn: &mut SqliteConnection,
    collection: Collection,
    id: &str,
) -> StoreResult<Map<String, Value>> {
    fetch_doc(conn, collection, id)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            collection,
            id: id.to_string(),
        })
}

pub(crate) async fn fetch_record<R: Record>(
    conn: &mut SqliteConnection,
    id: &str,
) -> StoreResult<Option<R>> {
    let sql = format!("SELECT data FROM {} WHERE id = ?", R::COLLECTION.as_str());
    let row: Option<(String,)> = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|(raw,)| serde_json::from_str(&raw).map_err(StoreError::from))
        .transpose()
}

/// Oldest record by insertion order, for singleton-style collections.
pub(crate) async fn first_record<R: Record>(
    conn: &mut SqliteConnection,
) -> StoreResult<Option<R>> {
    let sql = format!(
        "SELECT data FROM {} ORDER BY rowid LIMIT 1",
        R::COLLECTION.as_str()
    );
    let row: Option<(String,)> = sqlx::query_as(&sql).fetch_optional(&mut *conn).await?;
    row.map(|(raw,)| serde_json::from_str(&raw).map_err(StoreError::from))
        .transpose()
}

/// All records in insertion order.
pub(crate) async fn list_records<R: Record>(conn: &mut SqliteConnection) -> StoreResult<Vec<R>> {
    let sql = format!("SELECT data FROM {} ORDER BY rowid", R::COLLECTION.as_str());
    let rows: Vec<(String,)> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
    decode_all(rows)
}

/// All records sorted by a declared index, insertion order as tiebreak.
pub(crate) async fn list_ordered<R: Record>(
    conn: &mut SqliteConnection,
    index: &str,
) -> StoreResult<Vec<R>> {
    let ix = resolve_index(R::COLLECTION, index)?;
    let sql = format!(
        "SELECT data FROM {} ORDER BY json_extract(data, '{}'), rowid",
        R::COLLECTION.as_str(),
        ix.json_path()
    );
    let rows: Vec<(String,)> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
    decode_all(rows)
}

/// Records whose indexed field equals `value`, in insertion order.
/// A null value matches records that never set the field: json_extract
/// yields NULL for missing and explicit-null alike.
pub(crate) async fn list_by_index<R: Record>(
    conn: &mut SqliteConnection,
    index: &str,
    value: &Value,
) -> StoreResult<Vec<R>> {
    let ix = resolve_index(R::COLLECTION, index)?;
    let table = R::COLLECTION.as_str();
    let rows: Vec<(String,)> = if value.is_null() {
        let sql = format!(
            "SELECT data FROM {table} WHERE json_extract(data, '{path}') IS NULL ORDER BY rowid",
            path = ix.json_path()
        );
        sqlx::query_as(&sql).fetch_all(&mut *conn).await?
    } else {
        let sql = format!(
            "SELECT data FROM {table} WHERE json_extract(data, '{path}') = ? ORDER BY rowid",
            path = ix.json_path()
        );
        bind_index_value(sqlx::query_as(&sql), value)
            .fetch_all(&mut *conn)
            .await?
    };
    decode_all(rows)
}

fn bind_index_value<'q>(query: DocQuery<'q>, value: &Value) -> DocQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64())
            }
        }
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

/// Persist a full document for an existing id, advancing `updated_at`
/// strictly past its previous value even within one millisecond.
pub(crate) async fn update_doc(
    conn: &mut SqliteConnection,
    collection: Collection,
    id: &str,
    doc: &mut Map<String, Value>,
) -> StoreResult<()> {
    let prev = doc.get("updated_at").and_then(Value::as_i64).unwrap_or(0);
    let stamp = now_after(prev);
    doc.insert("updated_at".to_string(), Value::from(stamp));
    let data = serde_json::to_string(&*doc)?;
    let sql = format!(
        "UPDATE {} SET data = ?, updated_at = ? WHERE id = ?",
        collection.as_str()
    );
    let res = sqlx::query(&sql)
        .bind(&data)
        .bind(stamp)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    if res.rows_affected() == 0 {
        return Err(StoreError::NotFound {
            collection,
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Rewrite a document after a derived-field recompute. Derived upkeep
/// is not a user edit, so timestamps stay as they were.
pub(crate) async fn write_derived(
    conn: &mut SqliteConnection,
    collection: Collection,
    id: &str,
    doc: &Map<String, Value>,
) -> StoreResult<()> {
    let data = serde_json::to_string(doc)?;
    let sql = format!("UPDATE {} SET data = ? WHERE id = ?", collection.as_str());
    sqlx::query(&sql)
        .bind(&data)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Delete one row. Missing ids are a no-op so deletes stay idempotent;
/// the caller learns whether anything actually went away.
pub(crate) async fn delete_doc(
    conn: &mut SqliteConnection,
    collection: Collection,
    id: &str,
) -> StoreResult<Option<Map<String, Value>>> {
    let existing = fetch_doc(conn, collection, id).await?;
    if existing.is_some() {
        let sql = format!("DELETE FROM {} WHERE id = ?", collection.as_str());
        sqlx::query(&sql).bind(id).execute(&mut *conn).await?;
    }
    Ok(existing)
}

pub(crate) async fn count(conn: &mut SqliteConnection, collection: Collection) -> StoreResult<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", collection.as_str());
    let (n,): (i64,) = sqlx::query_as(&sql).fetch_one(&mut *conn).await?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_of_rejects_non_objects() {
        assert!(doc_of(&serde_json::json!(42)).is_err());
        assert!(doc_of(&serde_json::json!({"ok": true})).is_ok());
    }

    #[test]
    fn resolve_index_knows_the_declared_view() {
        assert!(resolve_index(Collection::Transactions, "date").is_ok());
        let err = resolve_index(Collection::Transactions, "colour").unwrap_err();
        match err {
            StoreError::UnknownIndex { collection, index } => {
                assert_eq!(collection, Collection::Transactions);
                assert_eq!(index, "colour");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
