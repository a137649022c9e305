use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::SqliteConnection;
use tracing::warn;

use crate::error::StoreResult;
use crate::model::InvoiceLine;
use crate::repo;
use crate::schema::Collection;

/// What an in-flight write did, expressed as full documents. Derived
/// upkeep runs against the same transaction before it commits, so a
/// reader can never observe a stale total.
#[derive(Debug)]
pub(crate) enum Change {
    Added(Map<String, Value>),
    Updated {
        before: Map<String, Value>,
        after: Map<String, Value>,
    },
    Deleted(Map<String, Value>),
}

fn field_str<'a>(doc: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    doc.get(key).and_then(Value::as_str)
}

fn field_i64(doc: &Map<String, Value>, key: &str) -> i64 {
    doc.get(key).and_then(Value::as_i64).unwrap_or(0)
}

/// Signed ledger effect of a transaction: income adds, expense removes.
fn signed_amount(doc: &Map<String, Value>) -> i64 {
    let amount = field_i64(doc, "amount");
    match field_str(doc, "kind") {
        Some("income") => amount,
        _ => -amount,
    }
}

pub(crate) async fn apply(
    conn: &mut SqliteConnection,
    collection: Collection,
    change: &Change,
) -> StoreResult<()> {
    match collection {
        Collection::Transactions => apply_transaction(conn, change).await,
        Collection::Transfers => apply_transfer(conn, change).await,
        Collection::FileExpenses | Collection::ExtraFees => {
            recompute_touched_files(conn, change).await
        }
        Collection::ClientFiles => apply_client_file(conn, change).await,
        Collection::Clients => apply_client(conn, change).await,
        _ => Ok(()),
    }
}

/// Rollups on the client itself are derived; whatever a caller wrote
/// into those fields is replaced by a fresh recompute.
async fn apply_client(conn: &mut SqliteConnection, change: &Change) -> StoreResult<()> {
    let doc = match change {
        Change::Added(doc) | Change::Updated { after: doc, .. } => doc,
        Change::Deleted(_) => return Ok(()),
    };
    if let Some(id) = field_str(doc, "id") {
        let id = id.to_string();
        recompute_client(conn, &id).await?;
    }
    Ok(())
}

async fn apply_transaction(conn: &mut SqliteConnection, change: &Change) -> StoreResult<()> {
    match change {
        Change::Added(doc) => {
            if let Some(account) = field_str(doc, "account_id") {
                let account = account.to_string();
                adjust_account_balance(conn, &account, signed_amount(doc)).await?;
            }
        }
        Change::Updated { before, after } => {
            if let Some(account) = field_str(before, "account_id") {
                let account = account.to_string();
                adjust_account_balance(conn, &account, -signed_amount(before)).await?;
            }
            if let Some(account) = field_str(after, "account_id") {
                let account = account.to_string();
                adjust_account_balance(conn, &account, signed_amount(after)).await?;
            }
        }
        Change::Deleted(doc) => {
            if let Some(account) = field_str(doc, "account_id") {
                let account = account.to_string();
                adjust_account_balance(conn, &account, -signed_amount(doc)).await?;
            }
        }
    }
    recompute_touched_files(conn, change).await
}

/// (from, to, amount) while the transfer is in force.
fn transfer_effect(doc: &Map<String, Value>) -> Option<(String, String, i64)> {
    if field_str(doc, "status") != Some("completed") {
        return None;
    }
    let from = field_str(doc, "from_account_id")?.to_string();
    let to = field_str(doc, "to_account_id")?.to_string();
    Some((from, to, field_i64(doc, "amount")))
}

async fn apply_transfer(conn: &mut SqliteConnection, change: &Change) -> StoreResult<()> {
    let (reverse, forward) = match change {
        Change::Added(doc) => (None, transfer_effect(doc)),
        Change::Updated { before, after } => (transfer_effect(before), transfer_effect(after)),
        Change::Deleted(doc) => (transfer_effect(doc), None),
    };
    if let Some((from, to, amount)) = reverse {
        adjust_account_balance(conn, &from, amount).await?;
        adjust_account_balance(conn, &to, -amount).await?;
    }
    if let Some((from, to, amount)) = forward {
        adjust_account_balance(conn, &from, -amount).await?;
        adjust_account_balance(conn, &to, amount).await?;
    }
    Ok(())
}

/// Nudge an account's cached balance in place. The account may
/// legitimately be gone when stale transactions outlive it; that case
/// is logged and skipped rather than failing the write.
async fn adjust_account_balance(
    conn: &mut SqliteConnection,
    account_id: &str,
    delta: i64,
) -> StoreResult<()> {
    if delta == 0 {
        return Ok(());
    }
    let res = sqlx::query(
        "UPDATE accounts SET data = json_set(data, '$.balance', \
         COALESCE(json_extract(data, '$.balance'), 0) + ?) WHERE id = ?",
    )
    .bind(delta)
    .bind(account_id)
    .execute(&mut *conn)
    .await?;
    if res.rows_affected() == 0 {
        warn!(
            target: "tallybook",
            event = "derived_account_missing",
            account_id = %account_id,
            delta
        );
    }
    Ok(())
}

async fn recompute_touched_files(conn: &mut SqliteConnection, change: &Change) -> StoreResult<()> {
    let mut files: Vec<String> = Vec::new();
    {
        let mut note = |doc: &Map<String, Value>| {
            if let Some(f) = doc.get("client_file_id").and_then(Value::as_str) {
                if !files.iter().any(|known| known == f) {
                    files.push(f.to_string());
                }
            }
        };
        match change {
            Change::Added(doc) | Change::Deleted(doc) => note(doc),
            Change::Updated { before, after } => {
                note(before);
                note(after);
            }
        }
    }
    for file_id in files {
        recompute_client_file(conn, &file_id).await?;
    }
    Ok(())
}

async fn apply_client_file(conn: &mut SqliteConnection, change: &Change) -> StoreResult<()> {
    match change {
        Change::Added(doc) => {
            if let Some(id) = field_str(doc, "id") {
                let id = id.to_string();
                recompute_client_file(conn, &id).await?;
            }
        }
        Change::Updated { before, after } => {
            if let Some(id) = field_str(after, "id") {
                let id = id.to_string();
                recompute_client_file(conn, &id).await?;
            }
            // A move between clients must refresh the old side too.
            let prev_client = field_str(before, "client_id");
            if prev_client.is_some() && prev_client != field_str(after, "client_id") {
                let prev = prev_client.unwrap_or_default().to_string();
                recompute_client(conn, &prev).await?;
            }
        }
        Change::Deleted(doc) => {
            if let Some(client) = field_str(doc, "client_id") {
                let client = client.to_string();
                recompute_client(conn, &client).await?;
            }
        }
    }
    Ok(())
}

/// Recompute one file's derived money block from its children, then
/// refresh the owning client's rollups. A missing file is fine; it was
/// deleted in the same transaction.
pub(crate) async fn recompute_client_file(
    conn: &mut SqliteConnection,
    file_id: &str,
) -> StoreResult<()> {
    let mut doc = match repo::fetch_doc(conn, Collection::ClientFiles, file_id).await? {
        Some(doc) => doc,
        None => return Ok(()),
    };

    let total_expenses = sum_file_children(conn, Collection::FileExpenses, file_id).await?;
    let total_extra_fees = sum_file_children(conn, Collection::ExtraFees, file_id).await?;
    let payments = sum_file_payments(conn, file_id).await?;

    let fees_to_be_paid = field_i64(&doc, "fees_to_be_paid");
    let deposit_paid = field_i64(&doc, "deposit_paid");
    let total_fees_charged = fees_to_be_paid + total_extra_fees;
    let total_paid = deposit_paid + payments;

    doc.insert("total_expenses".to_string(), Value::from(total_expenses));
    doc.insert("total_extra_fees".to_string(), Value::from(total_extra_fees));
    doc.insert(
        "total_fees_charged".to_string(),
        Value::from(total_fees_charged),
    );
    doc.insert("total_paid".to_string(), Value::from(total_paid));
    doc.insert(
        "balance_remaining".to_string(),
        Value::from(total_fees_charged - total_paid),
    );
    doc.insert(
        "net_summary".to_string(),
        Value::from(total_paid - total_fees_charged),
    );
    repo::write_derived(conn, Collection::ClientFiles, file_id, &doc).await?;

    if let Some(client_id) = field_str(&doc, "client_id") {
        let client_id = client_id.to_string();
        recompute_client(conn, &client_id).await?;
    }
    Ok(())
}

async fn sum_file_children(
    conn: &mut SqliteConnection,
    collection: Collection,
    file_id: &str,
) -> StoreResult<i64> {
    let sql = format!(
        "SELECT COALESCE(SUM(json_extract(data, '$.amount')), 0) FROM {} \
         WHERE json_extract(data, '$.client_file_id') = ?",
        collection.as_str()
    );
    let (sum,): (i64,) = sqlx::query_as(&sql)
        .bind(file_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(sum)
}

/// Income transactions pointed at the file count as payments received.
async fn sum_file_payments(conn: &mut SqliteConnection, file_id: &str) -> StoreResult<i64> {
    let (sum,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(json_extract(data, '$.amount')), 0) FROM transactions \
         WHERE json_extract(data, '$.client_file_id') = ? \
         AND json_extract(data, '$.kind') = 'income'",
    )
    .bind(file_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(sum)
}

/// Refresh a client's rollups from its non-closed files.
pub(crate) async fn recompute_client(
    conn: &mut SqliteConnection,
    client_id: &str,
) -> StoreResult<()> {
    let mut doc = match repo::fetch_doc(conn, Collection::Clients, client_id).await? {
        Some(doc) => doc,
        None => {
            warn!(
                target: "tallybook",
                event = "derived_client_missing",
                client_id = %client_id
            );
            return Ok(());
        }
    };
    let (outstanding, held): (i64, i64) = sqlx::query_as(
        "SELECT \
         COALESCE(SUM(json_extract(data, '$.balance_remaining')), 0), \
         COALESCE(SUM(json_extract(data, '$.deposit_paid')), 0) \
         FROM client_files \
         WHERE json_extract(data, '$.client_id') = ? \
         AND json_extract(data, '$.status') != 'closed'",
    )
    .bind(client_id)
    .fetch_one(&mut *conn)
    .await?;
    doc.insert("outstanding_fees".to_string(), Value::from(outstanding));
    doc.insert("funds_held".to_string(), Value::from(held));
    repo::write_derived(conn, Collection::Clients, client_id, &doc).await
}

/// Line math for invoices. Tax rounds half-up on the subtotal.
pub(crate) fn invoice_totals(lines: &[InvoiceLine], tax_rate_bps: i64) -> (i64, i64, i64) {
    let subtotal: i64 = lines.iter().map(|l| l.quantity * l.unit_price).sum();
    let tax = round_half_up(subtotal * tax_rate_bps, 10_000);
    (subtotal, tax, subtotal + tax)
}

fn round_half_up(numerator: i64, denominator: i64) -> i64 {
    (numerator + denominator / 2).div_euclid(denominator)
}

/// Rewrite an invoice document's money block from its lines. Values a
/// caller put there are discarded.
pub(crate) fn normalize_invoice(doc: &mut Map<String, Value>) -> StoreResult<()> {
    let lines: Vec<InvoiceLine> = match doc.get("lines") {
        Some(value) => serde_json::from_value(value.clone())?,
        None => Vec::new(),
    };
    let tax_rate_bps = field_i64(doc, "tax_rate_bps");
    let (subtotal, tax, total) = invoice_totals(&lines, tax_rate_bps);
    doc.insert("subtotal".to_string(), Value::from(subtotal));
    doc.insert("tax".to_string(), Value::from(tax));
    doc.insert("total".to_string(), Value::from(total));
    Ok(())
}

/// Point-in-time dashboard aggregate; computed fresh on every call and
/// never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub total_revenue: i64,
    pub total_expenses: i64,
    pub net_income: i64,
    pub cash_balance: i64,
}

pub(crate) async fn dashboard_summary(
    conn: &mut SqliteConnection,
    from: i64,
    to: i64,
) -> StoreResult<DashboardSummary> {
    let (revenue, expenses): (i64, i64) = sqlx::query_as(
        "SELECT \
         COALESCE(SUM(CASE WHEN json_extract(data, '$.kind') = 'income' \
             THEN json_extract(data, '$.amount') ELSE 0 END), 0), \
         COALESCE(SUM(CASE WHEN json_extract(data, '$.kind') = 'expense' \
             THEN json_extract(data, '$.amount') ELSE 0 END), 0) \
         FROM transactions WHERE json_extract(data, '$.date') BETWEEN ? AND ?",
    )
    .bind(from)
    .bind(to)
    .fetch_one(&mut *conn)
    .await?;

    let (cash,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(json_extract(data, '$.balance')), 0) FROM accounts \
         WHERE json_extract(data, '$.is_active') = 1",
    )
    .fetch_one(&mut *conn)
    .await?;

    Ok(DashboardSummary {
        total_revenue: revenue,
        total_expenses: expenses,
        net_income: revenue - expenses,
        cash_balance: cash,
    })
}
