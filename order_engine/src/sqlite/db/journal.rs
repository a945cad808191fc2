use chrono::{DateTime, Utc};
use log::trace;
use sqlx::{FromRow, SqliteConnection};

use crate::{
    db_types::{LedgerEntry, NewLedgerEntry, NewReviewEntry, OrderId, ProviderKind, ReviewEntry},
    traits::StoreError,
};

#[derive(Debug, Clone, FromRow)]
struct LedgerRow {
    id: i64,
    order_id: String,
    transaction_id: Option<String>,
    provider: String,
    external_transaction_id: String,
    amount: i64,
    payer_id: String,
    payee_id: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct ReviewRow {
    id: i64,
    order_id: Option<String>,
    provider: Option<String>,
    reason: String,
    payload: String,
    created_at: DateTime<Utc>,
}

fn parse_provider(s: &str) -> Result<ProviderKind, StoreError> {
    s.parse().map_err(|e| StoreError::CorruptRecord(format!("{e}")))
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            id: row.id,
            order_id: row.order_id.into(),
            transaction_id: row.transaction_id.map(Into::into),
            provider: parse_provider(&row.provider)?,
            external_transaction_id: row.external_transaction_id,
            amount: row.amount.into(),
            payer_id: row.payer_id.into(),
            payee_id: row.payee_id.into(),
            created_at: row.created_at,
        })
    }
}

impl TryFrom<ReviewRow> for ReviewEntry {
    type Error = StoreError;

    fn try_from(row: ReviewRow) -> Result<Self, Self::Error> {
        Ok(ReviewEntry {
            id: row.id,
            order_id: row.order_id.map(Into::into),
            provider: row.provider.as_deref().map(parse_provider).transpose()?,
            reason: row.reason,
            payload: row.payload,
            created_at: row.created_at,
        })
    }
}

/// Idempotent on (order_id, external_transaction_id). Returns `true` if a new row was written.
pub async fn insert_ledger_entry(entry: &NewLedgerEntry, conn: &mut SqliteConnection) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
            INSERT INTO payment_ledger (
                order_id, transaction_id, provider, external_transaction_id, amount, payer_id, payee_id, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (order_id, external_transaction_id) DO NOTHING
        "#,
    )
    .bind(entry.order_id.as_str())
    .bind(entry.transaction_id.as_ref().map(|t| t.as_str()))
    .bind(entry.provider.to_string())
    .bind(&entry.external_transaction_id)
    .bind(entry.amount.value())
    .bind(entry.payer_id.as_str())
    .bind(entry.payee_id.as_str())
    .bind(Utc::now())
    .execute(conn)
    .await?;
    let inserted = result.rows_affected() == 1;
    trace!("🗃️ Ledger entry for order {} [{}]: inserted={inserted}", entry.order_id, entry.external_transaction_id);
    Ok(inserted)
}

pub async fn fetch_ledger_entries(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Vec<LedgerEntry>, StoreError> {
    let rows: Vec<LedgerRow> = sqlx::query_as(
        "SELECT id, order_id, transaction_id, provider, external_transaction_id, amount, payer_id, payee_id, \
         created_at FROM payment_ledger WHERE order_id = $1 ORDER BY id ASC",
    )
    .bind(order_id.as_str())
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(LedgerEntry::try_from).collect()
}

pub async fn insert_review_entry(
    entry: &NewReviewEntry,
    conn: &mut SqliteConnection,
) -> Result<ReviewEntry, StoreError> {
    let id = sqlx::query(
        "INSERT INTO manual_review (order_id, provider, reason, payload, created_at) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(entry.order_id.as_ref().map(|o| o.as_str()))
    .bind(entry.provider.map(|p| p.to_string()))
    .bind(&entry.reason)
    .bind(&entry.payload)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    let row: ReviewRow =
        sqlx::query_as("SELECT id, order_id, provider, reason, payload, created_at FROM manual_review WHERE id = $1")
            .bind(id)
            .fetch_one(conn)
            .await?;
    row.try_into()
}

pub async fn fetch_review_entries(limit: i64, conn: &mut SqliteConnection) -> Result<Vec<ReviewEntry>, StoreError> {
    let rows: Vec<ReviewRow> = sqlx::query_as(
        "SELECT id, order_id, provider, reason, payload, created_at FROM manual_review ORDER BY id DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(ReviewEntry::try_from).collect()
}
