use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db_types::{
        Cancellation,
        Order,
        OrderId,
        OrderStatus,
        PaymentDetails,
        ProviderKind,
        ShippingAddress,
        StatusHistoryEntry,
        TransactionId,
        ValidatedOrder,
    },
    traits::{CancellationUpdate, OrderQueryFilter, StatusChange, StoreError},
};

const ORDER_COLUMNS: &str = r#"
    id, product_id, product_name, product_unit_price, seller_id, buyer_id, quantity, total_amount, currency,
    ship_full_name, ship_address, ship_phone, ship_city, ship_postal_code,
    order_status, payment_status, shipping_status,
    transaction_id, payment_method, payment_correlation_id, payment_external_id, paid_amount,
    cancelled_by, cancelled_at, cancellation_reason,
    created_at, updated_at, paid_at, seller_confirmed_at, delivered_at, completed_at
"#;

#[derive(Debug, Clone, FromRow)]
struct OrderRow {
    id: String,
    product_id: String,
    product_name: String,
    product_unit_price: i64,
    seller_id: String,
    buyer_id: String,
    quantity: i64,
    total_amount: i64,
    currency: String,
    ship_full_name: String,
    ship_address: String,
    ship_phone: String,
    ship_city: Option<String>,
    ship_postal_code: Option<String>,
    order_status: String,
    payment_status: String,
    shipping_status: String,
    transaction_id: Option<String>,
    payment_method: Option<String>,
    payment_correlation_id: Option<String>,
    payment_external_id: Option<String>,
    paid_amount: Option<i64>,
    cancelled_by: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    seller_confirmed_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
struct HistoryRow {
    status: String,
    changed_by: String,
    changed_at: DateTime<Utc>,
    notes: Option<String>,
}

fn corrupt<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::CorruptRecord(e.to_string())
}

impl TryFrom<HistoryRow> for StatusHistoryEntry {
    type Error = StoreError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(StatusHistoryEntry {
            status: row.status.parse().map_err(corrupt)?,
            changed_by: row.changed_by.into(),
            changed_at: row.changed_at,
            notes: row.notes,
        })
    }
}

fn into_order(row: OrderRow, history: Vec<StatusHistoryEntry>) -> Result<Order, StoreError> {
    let payment_method = row.payment_method.as_deref().map(str::parse::<ProviderKind>).transpose().map_err(corrupt)?;
    let payment_details = match (row.paid_amount, row.paid_at) {
        (Some(amount), Some(paid_at)) => Some(PaymentDetails {
            external_transaction_id: row.payment_external_id,
            paid_amount: amount.into(),
            paid_at,
        }),
        _ => None,
    };
    let cancellation = match (row.cancelled_by, row.cancelled_at) {
        (Some(by), Some(at)) => Some(Cancellation {
            cancelled_by: by.parse().map_err(corrupt)?,
            cancelled_at: at,
            reason: row.cancellation_reason,
        }),
        _ => None,
    };
    Ok(Order {
        id: row.id.into(),
        product_id: row.product_id.into(),
        product_name: row.product_name,
        product_unit_price: row.product_unit_price.into(),
        seller_id: row.seller_id.into(),
        buyer_id: row.buyer_id.into(),
        quantity: row.quantity,
        total_amount: row.total_amount.into(),
        currency: row.currency,
        shipping_address: ShippingAddress {
            full_name: row.ship_full_name,
            address: row.ship_address,
            phone: row.ship_phone,
            city: row.ship_city,
            postal_code: row.ship_postal_code,
        },
        order_status: row.order_status.parse().map_err(corrupt)?,
        payment_status: row.payment_status.parse().map_err(corrupt)?,
        shipping_status: row.shipping_status.parse().map_err(corrupt)?,
        transaction_id: row.transaction_id.map(TransactionId::from),
        payment_method,
        payment_correlation_id: row.payment_correlation_id,
        payment_details,
        cancellation,
        status_history: history,
        created_at: row.created_at,
        updated_at: row.updated_at,
        paid_at: row.paid_at,
        seller_confirmed_at: row.seller_confirmed_at,
        delivered_at: row.delivered_at,
        completed_at: row.completed_at,
    })
}

/// Inserts a new order and its seed history entry. This is not atomic on its own; wrap it in a transaction and pass
/// `&mut *tx` as the connection.
pub async fn insert_order(order: ValidatedOrder, conn: &mut SqliteConnection) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
            INSERT INTO orders (
                id, product_id, product_name, product_unit_price, seller_id, buyer_id, quantity, total_amount,
                currency, ship_full_name, ship_address, ship_phone, ship_city, ship_postal_code,
                transaction_id, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $16)
        "#,
    )
    .bind(order.id.as_str())
    .bind(order.product_id.as_str())
    .bind(&order.product_name)
    .bind(order.product_unit_price.value())
    .bind(order.seller_id.as_str())
    .bind(order.buyer_id.as_str())
    .bind(order.quantity)
    .bind(order.total_amount.value())
    .bind(&order.currency)
    .bind(&order.shipping_address.full_name)
    .bind(&order.shipping_address.address)
    .bind(&order.shipping_address.phone)
    .bind(order.shipping_address.city.as_deref())
    .bind(order.shipping_address.postal_code.as_deref())
    .bind(order.transaction_id.as_ref().map(|t| t.as_str()))
    .bind(order.created_at)
    .execute(&mut *conn)
    .await;
    match result {
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(StoreError::OrderAlreadyExists(order.id));
        },
        Err(e) => return Err(e.into()),
        Ok(_) => {},
    }
    let seed = StatusHistoryEntry {
        status: OrderStatus::Pending,
        changed_by: order.buyer_id.clone(),
        changed_at: order.created_at,
        notes: None,
    };
    append_history(&order.id, &seed, conn).await?;
    debug!("🗃️ Order {} for product {} has been saved", order.id, order.product_id);
    Ok(())
}

pub async fn append_history(
    id: &OrderId,
    entry: &StatusHistoryEntry,
    conn: &mut SqliteConnection,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO order_status_history (order_id, status, changed_by, changed_at, notes) VALUES ($1, $2, $3, $4, \
         $5)",
    )
    .bind(id.as_str())
    .bind(entry.status.to_string())
    .bind(entry.changed_by.as_str())
    .bind(entry.changed_at)
    .bind(entry.notes.as_deref())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch_history(id: &OrderId, conn: &mut SqliteConnection) -> Result<Vec<StatusHistoryEntry>, StoreError> {
    let rows: Vec<HistoryRow> = sqlx::query_as(
        "SELECT status, changed_by, changed_at, notes FROM order_status_history WHERE order_id = $1 ORDER BY id ASC",
    )
    .bind(id.as_str())
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(StatusHistoryEntry::try_from).collect()
}

async fn hydrate(rows: Vec<OrderRow>, conn: &mut SqliteConnection) -> Result<Vec<Order>, StoreError> {
    let mut orders = Vec::with_capacity(rows.len());
    for row in rows {
        let history = fetch_history(&OrderId(row.id.clone()), &mut *conn).await?;
        orders.push(into_order(row, history)?);
    }
    Ok(orders)
}

pub async fn fetch_order(id: &OrderId, conn: &mut SqliteConnection) -> Result<Option<Order>, StoreError> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
    let row: Option<OrderRow> = sqlx::query_as(&sql).bind(id.as_str()).fetch_optional(&mut *conn).await?;
    match row {
        Some(row) => {
            let history = fetch_history(id, conn).await?;
            into_order(row, history).map(Some)
        },
        None => Ok(None),
    }
}

pub async fn fetch_orders_for_transaction(
    txid: &TransactionId,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, StoreError> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE transaction_id = $1 ORDER BY created_at ASC, id ASC");
    let rows: Vec<OrderRow> = sqlx::query_as(&sql).bind(txid.as_str()).fetch_all(&mut *conn).await?;
    hydrate(rows, conn).await
}

pub async fn fetch_orders_for_correlation(
    provider: ProviderKind,
    correlation_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, StoreError> {
    let sql = format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE payment_method = $1 AND payment_correlation_id = $2 ORDER BY \
         created_at ASC, id ASC"
    );
    let rows: Vec<OrderRow> =
        sqlx::query_as(&sql).bind(provider.to_string()).bind(correlation_id).fetch_all(&mut *conn).await?;
    hydrate(rows, conn).await
}

/// Fetches orders according to criteria specified in the `OrderQueryFilter`
///
/// Resulting orders are ordered by `created_at` in ascending order
pub async fn search_orders(query: OrderQueryFilter, conn: &mut SqliteConnection) -> Result<Vec<Order>, StoreError> {
    let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {ORDER_COLUMNS} FROM orders "));
    if !query.is_empty() {
        builder.push("WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if let Some(buyer_id) = query.buyer_id {
        where_clause.push("buyer_id = ");
        where_clause.push_bind_unseparated(buyer_id.0);
    }
    if let Some(seller_id) = query.seller_id {
        where_clause.push("seller_id = ");
        where_clause.push_bind_unseparated(seller_id.0);
    }
    if let Some(txid) = query.transaction_id {
        where_clause.push("transaction_id = ");
        where_clause.push_bind_unseparated(txid.0);
    }
    if let Some(provider) = query.payment_method {
        where_clause.push("payment_method = ");
        where_clause.push_bind_unseparated(provider.to_string());
    }
    if !query.order_statuses.is_empty() {
        let statuses = query.order_statuses.iter().map(|s| format!("'{s}'")).collect::<Vec<_>>().join(",");
        where_clause.push(format!("order_status IN ({statuses})"));
    }
    if !query.payment_statuses.is_empty() {
        let statuses = query.payment_statuses.iter().map(|s| format!("'{s}'")).collect::<Vec<_>>().join(",");
        where_clause.push(format!("payment_status IN ({statuses})"));
    }
    match query.has_payment_reference {
        Some(true) => {
            where_clause.push("payment_correlation_id IS NOT NULL");
        },
        Some(false) => {
            where_clause.push("payment_correlation_id IS NULL");
        },
        None => {},
    }
    if let Some(before) = query.created_before {
        where_clause.push("created_at < ");
        where_clause.push_bind_unseparated(before);
    }
    if let Some(after) = query.created_after {
        where_clause.push("created_at > ");
        where_clause.push_bind_unseparated(after);
    }
    builder.push(" ORDER BY created_at ASC, id ASC");
    if let Some(limit) = query.limit {
        builder.push(" LIMIT ");
        builder.push_bind(limit);
    }
    trace!("🗃️ Executing query: {}", builder.sql());
    let rows = builder.build_query_as::<OrderRow>().fetch_all(&mut *conn).await?;
    trace!("🗃️ Result of search_orders: {}", rows.len());
    hydrate(rows, conn).await
}

/// Applies `change` if, and only if, the order is still in `change.from`. Returns whether the row was updated.
///
/// The history entry is appended on success. Run this inside a transaction so that both land together.
pub async fn update_order_status(
    id: &OrderId,
    change: &StatusChange,
    conn: &mut SqliteConnection,
) -> Result<bool, StoreError> {
    let at = change.changed_at();
    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE orders SET order_status = ");
    builder.push_bind(change.to.to_string());
    builder.push(", updated_at = ");
    builder.push_bind(at);
    if let Some(status) = change.payment_status {
        builder.push(", payment_status = ");
        builder.push_bind(status.to_string());
    }
    if let Some(status) = change.shipping_status {
        builder.push(", shipping_status = ");
        builder.push_bind(status.to_string());
    }
    if let Some(milestone) = change.milestone {
        builder.push(format!(", {} = ", milestone.column()));
        builder.push_bind(at);
    }
    match &change.cancellation {
        CancellationUpdate::Keep => {},
        CancellationUpdate::Set(c) => {
            builder.push(", cancelled_by = ");
            builder.push_bind(c.cancelled_by.to_string());
            builder.push(", cancelled_at = ");
            builder.push_bind(c.cancelled_at);
            builder.push(", cancellation_reason = ");
            builder.push_bind(c.reason.clone());
        },
        CancellationUpdate::Clear => {
            builder.push(", cancelled_by = NULL, cancelled_at = NULL, cancellation_reason = NULL");
        },
    }
    builder.push(" WHERE id = ");
    builder.push_bind(id.as_str());
    builder.push(" AND order_status = ");
    builder.push_bind(change.from.to_string());
    trace!("🗃️ Executing query: {}", builder.sql());
    let result = builder.build().execute(&mut *conn).await?;
    if result.rows_affected() == 0 {
        return Ok(false);
    }
    append_history(id, &change.entry, conn).await?;
    trace!("🗃️ Order {id} moved from {} to {}", change.from, change.to);
    Ok(true)
}

/// The settlement guard. Marks the order paid only if it is still pending and not already paid, then appends the
/// history entry. Returns whether this call won.
pub async fn settle_order(
    id: &OrderId,
    details: &PaymentDetails,
    entry: &StatusHistoryEntry,
    conn: &mut SqliteConnection,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
            UPDATE orders SET
                order_status = 'paid',
                payment_status = 'paid',
                payment_external_id = $1,
                paid_amount = $2,
                paid_at = $3,
                updated_at = $3
            WHERE id = $4 AND payment_status <> 'paid' AND order_status = 'pending'
        "#,
    )
    .bind(details.external_transaction_id.as_deref())
    .bind(details.paid_amount.value())
    .bind(details.paid_at)
    .bind(id.as_str())
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        return Ok(false);
    }
    append_history(id, entry, conn).await?;
    Ok(true)
}

/// Links a payment request to an order that is still waiting for payment. Returns whether the row was updated.
pub async fn attach_payment_reference(
    id: &OrderId,
    provider: ProviderKind,
    correlation_id: &str,
    conn: &mut SqliteConnection,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "UPDATE orders SET payment_method = $1, payment_correlation_id = $2, updated_at = $3 WHERE id = $4 AND \
         order_status = 'pending'",
    )
    .bind(provider.to_string())
    .bind(correlation_id)
    .bind(Utc::now())
    .bind(id.as_str())
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn update_shipping_address(
    id: &OrderId,
    address: &ShippingAddress,
    conn: &mut SqliteConnection,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
            UPDATE orders SET
                ship_full_name = $1,
                ship_address = $2,
                ship_phone = $3,
                ship_city = $4,
                ship_postal_code = $5,
                updated_at = $6
            WHERE id = $7
        "#,
    )
    .bind(&address.full_name)
    .bind(&address.address)
    .bind(&address.phone)
    .bind(address.city.as_deref())
    .bind(address.postal_code.as_deref())
    .bind(Utc::now())
    .bind(id.as_str())
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}
