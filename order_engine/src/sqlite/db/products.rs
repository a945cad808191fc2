use log::debug;
use sqlx::{FromRow, SqliteConnection};

use crate::{
    db_types::{Product, ProductId},
    traits::StoreError,
};

#[derive(Debug, Clone, FromRow)]
struct ProductRow {
    id: String,
    name: String,
    seller_id: String,
    price: i64,
    quantity: i64,
    status: String,
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Product {
            id: row.id.into(),
            name: row.name,
            seller_id: row.seller_id.into(),
            price: row.price.into(),
            quantity: row.quantity,
            status: row.status.parse().map_err(|e| StoreError::CorruptRecord(format!("{e}")))?,
        })
    }
}

pub async fn fetch_product(id: &ProductId, conn: &mut SqliteConnection) -> Result<Option<Product>, StoreError> {
    let row: Option<ProductRow> =
        sqlx::query_as("SELECT id, name, seller_id, price, quantity, status FROM products WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(conn)
            .await?;
    row.map(Product::try_from).transpose()
}

pub async fn upsert_product(product: &Product, conn: &mut SqliteConnection) -> Result<Product, StoreError> {
    sqlx::query(
        r#"
            INSERT INTO products (id, name, seller_id, price, quantity, status) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                seller_id = excluded.seller_id,
                price = excluded.price,
                quantity = excluded.quantity,
                status = excluded.status
        "#,
    )
    .bind(product.id.as_str())
    .bind(&product.name)
    .bind(product.seller_id.as_str())
    .bind(product.price.value())
    .bind(product.quantity)
    .bind(product.status.to_string())
    .execute(&mut *conn)
    .await?;
    fetch_product(&product.id, conn).await?.ok_or_else(|| StoreError::ProductNotFound(product.id.clone()))
}

/// Decrements stock in a single statement. SQLite evaluates every SET expression against the pre-update row, so the
/// status check sees the old quantity.
pub async fn decrement_stock(
    id: &ProductId,
    amount: i64,
    conn: &mut SqliteConnection,
) -> Result<Product, StoreError> {
    let result = sqlx::query(
        r#"
            UPDATE products SET
                quantity = MAX(quantity - $1, 0),
                status = CASE WHEN quantity - $1 <= 0 THEN 'sold' ELSE status END
            WHERE id = $2
        "#,
    )
    .bind(amount)
    .bind(id.as_str())
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::ProductNotFound(id.clone()));
    }
    let product = fetch_product(id, conn).await?.ok_or_else(|| StoreError::ProductNotFound(id.clone()))?;
    debug!("🗃️ Stock for product {id} decremented by {amount}. {} left ({})", product.quantity, product.status);
    Ok(product)
}
