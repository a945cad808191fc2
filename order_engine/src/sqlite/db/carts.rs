use sqlx::{FromRow, SqliteConnection};

use crate::{
    db_types::{CartLine, ProductId, UserId},
    traits::StoreError,
};

#[derive(Debug, Clone, FromRow)]
struct CartRow {
    product_id: String,
    quantity: i64,
}

pub async fn fetch_cart(buyer: &UserId, conn: &mut SqliteConnection) -> Result<Vec<CartLine>, StoreError> {
    let rows: Vec<CartRow> =
        sqlx::query_as("SELECT product_id, quantity FROM cart_items WHERE buyer_id = $1 ORDER BY id ASC")
            .bind(buyer.as_str())
            .fetch_all(conn)
            .await?;
    Ok(rows.into_iter().map(|r| CartLine { product_id: r.product_id.into(), quantity: r.quantity }).collect())
}

pub async fn set_cart_quantity(
    buyer: &UserId,
    product: &ProductId,
    quantity: i64,
    conn: &mut SqliteConnection,
) -> Result<(), StoreError> {
    if quantity <= 0 {
        sqlx::query("DELETE FROM cart_items WHERE buyer_id = $1 AND product_id = $2")
            .bind(buyer.as_str())
            .bind(product.as_str())
            .execute(conn)
            .await?;
        return Ok(());
    }
    sqlx::query(
        "INSERT INTO cart_items (buyer_id, product_id, quantity) VALUES ($1, $2, $3) ON CONFLICT (buyer_id, \
         product_id) DO UPDATE SET quantity = excluded.quantity",
    )
    .bind(buyer.as_str())
    .bind(product.as_str())
    .bind(quantity)
    .execute(conn)
    .await?;
    Ok(())
}
