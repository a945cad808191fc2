use crate::{
    db_types::{Product, ProductId},
    traits::StoreError,
};

#[allow(async_fn_in_trait)]
pub trait ProductCatalog {
    async fn fetch_product(&self, id: &ProductId) -> Result<Option<Product>, StoreError>;

    /// Creates or replaces a product listing.
    async fn upsert_product(&self, product: Product) -> Result<Product, StoreError>;

    /// Atomically removes `amount` units from stock. Stock never drops below zero, and the product is marked `sold`
    /// once it runs out.
    async fn decrement_stock(&self, id: &ProductId, amount: i64) -> Result<Product, StoreError>;
}
