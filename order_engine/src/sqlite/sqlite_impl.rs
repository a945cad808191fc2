//! `SqliteDatabase` is a concrete implementation of a marketplace order engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`crate::traits`]
//! module.
use std::fmt::Debug;

use chrono::Duration;
use log::*;
use sqlx::{migrate, SqlitePool};

use super::db::{carts, db_url, journal, new_pool, orders, products, rate_limits};
use crate::{
    db_types::{
        CartLine,
        LedgerEntry,
        NewLedgerEntry,
        NewReviewEntry,
        Order,
        OrderId,
        PaymentDetails,
        Product,
        ProductId,
        ProviderKind,
        ReviewEntry,
        ShippingAddress,
        StatusHistoryEntry,
        TransactionId,
        UserId,
        ValidatedOrder,
    },
    traits::{
        CartProvider,
        MarketplaceDatabase,
        OrderQueryFilter,
        OrderStore,
        ProductCatalog,
        RateLimiter,
        ReconciliationJournal,
        SettleOutcome,
        StatusChange,
        StoreError,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object using the `MKT_DATABASE_URL` environment variable (or the default).
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(&url, max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("🗃️ Creating new database connection pool for {url}");
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    /// Applies any outstanding schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        migrate!("./src/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(format!("Migration failed: {e}")))?;
        info!("🗃️ Database migrations complete");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl MarketplaceDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}

impl OrderStore for SqliteDatabase {
    async fn insert_order(&self, order: ValidatedOrder) -> Result<Order, StoreError> {
        let id = order.id.clone();
        let mut tx = self.pool.begin().await?;
        orders::insert_order(order, &mut tx).await?;
        let order = orders::fetch_order(&id, &mut tx).await?.ok_or_else(|| StoreError::OrderNotFound(id.clone()))?;
        tx.commit().await?;
        Ok(order)
    }

    async fn fetch_order(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order(id, &mut conn).await
    }

    async fn fetch_orders_for_transaction(&self, txid: &TransactionId) -> Result<Vec<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_orders_for_transaction(txid, &mut conn).await
    }

    async fn fetch_orders_for_correlation(
        &self,
        provider: ProviderKind,
        correlation_id: &str,
    ) -> Result<Vec<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_orders_for_correlation(provider, correlation_id, &mut conn).await
    }

    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::search_orders(query, &mut conn).await
    }

    async fn update_order_status(&self, id: &OrderId, change: StatusChange) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await?;
        let updated = orders::update_order_status(id, &change, &mut tx).await?;
        if !updated {
            let exists = orders::fetch_order(id, &mut tx).await?.is_some();
            tx.rollback().await?;
            return if exists {
                debug!("🗃️ Order {id} was no longer {} when the update landed", change.from);
                Err(StoreError::ConcurrentUpdate(id.clone()))
            } else {
                Err(StoreError::OrderNotFound(id.clone()))
            };
        }
        let order = orders::fetch_order(id, &mut tx).await?.ok_or_else(|| StoreError::OrderNotFound(id.clone()))?;
        tx.commit().await?;
        Ok(order)
    }

    async fn settle_order(
        &self,
        id: &OrderId,
        details: PaymentDetails,
        entry: StatusHistoryEntry,
    ) -> Result<SettleOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let won = orders::settle_order(id, &details, &entry, &mut tx).await?;
        let order = orders::fetch_order(id, &mut tx).await?.ok_or_else(|| StoreError::OrderNotFound(id.clone()))?;
        tx.commit().await?;
        let outcome = if won {
            debug!("🗃️ Order {id} settled for {}", details.paid_amount);
            SettleOutcome::Settled(order)
        } else if order.is_paid() {
            SettleOutcome::AlreadyPaid(order)
        } else {
            SettleOutcome::NotPayable(order)
        };
        Ok(outcome)
    }

    async fn attach_payment_reference(
        &self,
        ids: &[OrderId],
        provider: ProviderKind,
        correlation_id: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            if !orders::attach_payment_reference(id, provider, correlation_id, &mut tx).await? {
                warn!("🗃️ Order {id} is no longer pending. Payment reference {provider}:{correlation_id} not attached");
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_shipping_address(&self, id: &OrderId, address: ShippingAddress) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await?;
        if !orders::update_shipping_address(id, &address, &mut tx).await? {
            return Err(StoreError::OrderNotFound(id.clone()));
        }
        let order = orders::fetch_order(id, &mut tx).await?.ok_or_else(|| StoreError::OrderNotFound(id.clone()))?;
        tx.commit().await?;
        Ok(order)
    }
}

impl ProductCatalog for SqliteDatabase {
    async fn fetch_product(&self, id: &ProductId) -> Result<Option<Product>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        products::fetch_product(id, &mut conn).await
    }

    async fn upsert_product(&self, product: Product) -> Result<Product, StoreError> {
        let mut tx = self.pool.begin().await?;
        let product = products::upsert_product(&product, &mut tx).await?;
        tx.commit().await?;
        Ok(product)
    }

    async fn decrement_stock(&self, id: &ProductId, amount: i64) -> Result<Product, StoreError> {
        let mut tx = self.pool.begin().await?;
        let product = products::decrement_stock(id, amount, &mut tx).await?;
        tx.commit().await?;
        Ok(product)
    }
}

impl CartProvider for SqliteDatabase {
    async fn fetch_cart(&self, buyer: &UserId) -> Result<Vec<CartLine>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        carts::fetch_cart(buyer, &mut conn).await
    }

    async fn set_cart_quantity(&self, buyer: &UserId, product: &ProductId, quantity: i64) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        carts::set_cart_quantity(buyer, product, quantity, &mut conn).await
    }
}

impl ReconciliationJournal for SqliteDatabase {
    async fn insert_ledger_entry(&self, entry: NewLedgerEntry) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        journal::insert_ledger_entry(&entry, &mut conn).await
    }

    async fn fetch_ledger_entries(&self, order_id: &OrderId) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        journal::fetch_ledger_entries(order_id, &mut conn).await
    }

    async fn insert_review_entry(&self, entry: NewReviewEntry) -> Result<ReviewEntry, StoreError> {
        let mut tx = self.pool.begin().await?;
        let review = journal::insert_review_entry(&entry, &mut tx).await?;
        tx.commit().await?;
        warn!(
            "🗃️ Manual review #{} logged for order {:?}: {}",
            review.id,
            review.order_id.as_ref().map(|o| o.as_str()),
            review.reason
        );
        Ok(review)
    }

    async fn fetch_review_entries(&self, limit: i64) -> Result<Vec<ReviewEntry>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        journal::fetch_review_entries(limit, &mut conn).await
    }
}

impl RateLimiter for SqliteDatabase {
    async fn check_rate(&self, key: &str, window: Duration, max: u32) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let hits = rate_limits::hit(key, window, &mut tx).await?;
        tx.commit().await?;
        Ok(hits <= i64::from(max))
    }
}
