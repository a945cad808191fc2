use crate::{
    db_types::{
        Order,
        OrderId,
        PaymentDetails,
        ProviderKind,
        ShippingAddress,
        StatusHistoryEntry,
        TransactionId,
        ValidatedOrder,
    },
    traits::{OrderQueryFilter, SettleOutcome, StatusChange, StoreError},
};

/// The `OrderStore` trait is the persistence contract for orders.
///
/// The store only reports "not found" and "concurrent update" conditions. All business rules (who may do what, and
/// which transitions are legal) live in the lifecycle engine.
#[allow(async_fn_in_trait)]
pub trait OrderStore {
    /// Persists a new order together with its seed history entry (`pending`, changed by the buyer) in one
    /// transaction. Returns the stored order.
    async fn insert_order(&self, order: ValidatedOrder) -> Result<Order, StoreError>;

    /// Fetches the order with the given id, including its full status history.
    async fn fetch_order(&self, id: &OrderId) -> Result<Option<Order>, StoreError>;

    /// Fetches every order created by the cart checkout with the given transaction id, oldest first.
    async fn fetch_orders_for_transaction(&self, txid: &TransactionId) -> Result<Vec<Order>, StoreError>;

    /// Fetches every order whose payment was requested from `provider` under the given correlation id.
    async fn fetch_orders_for_correlation(
        &self,
        provider: ProviderKind,
        correlation_id: &str,
    ) -> Result<Vec<Order>, StoreError>;

    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, StoreError>;

    /// Applies a status change and appends its history entry in a single transaction.
    ///
    /// The update only happens if the order's status is still `change.from`. If another writer got there first,
    /// [`StoreError::ConcurrentUpdate`] is returned and nothing is written.
    async fn update_order_status(&self, id: &OrderId, change: StatusChange) -> Result<Order, StoreError>;

    /// Flips a pending, unpaid order to `paid`, records the payment details and appends the history entry, all in
    /// one transaction. The flip is conditional, so at most one caller ever sees [`SettleOutcome::Settled`] for a
    /// given order.
    async fn settle_order(
        &self,
        id: &OrderId,
        details: PaymentDetails,
        entry: StatusHistoryEntry,
    ) -> Result<SettleOutcome, StoreError>;

    /// Records the provider and correlation id of a payment request against each of the given orders.
    async fn attach_payment_reference(
        &self,
        ids: &[OrderId],
        provider: ProviderKind,
        correlation_id: &str,
    ) -> Result<(), StoreError>;

    async fn update_shipping_address(&self, id: &OrderId, address: ShippingAddress) -> Result<Order, StoreError>;
}
