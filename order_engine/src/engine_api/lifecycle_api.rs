use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use mkt_common::DEFAULT_CURRENCY_CODE;

use crate::{
    db_types::{
        Actor,
        Cancellation,
        NewOrder,
        Order,
        OrderId,
        OrderStatus,
        PaymentDetails,
        PaymentStatus,
        Role,
        ShippingAddress,
        ShippingStatus,
        StatusHistoryEntry,
        TransactionId,
        ValidatedOrder,
    },
    engine_api::{errors::OrderFlowError, state_machine::check_transition},
    events::{EventProducers, OrderAnnulledEvent, OrderStatusChangedEvent},
    traits::{CancellationUpdate, OrderQueryFilter, OrderStore, SettleOutcome, StatusChange},
};

/// Cancellation reason recorded on orders whose payment window ran out.
pub const PAYMENT_WINDOW_EXPIRED: &str = "Payment window expired";

/// `OrderLifecycleApi` owns the order state machine. It is the only component that writes `order_status` and the
/// status history, and every write it makes appends exactly one history entry.
pub struct OrderLifecycleApi<B> {
    db: B,
    producers: EventProducers,
}

impl<B> Debug for OrderLifecycleApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderLifecycleApi")
    }
}

impl<B: Clone> Clone for OrderLifecycleApi<B> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), producers: self.producers.clone() }
    }
}

impl<B> OrderLifecycleApi<B> {
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers }
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

fn validate_new_order(order: NewOrder) -> Result<ValidatedOrder, OrderFlowError> {
    let mut problems = Vec::new();
    let non_empty = |s: Option<&str>| s.map(|s| !s.trim().is_empty()).unwrap_or(false);
    if !non_empty(order.product_id.as_ref().map(|p| p.as_str())) {
        problems.push("productId".to_string());
    }
    if !non_empty(order.seller_id.as_ref().map(|p| p.as_str())) {
        problems.push("sellerId".to_string());
    }
    if !non_empty(order.buyer_id.as_ref().map(|p| p.as_str())) {
        problems.push("buyerId".to_string());
    }
    if order.quantity <= 0 {
        problems.push("quantity".to_string());
    }
    if !order.total_amount.map(|t| t.is_positive()).unwrap_or(false) {
        problems.push("totalAmount".to_string());
    }
    problems.extend(order.shipping_address.missing_fields().into_iter().map(String::from));
    match (order.product_id, order.seller_id, order.buyer_id, order.total_amount) {
        (Some(product_id), Some(seller_id), Some(buyer_id), Some(total_amount)) if problems.is_empty() => {
            let product_unit_price = order.product_unit_price.unwrap_or_else(|| {
                // Integer division; only hit when the caller supplied a total but no unit price.
                (total_amount.value() / order.quantity).into()
            });
            Ok(ValidatedOrder {
                id: OrderId::random(),
                product_id,
                product_name: order.product_name,
                product_unit_price,
                seller_id,
                buyer_id,
                quantity: order.quantity,
                total_amount,
                currency: if order.currency.trim().is_empty() {
                    DEFAULT_CURRENCY_CODE.to_string()
                } else {
                    order.currency.trim().to_ascii_uppercase()
                },
                shipping_address: order.shipping_address,
                transaction_id: order.transaction_id,
                created_at: Utc::now(),
            })
        },
        _ => Err(OrderFlowError::ValidationError(problems)),
    }
}

impl<B> OrderLifecycleApi<B>
where B: OrderStore
{
    /// Validates and persists a new order in `pending`/`pending`/`not_shipped`, with a single history entry recording
    /// the buyer as its author. Every invalid field is reported in one [`OrderFlowError::ValidationError`].
    pub async fn create_order(&self, order: NewOrder) -> Result<Order, OrderFlowError> {
        let order = validate_new_order(order)?;
        let order = self.db.insert_order(order).await?;
        debug!("🔄️📦️ Order {} created for buyer {} ({} x {})", order.id, order.buyer_id, order.quantity, order.product_id);
        Ok(order)
    }

    /// Fetches an order without any authorization check. For internal flows only.
    pub async fn fetch_order(&self, id: &OrderId) -> Result<Order, OrderFlowError> {
        self.db.fetch_order(id).await?.ok_or_else(|| OrderFlowError::order_not_found(id))
    }

    /// Resolves a payment reference to the orders it covers. The reference is tried as an order id first and then as
    /// a cart transaction id. An empty result means nothing matched.
    pub async fn fetch_order_group(&self, reference: &str) -> Result<Vec<Order>, OrderFlowError> {
        if let Some(order) = self.db.fetch_order(&OrderId::from(reference)).await? {
            return Ok(vec![order]);
        }
        let orders = self.db.fetch_orders_for_transaction(&TransactionId::from(reference)).await?;
        Ok(orders)
    }

    /// Fetches an order on behalf of `actor`, who must be its buyer, its seller, or an admin.
    pub async fn fetch_order_for(&self, id: &OrderId, actor: &Actor) -> Result<Order, OrderFlowError> {
        let order = self.fetch_order(id).await?;
        let involved = order.buyer_id == actor.id || order.seller_id == actor.id;
        if actor.is_privileged() || involved {
            Ok(order)
        } else {
            Err(OrderFlowError::AuthorizationError(format!("{} is not a party to order {id}", actor.id)))
        }
    }

    fn check_ownership(order: &Order, actor: &Actor) -> Result<(), OrderFlowError> {
        if order.is_owned_by(actor) {
            Ok(())
        } else {
            Err(OrderFlowError::AuthorizationError(format!(
                "{} is not the {} on order {}",
                actor.id, actor.role, order.id
            )))
        }
    }

    /// Moves an order to `target` on behalf of `actor`.
    ///
    /// Ownership is checked before anything else, so a buyer or seller who is not on the order gets an authorization
    /// error whatever state the order is in. The transition must then appear in the state table for the actor's role.
    /// Moving to `cancelled` records the notes as the cancellation reason.
    pub async fn transition(
        &self,
        id: &OrderId,
        target: OrderStatus,
        actor: &Actor,
        notes: Option<String>,
    ) -> Result<Order, OrderFlowError> {
        let order = self.fetch_order(id).await?;
        Self::check_ownership(&order, actor)?;
        check_transition(order.order_status, target, actor.role)?;
        let mut change = StatusChange::new(order.order_status, target, actor.id.clone(), notes.clone());
        match target {
            OrderStatus::Delivered => change = change.with_shipping_status(ShippingStatus::Delivered),
            OrderStatus::Cancelled => {
                let cancelled_at = change.changed_at();
                change = change.with_cancellation(CancellationUpdate::Set(Cancellation {
                    cancelled_by: actor.role,
                    cancelled_at,
                    reason: notes,
                }))
            },
            _ => {},
        }
        self.apply(&order, change).await
    }

    /// Cancels an order. A non-empty reason is required.
    pub async fn cancel(&self, id: &OrderId, actor: &Actor, reason: &str) -> Result<Order, OrderFlowError> {
        if reason.trim().is_empty() {
            return Err(OrderFlowError::validation("reason"));
        }
        self.transition(id, OrderStatus::Cancelled, actor, Some(reason.trim().to_string())).await
    }

    /// Restores a cancelled order to the status it had before it was cancelled, as recorded in its history.
    ///
    /// Only admins may do this. If `desired` is given it must agree with the history; a mismatch is an error rather
    /// than a silent substitution.
    pub async fn revert_from_cancelled(
        &self,
        id: &OrderId,
        admin: &Actor,
        desired: Option<OrderStatus>,
    ) -> Result<Order, OrderFlowError> {
        if admin.role != Role::Admin {
            return Err(OrderFlowError::AuthorizationError("Only admins may revert a cancellation".into()));
        }
        let order = self.fetch_order(id).await?;
        if order.order_status != OrderStatus::Cancelled {
            let to = desired.unwrap_or(order.order_status);
            return Err(OrderFlowError::InvalidTransition { from: order.order_status, to, role: admin.role });
        }
        let restored = order.last_active_status().unwrap_or(OrderStatus::Pending);
        if let Some(requested) = desired {
            if requested != restored {
                return Err(OrderFlowError::RevertMismatch { restored, requested });
            }
        }
        let notes = Some(format!("Cancellation reverted by admin {}", admin.id));
        let mut change = StatusChange::new(OrderStatus::Cancelled, restored, admin.id.clone(), notes)
            .with_cancellation(CancellationUpdate::Clear);
        // The original milestone timestamps still stand.
        change.milestone = None;
        if restored == OrderStatus::Pending && order.payment_status == PaymentStatus::Failed {
            change = change.with_payment_status(PaymentStatus::Pending);
        }
        info!("🔄️♻️ Order {id} restored from cancelled to {restored} by {}", admin.id);
        self.apply(&order, change).await
    }

    /// Settles a payment against a pending order. Only the caller that wins the store's conditional update gets
    /// [`SettleOutcome::Settled`]; every other caller sees `AlreadyPaid` or `NotPayable` and must do nothing further.
    pub async fn record_payment(&self, id: &OrderId, details: PaymentDetails) -> Result<SettleOutcome, OrderFlowError> {
        let entry = StatusHistoryEntry::new(
            OrderStatus::Paid,
            Actor::system().id,
            Some(match &details.external_transaction_id {
                Some(txid) => format!("Payment {txid} received"),
                None => "Payment received".to_string(),
            }),
        );
        let outcome = self.db.settle_order(id, details, entry).await?;
        match &outcome {
            SettleOutcome::Settled(order) => {
                debug!("🔄️💰️ Order {id} is now paid");
                let event = OrderStatusChangedEvent::new(OrderStatus::Pending, order.clone());
                self.producers.publish_status_changed(event).await;
            },
            SettleOutcome::AlreadyPaid(_) => trace!("🔄️💰️ Order {id} was already paid. Nothing to do."),
            SettleOutcome::NotPayable(order) => {
                warn!("🔄️💰️ Payment for order {id} arrived while it is {}. Not settled.", order.order_status)
            },
        }
        Ok(outcome)
    }

    /// Cancels an order whose payment failed or never arrived. Returns `None` (and changes nothing) if the order is
    /// no longer pending.
    pub async fn void_unpaid(&self, id: &OrderId, reason: &str) -> Result<Option<Order>, OrderFlowError> {
        let order = self.fetch_order(id).await?;
        if order.order_status != OrderStatus::Pending || order.payment_status == PaymentStatus::Paid {
            trace!("🔄️❌️ Order {id} is {}. Not voiding.", order.order_status);
            return Ok(None);
        }
        let system = Actor::system();
        let change = StatusChange::new(OrderStatus::Pending, OrderStatus::Cancelled, system.id, Some(reason.into()));
        let cancelled_at = change.changed_at();
        let change = change.with_payment_status(PaymentStatus::Failed).with_cancellation(CancellationUpdate::Set(
            Cancellation { cancelled_by: Role::System, cancelled_at, reason: Some(reason.to_string()) },
        ));
        match self.apply(&order, change).await {
            Ok(order) => Ok(Some(order)),
            Err(OrderFlowError::ConcurrentUpdate(_)) => {
                debug!("🔄️❌️ Order {id} changed while being voided. Leaving it alone.");
                Ok(None)
            },
            Err(e) => Err(e),
        }
    }

    /// Voids every unpaid order created before `cutoff` for which no payment was ever started. Orders with a payment
    /// reference are left alone; their gateway has to be asked first (see `ReconciliationApi::expire_unpaid`).
    pub async fn expire_unpaid(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>, OrderFlowError> {
        let query = OrderQueryFilter::default()
            .with_order_status(OrderStatus::Pending)
            .with_payment_status(PaymentStatus::Pending)
            .with_payment_reference(false)
            .created_before(cutoff);
        let candidates = self.db.search_orders(query).await?;
        let mut expired = Vec::with_capacity(candidates.len());
        for order in candidates {
            match self.void_unpaid(&order.id, PAYMENT_WINDOW_EXPIRED).await {
                Ok(Some(order)) => expired.push(order),
                Ok(None) => {},
                Err(e) => error!("🔄️🕰️ Could not expire order {}: {e}", order.id),
            }
        }
        if !expired.is_empty() {
            info!("🔄️🕰️ {} unpaid orders expired", expired.len());
        }
        Ok(expired)
    }

    /// Corrects the shipping address. Admin only, and only before the order has been delivered.
    pub async fn update_shipping_address(
        &self,
        id: &OrderId,
        admin: &Actor,
        address: ShippingAddress,
    ) -> Result<Order, OrderFlowError> {
        if admin.role != Role::Admin {
            return Err(OrderFlowError::AuthorizationError("Only admins may change a shipping address".into()));
        }
        let missing = address.missing_fields();
        if !missing.is_empty() {
            return Err(OrderFlowError::ValidationError(missing.into_iter().map(String::from).collect()));
        }
        let order = self.fetch_order(id).await?;
        if matches!(order.order_status, OrderStatus::Delivered | OrderStatus::Completed) {
            return Err(OrderFlowError::validation(format!(
                "shippingAddress cannot change once the order is {}",
                order.order_status
            )));
        }
        let order = self.db.update_shipping_address(id, address).await?;
        info!("🔄️📦️ Shipping address for order {id} updated by {}", admin.id);
        Ok(order)
    }

    async fn apply(&self, order: &Order, change: StatusChange) -> Result<Order, OrderFlowError> {
        let from = change.from;
        let updated = self.db.update_order_status(&order.id, change).await?;
        debug!("🔄️📦️ Order {} moved from {from} to {}", updated.id, updated.order_status);
        self.producers.publish_status_changed(OrderStatusChangedEvent::new(from, updated.clone())).await;
        if updated.order_status == OrderStatus::Cancelled {
            self.producers.publish_order_annulled(OrderAnnulledEvent::new(updated.clone())).await;
        }
        Ok(updated)
    }
}
