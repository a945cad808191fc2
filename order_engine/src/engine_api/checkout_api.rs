use std::fmt::Debug;

use log::*;
use mkt_common::Money;

use crate::{
    db_types::{
        NewOrder,
        Order,
        OrderStatus,
        ProductId,
        ProductStatus,
        ProviderKind,
        ShippingAddress,
        TransactionId,
        UserId,
    },
    engine_api::{
        errors::OrderFlowError,
        lifecycle_api::OrderLifecycleApi,
        order_objects::{CartCheckout, CheckoutResult, CheckoutSettings, PaymentIntent, SkippedItem},
    },
    events::EventProducers,
    providers::{PaymentLink, PaymentProvider, PaymentProviders, PaymentRequest},
    traits::{CartProvider, OrderStore, ProductCatalog},
};

/// `CheckoutApi` turns a product or a cart into pending orders, and separately asks a payment provider for a checkout
/// link covering them. Creating orders never talks to a gateway.
pub struct CheckoutApi<B, P> {
    lifecycle: OrderLifecycleApi<B>,
    providers: PaymentProviders<P>,
    settings: CheckoutSettings,
}

impl<B, P> Debug for CheckoutApi<B, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CheckoutApi({:?})", self.providers)
    }
}

impl<B: Clone, P: Clone> Clone for CheckoutApi<B, P> {
    fn clone(&self) -> Self {
        Self { lifecycle: self.lifecycle.clone(), providers: self.providers.clone(), settings: self.settings.clone() }
    }
}

impl<B, P> CheckoutApi<B, P> {
    pub fn new(db: B, producers: EventProducers, providers: PaymentProviders<P>, settings: CheckoutSettings) -> Self {
        Self { lifecycle: OrderLifecycleApi::new(db, producers), providers, settings }
    }

    pub fn settings(&self) -> &CheckoutSettings {
        &self.settings
    }

    fn payment_intent(&self, order_ref: &str, orders: &[Order]) -> PaymentIntent {
        let amount = orders.iter().map(|o| o.total_amount + self.settings.shipping_fee).sum::<Money>();
        let description = match orders {
            [order] => format!("{} x{}", order.product_name, order.quantity),
            _ => format!("{} items", orders.len()),
        };
        let currency = self.settings.currency.clone();
        PaymentIntent { order_ref: order_ref.to_string(), amount, currency, description }
    }
}

fn check_address(address: &ShippingAddress) -> Result<(), OrderFlowError> {
    let missing = address.missing_fields();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(OrderFlowError::ValidationError(missing.into_iter().map(String::from).collect()))
    }
}

impl<B, P> CheckoutApi<B, P>
where
    B: OrderStore + ProductCatalog + CartProvider,
    P: PaymentProvider,
{
    /// Creates a single pending order for `quantity` units of a product. The total is the product's current unit
    /// price times the quantity; shipping is added to the payment intent, not to the order.
    pub async fn checkout_single(
        &self,
        buyer: &UserId,
        product_id: &ProductId,
        quantity: i64,
        address: ShippingAddress,
    ) -> Result<CheckoutResult, OrderFlowError> {
        check_address(&address)?;
        if quantity <= 0 {
            return Err(OrderFlowError::validation("quantity"));
        }
        let product = self
            .lifecycle
            .db()
            .fetch_product(product_id)
            .await?
            .ok_or_else(|| OrderFlowError::NotFound(format!("Product {product_id}")))?;
        if !product.can_supply(quantity) {
            debug!("🔄️🛒️ Product {product_id} cannot supply {quantity} units ({}, {} left)", product.status, product.quantity);
            return Err(OrderFlowError::ProductUnavailable(product_id.clone()));
        }
        let new_order = NewOrder::for_product(&product, buyer.clone(), quantity, address);
        let order = self.lifecycle.create_order(new_order).await?;
        let payment_intent = self.payment_intent(order.id.as_str(), std::slice::from_ref(&order));
        info!("🔄️🛒️ Buyer {buyer} checked out order {} for {}", order.id, payment_intent.amount);
        Ok(CheckoutResult { order, payment_intent })
    }

    /// Creates one pending order per orderable cart line, all sharing a fresh transaction id. Lines whose product is
    /// missing, sold or short of stock are skipped and reported. The cart itself is left as it is.
    pub async fn checkout_from_cart(
        &self,
        buyer: &UserId,
        address: ShippingAddress,
    ) -> Result<CartCheckout, OrderFlowError> {
        check_address(&address)?;
        let lines = self.lifecycle.db().fetch_cart(buyer).await?;
        if lines.is_empty() {
            return Err(OrderFlowError::EmptyCart);
        }
        let mut orderable = Vec::with_capacity(lines.len());
        let mut skipped = Vec::new();
        for line in lines {
            if line.quantity <= 0 {
                skipped.push(SkippedItem::new(line.product_id, line.quantity, "Invalid quantity"));
                continue;
            }
            match self.lifecycle.db().fetch_product(&line.product_id).await? {
                None => skipped.push(SkippedItem::new(line.product_id, line.quantity, "Product not found")),
                Some(p) if p.status != ProductStatus::Available => {
                    skipped.push(SkippedItem::new(line.product_id, line.quantity, "Product is no longer available"))
                },
                Some(p) if !p.can_supply(line.quantity) => {
                    let reason = format!("Only {} left in stock", p.quantity);
                    skipped.push(SkippedItem::new(line.product_id, line.quantity, reason))
                },
                Some(p) => orderable.push((p, line.quantity)),
            }
        }
        if orderable.is_empty() {
            info!("🔄️🛒️ Nothing in {buyer}'s cart can be ordered. {} lines skipped", skipped.len());
            return Err(OrderFlowError::NoValidItems(skipped));
        }
        let transaction_id = TransactionId::random();
        let mut orders = Vec::with_capacity(orderable.len());
        for (product, quantity) in orderable {
            let order = NewOrder::for_product(&product, buyer.clone(), quantity, address.clone())
                .with_transaction_id(transaction_id.clone());
            orders.push(self.lifecycle.create_order(order).await?);
        }
        let payment_intent = self.payment_intent(transaction_id.as_str(), &orders);
        info!(
            "🔄️🛒️ Cart checkout {transaction_id} for {buyer}: {} orders, {} skipped, {} due",
            orders.len(),
            skipped.len(),
            payment_intent.amount
        );
        Ok(CartCheckout { transaction_id, orders, skipped, payment_intent })
    }

    /// Asks `provider` for a checkout link covering every order behind `order_ref` (an order id or a cart
    /// transaction id). Each order records the provider and the gateway's correlation id once the link exists.
    ///
    /// Calling this again creates a new payment request; the last correlation id wins.
    pub async fn begin_payment(
        &self,
        order_ref: &str,
        buyer: &UserId,
        provider: ProviderKind,
    ) -> Result<PaymentLink, OrderFlowError> {
        let gateway = self
            .providers
            .get(provider)
            .ok_or_else(|| OrderFlowError::validation(format!("provider '{provider}' is not enabled")))?;
        let orders = self.lifecycle.fetch_order_group(order_ref).await?;
        if orders.is_empty() {
            return Err(OrderFlowError::NotFound(format!("Order {order_ref}")));
        }
        if let Some(order) = orders.iter().find(|o| &o.buyer_id != buyer) {
            return Err(OrderFlowError::AuthorizationError(format!("{buyer} did not place order {}", order.id)));
        }
        if let Some(order) = orders.iter().find(|o| o.order_status != OrderStatus::Pending || o.is_paid()) {
            return Err(OrderFlowError::validation(format!(
                "order {} is {} and cannot be paid",
                order.id, order.order_status
            )));
        }
        let intent = self.payment_intent(order_ref, &orders);
        let request = PaymentRequest {
            amount: intent.amount,
            currency: intent.currency,
            order_ref: intent.order_ref,
            description: intent.description,
            return_url: format!("{}?ref={order_ref}", self.settings.return_url),
            callback_url: format!(
                "{}/payments/{provider}/webhook",
                self.settings.callback_base_url.trim_end_matches('/')
            ),
        };
        let link = gateway.create_payment_request(&request).await.map_err(|e| {
            warn!("🔄️💳️ Could not create a {provider} payment for {order_ref}: {e}");
            e
        })?;
        let ids = orders.iter().map(|o| o.id.clone()).collect::<Vec<_>>();
        self.lifecycle.db().attach_payment_reference(&ids, provider, &link.correlation_id).await?;
        info!("🔄️💳️ {provider} payment {} opened for {order_ref} ({})", link.correlation_id, request.amount);
        Ok(link)
    }
}
