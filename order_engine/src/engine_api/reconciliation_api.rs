use std::{collections::HashSet, fmt::Debug};

use chrono::{DateTime, Utc};
use log::*;
use mkt_common::Money;

use crate::{
    db_types::{
        Actor,
        NewLedgerEntry,
        NewReviewEntry,
        Order,
        OrderStatus,
        PaymentDetails,
        PaymentStatus,
        ProviderKind,
        Role,
    },
    engine_api::{
        errors::OrderFlowError,
        lifecycle_api::{OrderLifecycleApi, PAYMENT_WINDOW_EXPIRED},
        order_objects::{OrderPaymentView, ReconciliationSettings, SweepReport},
    },
    events::{EventProducers, OrderPaidEvent},
    providers::{
        AckDecision,
        Acknowledgement,
        CallbackPayload,
        CallbackStatus,
        CallbackVerification,
        PaymentProvider,
        PaymentProviders,
    },
    traits::{OrderQueryFilter, OrderStore, ProductCatalog, RateLimiter, ReconciliationJournal, SettleOutcome},
};

/// What a gateway told us about a successful payment, from a callback or a status query.
#[derive(Debug, Clone, Default)]
pub struct PaymentEvidence {
    pub amount: Option<Money>,
    pub external_transaction_id: Option<String>,
    pub correlation_id: Option<String>,
}

impl From<&CallbackVerification> for PaymentEvidence {
    fn from(v: &CallbackVerification) -> Self {
        Self {
            amount: v.amount,
            external_transaction_id: v.external_transaction_id.clone(),
            correlation_id: v.correlation_id.clone(),
        }
    }
}

/// What a gateway said when it was asked about an open payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GatewayAnswer {
    /// Nothing was asked: the orders are closed, no payment was started, or the gateway cannot be polled.
    NotAsked,
    /// The gateway timed out, failed, or is not configured.
    Unreachable,
    InFlight,
    Failed,
    Paid,
}

/// `ReconciliationApi` brings orders in line with what the payment gateways report, whether the news arrives by
/// webhook, by a buyer asking us to check, or by the background sweep. All three paths settle through
/// [`ReconciliationApi::settle_group`], so a payment is applied at most once however many times it is reported.
pub struct ReconciliationApi<B, P> {
    lifecycle: OrderLifecycleApi<B>,
    producers: EventProducers,
    providers: PaymentProviders<P>,
    settings: ReconciliationSettings,
}

impl<B, P> Debug for ReconciliationApi<B, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReconciliationApi({:?})", self.providers)
    }
}

impl<B: Clone, P: Clone> Clone for ReconciliationApi<B, P> {
    fn clone(&self) -> Self {
        Self {
            lifecycle: self.lifecycle.clone(),
            producers: self.producers.clone(),
            providers: self.providers.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<B, P> ReconciliationApi<B, P> {
    pub fn new(
        db: B,
        producers: EventProducers,
        providers: PaymentProviders<P>,
        settings: ReconciliationSettings,
    ) -> Self {
        let lifecycle = OrderLifecycleApi::new(db, producers.clone());
        Self { lifecycle, producers, providers, settings }
    }

    pub fn providers(&self) -> &PaymentProviders<P> {
        &self.providers
    }
}

impl<B, P> ReconciliationApi<B, P>
where
    B: OrderStore + ProductCatalog + ReconciliationJournal + RateLimiter,
    P: PaymentProvider,
{
    /// The provider's literal reply for `decision`, or `None` if the provider is not configured.
    pub fn acknowledge(&self, provider: ProviderKind, decision: AckDecision) -> Option<Acknowledgement> {
        self.providers.get(provider).map(|p| p.acknowledge(decision))
    }

    /// Verifies and applies a gateway callback.
    ///
    /// The result says how the callback should be acknowledged. Only [`AckDecision::Retry`] asks the gateway to send
    /// it again; unmatched callbacks are acknowledged so that the gateway stops retrying, and successful payments among
    /// them are written to the manual review journal.
    pub async fn handle_webhook(&self, provider: ProviderKind, payload: CallbackPayload) -> AckDecision {
        let Some(gateway) = self.providers.get(provider) else {
            warn!("🔐️ Received a callback for {provider}, which is not configured. Rejecting it.");
            return AckDecision::Rejected;
        };
        let verification = gateway.verify_callback(&payload);
        if !verification.valid {
            let reason = verification.failure_reason.as_deref().unwrap_or("unknown reason");
            warn!("🔐️ SECURITY: {provider} callback failed verification ({reason}). It has been ignored.");
            return AckDecision::Rejected;
        }
        match self.apply_callback(provider, &verification, &payload).await {
            Ok(decision) => {
                debug!("🔄️💳️ {provider} callback handled: {decision:?}");
                decision
            },
            Err(e) => {
                error!("🔄️💳️ Could not apply {provider} callback. Asking the gateway to retry. {e}");
                AckDecision::Retry
            },
        }
    }

    async fn apply_callback(
        &self,
        provider: ProviderKind,
        verification: &CallbackVerification,
        payload: &CallbackPayload,
    ) -> Result<AckDecision, OrderFlowError> {
        let orders = self.resolve_callback(provider, verification).await?;
        if orders.is_empty() {
            let reference = verification.order_ref.as_deref().or(verification.correlation_id.as_deref());
            info!("🔄️💳️ {provider} callback for {} matches no order", reference.unwrap_or("<no reference>"));
            if verification.succeeded() {
                let reason = format!("Payment received for unknown reference {}", reference.unwrap_or("<none>"));
                let entry = NewReviewEntry::new(None, Some(provider), reason).with_payload(payload.body.clone());
                self.journal(entry).await;
            }
            return Ok(AckDecision::Unmatched);
        }
        if orders.iter().all(Order::is_paid) {
            trace!("🔄️💳️ Every order behind this {provider} callback is already paid");
            return Ok(AckDecision::AlreadyProcessed);
        }
        match verification.status {
            CallbackStatus::Informational => Ok(AckDecision::Accepted),
            CallbackStatus::Failed => {
                let reason =
                    verification.failure_reason.clone().unwrap_or_else(|| format!("{provider} payment failed"));
                self.void_failed(provider, &orders, verification.correlation_id.as_deref(), &reason).await?;
                Ok(AckDecision::Accepted)
            },
            CallbackStatus::Succeeded => {
                self.settle_group(provider, &orders, PaymentEvidence::from(verification)).await?;
                Ok(AckDecision::Accepted)
            },
        }
    }

    /// Primary order id first, then cart transaction id, then the gateway's own correlation id.
    async fn resolve_callback(
        &self,
        provider: ProviderKind,
        verification: &CallbackVerification,
    ) -> Result<Vec<Order>, OrderFlowError> {
        if let Some(order_ref) = &verification.order_ref {
            let orders = self.lifecycle.fetch_order_group(order_ref).await?;
            if !orders.is_empty() {
                return Ok(orders);
            }
        }
        match &verification.correlation_id {
            Some(id) => Ok(self.lifecycle.db().fetch_orders_for_correlation(provider, id).await?),
            None => Ok(Vec::new()),
        }
    }

    async fn void_failed(
        &self,
        provider: ProviderKind,
        orders: &[Order],
        correlation_id: Option<&str>,
        reason: &str,
    ) -> Result<(), OrderFlowError> {
        for order in orders.iter().filter(|o| o.order_status == OrderStatus::Pending && !o.is_paid()) {
            // A failure report for an earlier payment attempt must not cancel a newer one.
            let superseded = match (correlation_id, order.payment_correlation_id.as_deref()) {
                (Some(reported), Some(current)) => reported != current,
                _ => false,
            };
            if superseded {
                info!("🔄️💳️ Ignoring {provider} failure for order {}. A newer payment attempt is open.", order.id);
                continue;
            }
            if self.lifecycle.void_unpaid(&order.id, reason).await?.is_some() {
                info!("🔄️💳️ Order {} cancelled after failed {provider} payment: {reason}", order.id);
            }
        }
        Ok(())
    }

    /// Applies a successful payment to every order in a group.
    ///
    /// Each order is settled through the store's conditional update, so an order that is already paid is skipped and
    /// an order that was cancelled is never revived (the payment goes to manual review instead). A single order is
    /// credited with the gateway's amount; in a cart group each order is credited with its own total plus shipping.
    ///
    /// Work that follows a successful settlement (stock, ledger, events) is not rolled back if it fails. Failures are
    /// logged and journaled. The method only returns an error when at least one order could not be settled at all,
    /// after attempting every other order in the group. Returns the number of orders this call settled.
    pub async fn settle_group(
        &self,
        provider: ProviderKind,
        orders: &[Order],
        evidence: PaymentEvidence,
    ) -> Result<usize, OrderFlowError> {
        let fee = self.settings.shipping_fee;
        let expected = orders.iter().map(|o| o.total_amount + fee).sum::<Money>();
        if let Some(amount) = evidence.amount {
            if amount < expected {
                warn!("🔄️💰️ {provider} reported {amount} but {expected} was due. Settling and flagging for review.");
                let reason = format!("Underpayment: {provider} reported {amount}, expected {expected}");
                let order_id = orders.first().map(|o| o.id.clone());
                self.journal(NewReviewEntry::new(order_id, Some(provider), reason)).await;
            }
        }
        let single = orders.len() == 1;
        let mut settled = 0;
        let mut failed = 0;
        for order in orders {
            if order.is_paid() {
                continue;
            }
            let paid_amount = match evidence.amount {
                Some(amount) if single => amount,
                _ => order.total_amount + fee,
            };
            let details = PaymentDetails {
                external_transaction_id: evidence.external_transaction_id.clone(),
                paid_amount,
                paid_at: Utc::now(),
            };
            match self.lifecycle.record_payment(&order.id, details).await {
                Ok(SettleOutcome::Settled(order)) => {
                    settled += 1;
                    self.after_settlement(provider, &order, &evidence).await;
                },
                Ok(SettleOutcome::AlreadyPaid(_)) => {},
                Ok(SettleOutcome::NotPayable(order)) => {
                    let reason = format!("Payment received for {} order. It was not reinstated.", order.order_status);
                    let entry = NewReviewEntry::new(Some(order.id.clone()), Some(provider), reason)
                        .with_payload(evidence.external_transaction_id.clone().unwrap_or_default());
                    self.journal(entry).await;
                },
                Err(e) => {
                    error!("🔄️💰️ Could not settle order {}: {e}", order.id);
                    failed += 1;
                },
            }
        }
        if failed > 0 {
            return Err(OrderFlowError::DatabaseError(format!(
                "{failed} of {} orders in the group could not be settled",
                orders.len()
            )));
        }
        if settled > 0 {
            info!("🔄️💰️ {settled} orders settled via {provider}");
        }
        Ok(settled)
    }

    async fn after_settlement(&self, provider: ProviderKind, order: &Order, evidence: &PaymentEvidence) {
        let db = self.lifecycle.db();
        if let Err(e) = db.decrement_stock(&order.product_id, order.quantity).await {
            error!("🔄️💰️ Order {} is paid but stock for {} could not be reduced: {e}", order.id, order.product_id);
            let reason = format!("Stock decrement of {} for {} failed: {e}", order.quantity, order.product_id);
            self.journal(NewReviewEntry::new(Some(order.id.clone()), Some(provider), reason)).await;
        }
        let external_transaction_id = evidence
            .external_transaction_id
            .clone()
            .or_else(|| evidence.correlation_id.clone())
            .unwrap_or_else(|| format!("{provider}:{}", order.id));
        let entry = NewLedgerEntry {
            order_id: order.id.clone(),
            transaction_id: order.transaction_id.clone(),
            provider,
            external_transaction_id,
            amount: order.payment_details.as_ref().map(|d| d.paid_amount).unwrap_or(order.total_amount),
            payer_id: order.buyer_id.clone(),
            payee_id: order.seller_id.clone(),
        };
        match db.insert_ledger_entry(entry).await {
            Ok(true) => {},
            Ok(false) => debug!("🔄️💰️ Ledger already holds this payment for order {}", order.id),
            Err(e) => {
                error!("🔄️💰️ Order {} is paid but the ledger entry could not be written: {e}", order.id);
                let reason = format!("Ledger write failed: {e}");
                self.journal(NewReviewEntry::new(Some(order.id.clone()), Some(provider), reason)).await;
            },
        }
        self.producers.publish_order_paid(OrderPaidEvent::new(order.clone(), Some(provider))).await;
    }

    /// Checks a payment with the gateway on behalf of a buyer who has returned from the checkout page.
    ///
    /// If the orders are already settled nothing is asked. Otherwise the gateway is queried, bounded by the configured
    /// timeout. A gateway that is slow or failing yields the stored state flagged as stale.
    pub async fn verify_payment_sync(
        &self,
        reference: &str,
        actor: &Actor,
    ) -> Result<OrderPaymentView, OrderFlowError> {
        self.check_verify_rate(actor).await?;
        let orders = self.lifecycle.fetch_order_group(reference).await?;
        if orders.is_empty() {
            return Err(OrderFlowError::NotFound(format!("Order {reference}")));
        }
        if let Some(order) = orders.iter().find(|o| !o.is_owned_by(actor)) {
            return Err(OrderFlowError::AuthorizationError(format!("{} may not view order {}", actor.id, order.id)));
        }
        self.poll_group(orders).await
    }

    async fn check_verify_rate(&self, actor: &Actor) -> Result<(), OrderFlowError> {
        if actor.role == Role::System {
            return Ok(());
        }
        let key = format!("verify-payment:{}", actor.id);
        let allowed =
            self.lifecycle.db().check_rate(&key, self.settings.verify_window, self.settings.verify_limit).await?;
        if allowed {
            Ok(())
        } else {
            debug!("🔄️💳️ {} is verifying payments too often", actor.id);
            Err(OrderFlowError::RateLimited)
        }
    }

    async fn poll_group(&self, orders: Vec<Order>) -> Result<OrderPaymentView, OrderFlowError> {
        let (orders, answer) = self.ask_gateway(orders).await?;
        Ok(OrderPaymentView::new(orders, answer == GatewayAnswer::Unreachable))
    }

    /// Asks the gateway about the open payment behind `orders` and settles the group if the gateway says it was paid.
    /// Returns the (possibly refreshed) orders together with what the gateway said.
    async fn ask_gateway(&self, orders: Vec<Order>) -> Result<(Vec<Order>, GatewayAnswer), OrderFlowError> {
        let open = orders.iter().filter(|o| o.order_status == OrderStatus::Pending && !o.is_paid()).collect::<Vec<_>>();
        if open.is_empty() {
            return Ok((orders, GatewayAnswer::NotAsked));
        }
        let reference = open.iter().find_map(|o| Some((o.payment_method?, o.payment_correlation_id.clone()?)));
        let Some((provider, correlation_id)) = reference else {
            trace!("🔄️💳️ No payment has been started for these orders yet");
            return Ok((orders, GatewayAnswer::NotAsked));
        };
        let Some(gateway) = self.providers.get(provider) else {
            warn!("🔄️💳️ Orders reference {provider}, which is not configured. Reporting stored state.");
            return Ok((orders, GatewayAnswer::Unreachable));
        };
        let status =
            match tokio::time::timeout(self.settings.query_timeout, gateway.query_status(&correlation_id)).await {
                Err(_) => {
                    warn!("🔄️💳️ {provider} did not answer a status query for {correlation_id} in time");
                    return Ok((orders, GatewayAnswer::Unreachable));
                },
                Ok(Err(e)) => {
                    warn!("🔄️💳️ Status query for {correlation_id} failed. {e}");
                    return Ok((orders, GatewayAnswer::Unreachable));
                },
                Ok(Ok(None)) => return Ok((orders, GatewayAnswer::NotAsked)),
                Ok(Ok(Some(status))) => status,
            };
        if !status.succeeded {
            trace!("🔄️💳️ {provider} reports {correlation_id} as {}", if status.pending { "pending" } else { "failed" });
            let answer = if status.pending { GatewayAnswer::InFlight } else { GatewayAnswer::Failed };
            return Ok((orders, answer));
        }
        let evidence = PaymentEvidence {
            amount: status.amount,
            external_transaction_id: status.external_transaction_id,
            correlation_id: Some(correlation_id),
        };
        self.settle_group(provider, &orders, evidence).await?;
        let mut refreshed = Vec::with_capacity(orders.len());
        for order in &orders {
            refreshed.push(self.lifecycle.fetch_order(&order.id).await?);
        }
        Ok((refreshed, GatewayAnswer::Paid))
    }

    /// Voids unpaid orders created before `cutoff`.
    ///
    /// Orders for which no payment was started are voided straight away. Orders with a payment reference are checked
    /// with their gateway first. A payment that has arrived is settled. A payment the gateway still reports as in
    /// progress, or one that could not be checked, is left for the next run. Gateways that cannot be polled rely on
    /// their own expiry webhook, so their orders are voided like any other.
    pub async fn expire_unpaid(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>, OrderFlowError> {
        let mut expired = self.lifecycle.expire_unpaid(cutoff).await?;
        let query = OrderQueryFilter::default()
            .with_order_status(OrderStatus::Pending)
            .with_payment_status(PaymentStatus::Pending)
            .with_payment_reference(true)
            .created_before(cutoff);
        let candidates = self.lifecycle.db().search_orders(query).await?;
        let groups = candidates
            .iter()
            .filter_map(|o| Some((o.payment_method?, o.payment_correlation_id.clone()?)))
            .collect::<HashSet<_>>();
        for (provider, correlation_id) in groups {
            let orders = self.lifecycle.db().fetch_orders_for_correlation(provider, &correlation_id).await?;
            let orders = match self.ask_gateway(orders).await {
                Ok((orders, GatewayAnswer::NotAsked | GatewayAnswer::Failed)) => orders,
                Ok((_, answer)) => {
                    debug!("🔄️🕰️ Not expiring orders behind {provider} payment {correlation_id}: {answer:?}");
                    continue;
                },
                Err(e) => {
                    error!("🔄️🕰️ Could not check {provider} payment {correlation_id} before expiry: {e}");
                    continue;
                },
            };
            for order in orders.iter().filter(|o| o.created_at < cutoff) {
                match self.lifecycle.void_unpaid(&order.id, PAYMENT_WINDOW_EXPIRED).await {
                    Ok(Some(order)) => expired.push(order),
                    Ok(None) => {},
                    Err(e) => error!("🔄️🕰️ Could not expire order {}: {e}", order.id),
                }
            }
        }
        Ok(expired)
    }

    /// Polls the gateways for pending orders created before `cutoff` that have a payment reference. Catches payments
    /// whose webhook never arrived.
    pub async fn sweep_pending(&self, cutoff: DateTime<Utc>) -> Result<SweepReport, OrderFlowError> {
        let query = OrderQueryFilter::default()
            .with_order_status(OrderStatus::Pending)
            .with_payment_status(PaymentStatus::Pending)
            .with_payment_reference(true)
            .created_before(cutoff);
        let candidates = self.lifecycle.db().search_orders(query).await?;
        let groups = candidates
            .iter()
            .filter_map(|o| Some((o.payment_method?, o.payment_correlation_id.clone()?)))
            .collect::<HashSet<_>>();
        let mut report = SweepReport::default();
        for (provider, correlation_id) in groups {
            report.groups_checked += 1;
            let orders = self.lifecycle.db().fetch_orders_for_correlation(provider, &correlation_id).await?;
            let paid_before = orders.iter().filter(|o| o.is_paid()).count();
            match self.poll_group(orders).await {
                Ok(view) => {
                    if view.stale {
                        report.queries_failed += 1;
                    }
                    let paid_after = view.orders.iter().filter(|o| o.is_paid()).count();
                    report.orders_settled += paid_after.saturating_sub(paid_before);
                },
                Err(e) => {
                    error!("🔄️🕰️ Sweep of {provider} payment {correlation_id} failed: {e}");
                    report.queries_failed += 1;
                },
            }
        }
        if report.groups_checked > 0 {
            info!(
                "🔄️🕰️ Sweep checked {} payments, settled {} orders, {} queries failed",
                report.groups_checked, report.orders_settled, report.queries_failed
            );
        }
        Ok(report)
    }

    async fn journal(&self, entry: NewReviewEntry) {
        if let Err(e) = self.lifecycle.db().insert_review_entry(entry).await {
            error!("🔄️📒️ Could not write to the manual review journal: {e}");
        }
    }
}
