use std::{
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
    time::Duration,
};

use log::*;
use order_engine::{
    db_types::{OrderStatus, ProviderKind},
    events::{EventHandlers, EventHooks},
    providers::AckDecision,
};

mod support;
use support::*;

#[derive(Default, Clone)]
struct HookCalled {
    called: Arc<AtomicI32>,
}

impl HookCalled {
    pub fn called(&self) {
        let _ = self.called.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> i32 {
        self.called.load(Ordering::Relaxed)
    }
}

async fn wait_for(hook: &HookCalled, expected: i32) {
    for _ in 0..50 {
        if hook.count() >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn order_paid_fires_once_per_settlement() {
    let paid = HookCalled::default();
    let changed = HookCalled::default();
    let mut hooks = EventHooks::default();
    let paid_copy = paid.clone();
    hooks.on_order_paid(move |ev| {
        info!("🪝️ Order {} paid via {:?}", ev.order.id, ev.provider);
        assert_eq!(ev.provider, Some(ProviderKind::PayOs));
        paid_copy.called();
        Box::pin(async {})
    });
    let changed_copy = changed.clone();
    hooks.on_status_changed(move |ev| {
        info!("🪝️ Order {} moved from {} to {}", ev.order.id, ev.old_status, ev.order.order_status);
        changed_copy.called();
        Box::pin(async {})
    });
    let handlers = EventHandlers::new(16, hooks);
    let h = setup_with(handlers.producers(), test_settings()).await;
    handlers.start_handlers().await;

    let order = pending_order(&h, "p1", 1).await;
    let callback = h.gateway.callback("succeeded", Some(order.id.as_str()), None, Some(105_000), None);
    assert_eq!(h.reconciliation.handle_webhook(ProviderKind::PayOs, callback.clone()).await, AckDecision::Accepted);
    assert_eq!(h.reconciliation.handle_webhook(ProviderKind::PayOs, callback).await, AckDecision::AlreadyProcessed);
    h.lifecycle.transition(&order.id, OrderStatus::Processing, &seller(), None).await.unwrap();

    wait_for(&changed, 2).await;
    wait_for(&paid, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(paid.count(), 1);
    assert_eq!(changed.count(), 2);
}

#[tokio::test]
async fn annulled_fires_when_an_order_is_voided() {
    let annulled = HookCalled::default();
    let mut hooks = EventHooks::default();
    let annulled_copy = annulled.clone();
    hooks.on_order_annulled(move |ev| {
        assert_eq!(ev.order.order_status, OrderStatus::Cancelled);
        assert_eq!(ev.reason.as_deref(), Some("Payment declined"));
        annulled_copy.called();
        Box::pin(async {})
    });
    let handlers = EventHandlers::new(16, hooks);
    let h = setup_with(handlers.producers(), test_settings()).await;
    handlers.start_handlers().await;

    let order = pending_order(&h, "p1", 1).await;
    h.lifecycle.void_unpaid(&order.id, "Payment declined").await.unwrap();
    wait_for(&annulled, 1).await;
    assert_eq!(annulled.count(), 1);
}
