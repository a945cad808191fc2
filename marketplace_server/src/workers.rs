use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use log::*;
use order_engine::{
    db_types::Order,
    providers::GatewayAdapter,
    ReconciliationApi,
    SqliteDatabase,
};
use tokio::task::JoinHandle;

/// Starts the expiry worker, which voids orders that have waited longer than `unpaid_expiry` for a payment. Orders
/// with a payment in progress are checked with their gateway before they are voided.
/// Do not await the returned JoinHandle, as it will run indefinitely.
pub fn start_expiry_worker(
    api: ReconciliationApi<SqliteDatabase, GatewayAdapter>,
    unpaid_expiry: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(StdDuration::from_secs(60));
        info!("🕰️ Unpaid order expiry worker started");
        loop {
            timer.tick().await;
            trace!("🕰️ Running unpaid order expiry job");
            match api.expire_unpaid(Utc::now() - unpaid_expiry).await {
                Ok(expired) if expired.is_empty() => {},
                Ok(expired) => {
                    info!("🕰️ {} unpaid orders expired", expired.len());
                    debug!("🕰️ Expired unpaid orders: {}", order_list(&expired));
                },
                Err(e) => {
                    error!("🕰️ Error running unpaid order expiry job: {e}");
                },
            }
        }
    })
}

/// Starts the reconciliation sweep. Every `period`, payments that have been pending for longer than `min_age` are
/// checked with their gateway, to catch webhooks that never arrived.
pub fn start_reconciliation_worker(
    api: ReconciliationApi<SqliteDatabase, GatewayAdapter>,
    period: StdDuration,
    min_age: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        info!("🕰️ Payment reconciliation worker started. Sweeping every {}s", period.as_secs());
        loop {
            timer.tick().await;
            trace!("🕰️ Running payment reconciliation sweep");
            match api.sweep_pending(Utc::now() - min_age).await {
                Ok(report) if report.groups_checked == 0 => {},
                Ok(report) => info!(
                    "🕰️ Reconciliation sweep checked {} payments, settled {} orders. {} gateway queries failed.",
                    report.groups_checked, report.orders_settled, report.queries_failed
                ),
                Err(e) => {
                    error!("🕰️ Error running payment reconciliation sweep: {e}");
                },
            }
        }
    })
}

fn order_list(orders: &[Order]) -> String {
    orders
        .iter()
        .map(|o| format!("[{}] buyer: {} total: {}", o.id, o.buyer_id, o.total_amount))
        .collect::<Vec<String>>()
        .join(", ")
}
