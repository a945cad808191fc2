use crate::{
    db_types::{LedgerEntry, NewLedgerEntry, NewReviewEntry, OrderId, ReviewEntry},
    traits::StoreError,
};

/// The reconciliation journal is the payment ledger plus a manual-review log for anything that could not be settled
/// automatically.
#[allow(async_fn_in_trait)]
pub trait ReconciliationJournal {
    /// Inserts a ledger entry. Entries are unique on (order id, external transaction id); inserting the same pair
    /// twice is a no-op and returns `false`.
    async fn insert_ledger_entry(&self, entry: NewLedgerEntry) -> Result<bool, StoreError>;

    async fn fetch_ledger_entries(&self, order_id: &OrderId) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn insert_review_entry(&self, entry: NewReviewEntry) -> Result<ReviewEntry, StoreError>;

    /// The most recent review entries, newest first.
    async fn fetch_review_entries(&self, limit: i64) -> Result<Vec<ReviewEntry>, StoreError>;
}
