use chrono::Duration;

use crate::traits::StoreError;

#[allow(async_fn_in_trait)]
pub trait RateLimiter {
    /// Counts a hit against `key` in the current fixed window of length `window`. Returns `true` if the hit is
    /// within `max` for that window.
    async fn check_rate(&self, key: &str, window: Duration, max: u32) -> Result<bool, StoreError>;
}
