use chrono::{Duration, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::traits::StoreError;

/// Fixed-window counter. A single upsert either opens a new window (when the stored one has elapsed) or bumps the
/// hit count of the current one. The resulting count is read back on the same connection.
pub async fn hit(key: &str, window: Duration, conn: &mut SqliteConnection) -> Result<i64, StoreError> {
    let now = Utc::now().timestamp_millis();
    let window = window.num_milliseconds().max(1);
    sqlx::query(
        r#"
            INSERT INTO rate_limits (key, window_start, hits) VALUES ($1, $2, 1)
            ON CONFLICT (key) DO UPDATE SET
                hits = CASE WHEN rate_limits.window_start + $3 <= $2 THEN 1 ELSE rate_limits.hits + 1 END,
                window_start = CASE WHEN rate_limits.window_start + $3 <= $2 THEN $2 ELSE rate_limits.window_start END
        "#,
    )
    .bind(key)
    .bind(now)
    .bind(window)
    .execute(&mut *conn)
    .await?;
    let hits: i64 = sqlx::query_scalar("SELECT hits FROM rate_limits WHERE key = $1").bind(key).fetch_one(conn).await?;
    trace!("🗃️ Rate limit key {key} has {hits} hits in the current window");
    Ok(hits)
}
