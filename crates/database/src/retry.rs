//! Retry-with-backoff for transient connection failures.
//!
//! Repository operations run single statements; a dropped or timed-out
//! connection is retried up to [`MAX_ATTEMPTS`] times with a naive
//! `attempt x 2s` backoff. Anything that is not a connection-class error
//! surfaces immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Maximum attempts per operation, including the first.
pub const MAX_ATTEMPTS: u32 = 3;

/// Backoff unit; attempt `n` sleeps `n * BACKOFF_STEP` before retrying.
const BACKOFF_STEP: Duration = Duration::from_secs(2);

/// Whether an error is worth retrying.
///
/// Covers the transient network classes: connection reset, timed-out
/// acquire, and closed-pool I/O failures. Constraint violations, row
/// decoding errors, and the like are never retried.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_lowercase();
            message.contains("connection terminated")
                || message.contains("connection reset")
                || message.contains("timed out")
        }
        _ => false,
    }
}

/// Run `op`, retrying transient failures with backoff.
pub async fn with_backoff<T, F, Fut>(mut op: F) -> sqlx::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = sqlx::Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if attempt < MAX_ATTEMPTS && is_transient(&err) => {
                warn!(attempt, error = %err, "transient database error, retrying");
                tokio::time::sleep(BACKOFF_STEP * attempt).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
