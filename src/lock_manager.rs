//! Strict two-phase locking with timeout-based conflict resolution
//!
//! No deadlock graph is maintained — a lock request that cannot be
//! satisfied within `timeout_ms` simply fails, and the caller votes "no".
//! This trades liveness under contention for simplicity.

use std::time::Duration;

use sqlx::{Postgres, Transaction};
use tokio::time::Instant;

use crate::error::Result;
use crate::metrics::MetricsCollector;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Attempt to acquire a write lock on `resource_id` for `transaction_id`,
/// polling every 100ms until `timeout` elapses. Returns `true` once
/// acquired, `false` on timeout. Reports the time spent waiting and, on
/// timeout, increments the lock-timeout counter via `metrics`.
pub async fn acquire_write_lock(
    tx: &mut Transaction<'_, Postgres>,
    node_id: &str,
    transaction_id: &str,
    resource_id: &str,
    timeout: Duration,
    metrics: &MetricsCollector,
) -> Result<bool> {
    let started = Instant::now();
    let deadline = started + timeout;

    loop {
        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM locks
             WHERE resource_id = $1 AND released_at IS NULL
             LIMIT 1",
        )
        .bind(resource_id)
        .fetch_optional(&mut **tx)
        .await?;

        if existing.is_none() {
            sqlx::query(
                "INSERT INTO locks (resource_type, resource_id, node_id, lock_type, transaction_id)
                 VALUES ('account', $1, $2, 'write', $3)",
            )
            .bind(resource_id)
            .bind(node_id)
            .bind(transaction_id)
            .execute(&mut **tx)
            .await?;
            metrics.observe_lock_wait(started.elapsed().as_secs_f64());
            return Ok(true);
        }

        if Instant::now() >= deadline {
            metrics.observe_lock_wait(started.elapsed().as_secs_f64());
            metrics.record_lock_timeout();
            return Ok(false);
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Release every lock still held by `transaction_id`.
pub async fn release_all_locks(
    tx: &mut Transaction<'_, Postgres>,
    transaction_id: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE locks SET released_at = now()
         WHERE transaction_id = $1 AND released_at IS NULL",
    )
    .bind(transaction_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_matches_original_cadence() {
        assert_eq!(POLL_INTERVAL, Duration::from_millis(100));
    }
}
