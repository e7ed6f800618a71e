//! Write-ahead log
//!
//! A thin writer over the `transaction_logs` table. Every call must be
//! made inside the caller's own `sqlx::Transaction` so the log row commits
//! atomically with the state change it describes — a crash between the two
//! would otherwise leave a dangling or missing WAL entry.

use serde_json::Value;
use sqlx::{Postgres, Transaction};

use crate::error::Result;

/// Append a `prepare` entry recording the tentative before/after state.
pub async fn log_prepare(
    tx: &mut Transaction<'_, Postgres>,
    node_id: &str,
    transaction_id: &str,
    before_state: &Value,
    after_state: &Value,
    details: Option<&str>,
) -> Result<()> {
    let details = details.unwrap_or("Prepared tentative update");
    sqlx::query(
        "INSERT INTO transaction_logs
            (transaction_id, node_id, log_type, old_state, new_state, details, applied)
         VALUES ($1, $2, 'prepare', $3, $4, $5, false)",
    )
    .bind(transaction_id)
    .bind(node_id)
    .bind(before_state)
    .bind(after_state)
    .bind(details)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Append a `commit` entry. The state change itself is applied by the
/// caller in the same transaction.
pub async fn log_commit(
    tx: &mut Transaction<'_, Postgres>,
    node_id: &str,
    transaction_id: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO transaction_logs
            (transaction_id, node_id, log_type, details, applied)
         VALUES ($1, $2, 'commit', 'Final commit applied', true)",
    )
    .bind(transaction_id)
    .bind(node_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Append an `abort` entry.
pub async fn log_abort(
    tx: &mut Transaction<'_, Postgres>,
    node_id: &str,
    transaction_id: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO transaction_logs
            (transaction_id, node_id, log_type, details, applied)
         VALUES ($1, $2, 'abort', 'Transaction aborted - rollback applied', true)",
    )
    .bind(transaction_id)
    .bind(node_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Append a `recovery_abort` entry, written by the recovery manager when
/// it unilaterally aborts a transaction found PREPARED at startup.
pub async fn log_recovery_abort(
    tx: &mut Transaction<'_, Postgres>,
    node_id: &str,
    transaction_id: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO transaction_logs
            (transaction_id, node_id, log_type, details, applied)
         VALUES ($1, $2, 'recovery_abort', 'Unilaterally aborted during startup recovery', true)",
    )
    .bind(transaction_id)
    .bind(node_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
