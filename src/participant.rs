//! Participant prepare/commit/abort state machine
//!
//! Each entry point opens exactly one `sqlx::Transaction`; the account row
//! lock (`SELECT ... FOR UPDATE`), the lock-manager lease, and the WAL row
//! are all written through that same transaction, so a crash before the
//! final `COMMIT` leaves no partial trace.

use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::instrument;

use crate::error::Result;
use crate::lock_manager;
use crate::metrics::MetricsCollector;
use crate::model::{Account, TransactionStatus};
use crate::schema::Vote;
use crate::wal;

/// Run the prepare phase for one transaction on this node, returning the
/// vote to report back to the coordinator. Never returns `Err` for a
/// business-level rejection — only for genuine storage failure, which the
/// HTTP handler also translates into a "no" vote: an internal failure here
/// should never escape as a propagated error.
#[instrument(skip(pool, operation_data, metrics), fields(transaction_id, node_id))]
pub async fn prepare(
    pool: &PgPool,
    node_id: &str,
    transaction_id: &str,
    operation_type: &str,
    operation_data: &Value,
    lock_timeout: std::time::Duration,
    metrics: &MetricsCollector,
) -> Result<Vote> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO local_transactions
            (transaction_id, node_id, status, operation_type, operation_data)
         VALUES ($1, $2, 'preparing', $3, $4)",
    )
    .bind(transaction_id)
    .bind(node_id)
    .bind(operation_type)
    .bind(operation_data)
    .execute(&mut *tx)
    .await?;

    if operation_type == "transfer" {
        let from_account = operation_data.get("from_account").and_then(Value::as_str);
        let to_account = operation_data.get("to_account").and_then(Value::as_str);
        let amount = operation_data.get("amount").and_then(Value::as_i64).unwrap_or(0);
        let from_node = operation_data.get("from_node").and_then(Value::as_str);
        let to_node = operation_data.get("to_node").and_then(Value::as_str);

        let mut local_accounts: Vec<(&str, &str)> = Vec::new();
        if from_node == Some(node_id) {
            if let Some(acc) = from_account {
                local_accounts.push(("from", acc));
            }
        }
        if to_node == Some(node_id) {
            if let Some(acc) = to_account {
                local_accounts.push(("to", acc));
            }
        }

        for (role, acc_id) in local_accounts {
            let locked = lock_manager::acquire_write_lock(
                &mut tx,
                node_id,
                transaction_id,
                acc_id,
                lock_timeout,
                metrics,
            )
            .await?;

            if !locked {
                lock_manager::release_all_locks(&mut tx, transaction_id).await?;
                vote_no(&mut tx, transaction_id, node_id).await?;
                tx.commit().await?;
                return Ok(Vote::No);
            }

            let account: Option<Account> =
                sqlx::query_as("SELECT * FROM accounts WHERE id = $1 FOR UPDATE")
                    .bind(acc_id)
                    .fetch_optional(&mut *tx)
                    .await?;

            let Some(account) = account else {
                lock_manager::release_all_locks(&mut tx, transaction_id).await?;
                vote_no(&mut tx, transaction_id, node_id).await?;
                tx.commit().await?;
                return Ok(Vote::No);
            };

            if role == "from" && account.balance < amount {
                lock_manager::release_all_locks(&mut tx, transaction_id).await?;
                vote_no(&mut tx, transaction_id, node_id).await?;
                tx.commit().await?;
                return Ok(Vote::No);
            }

            let before = json!({ "balance": account.balance });
            let after = json!({
                "balance": if role == "from" {
                    account.balance - amount
                } else {
                    account.balance + amount
                }
            });
            wal::log_prepare(
                &mut tx,
                node_id,
                transaction_id,
                &before,
                &after,
                Some(&format!("{role} account {acc_id}")),
            )
            .await?;
        }
    }

    sqlx::query(
        "UPDATE local_transactions
         SET status = 'prepared', vote = 'yes', prepared_at = now()
         WHERE transaction_id = $1 AND node_id = $2",
    )
    .bind(transaction_id)
    .bind(node_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Vote::Yes)
}

async fn vote_no(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    transaction_id: &str,
    node_id: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE local_transactions
         SET status = 'aborted', vote = 'no'
         WHERE transaction_id = $1 AND node_id = $2",
    )
    .bind(transaction_id)
    .bind(node_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Apply the commit decision. Idempotent: a transaction already in
/// `committed` state is a no-op, so retried decision deliveries are safe.
#[instrument(skip(pool), fields(transaction_id, node_id))]
pub async fn commit(pool: &PgPool, node_id: &str, transaction_id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    let local: Option<(TransactionStatus, Option<String>, Option<Value>)> = sqlx::query_as(
        "SELECT status, operation_type, operation_data FROM local_transactions
         WHERE transaction_id = $1 AND node_id = $2",
    )
    .bind(transaction_id)
    .bind(node_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((status, operation_type, operation_data)) = local else {
        return Ok(());
    };
    // Only a transaction still holding its locks in `prepared` may be
    // committed. Anything else (already committed, already aborted by
    // this node's own vote or by recovery, still preparing) is a no-op —
    // applying the delta here would move a balance with no lock held.
    if status != TransactionStatus::Prepared {
        return Ok(());
    }

    if operation_type.as_deref() == Some("transfer") {
        if let Some(op) = operation_data {
            let from_account = op.get("from_account").and_then(Value::as_str);
            let to_account = op.get("to_account").and_then(Value::as_str);
            let amount = op.get("amount").and_then(Value::as_i64).unwrap_or(0);
            let from_node = op.get("from_node").and_then(Value::as_str);
            let to_node = op.get("to_node").and_then(Value::as_str);

            if from_node == Some(node_id) {
                if let Some(acc) = from_account {
                    sqlx::query(
                        "UPDATE accounts SET balance = balance - $1, updated_at = now()
                         WHERE id = $2",
                    )
                    .bind(amount)
                    .bind(acc)
                    .execute(&mut *tx)
                    .await?;
                }
            }
            if to_node == Some(node_id) {
                if let Some(acc) = to_account {
                    sqlx::query(
                        "UPDATE accounts SET balance = balance + $1, updated_at = now()
                         WHERE id = $2",
                    )
                    .bind(amount)
                    .bind(acc)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
    }

    sqlx::query(
        "UPDATE local_transactions SET status = 'committed', decided_at = now()
         WHERE transaction_id = $1 AND node_id = $2",
    )
    .bind(transaction_id)
    .bind(node_id)
    .execute(&mut *tx)
    .await?;

    wal::log_commit(&mut tx, node_id, transaction_id).await?;
    lock_manager::release_all_locks(&mut tx, transaction_id).await?;
    tx.commit().await?;
    Ok(())
}

/// Apply the abort decision. Idempotent and safe to call on a transaction
/// that was never prepared.
#[instrument(skip(pool), fields(transaction_id, node_id))]
pub async fn abort(pool: &PgPool, node_id: &str, transaction_id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    let status: Option<(TransactionStatus,)> = sqlx::query_as(
        "SELECT status FROM local_transactions WHERE transaction_id = $1 AND node_id = $2",
    )
    .bind(transaction_id)
    .bind(node_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((status,)) = status else {
        return Ok(());
    };
    if matches!(status, TransactionStatus::Committed | TransactionStatus::Aborted) {
        return Ok(());
    }

    sqlx::query(
        "UPDATE local_transactions SET status = 'aborted', decided_at = now()
         WHERE transaction_id = $1 AND node_id = $2",
    )
    .bind(transaction_id)
    .bind(node_id)
    .execute(&mut *tx)
    .await?;

    wal::log_abort(&mut tx, node_id, transaction_id).await?;
    lock_manager::release_all_locks(&mut tx, transaction_id).await?;
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_operation_data_shape() {
        let data = json!({
            "from_account": "a1",
            "to_account": "a2",
            "amount": 50,
            "from_node": "p1",
            "to_node": "p2",
        });
        assert_eq!(data["amount"].as_i64(), Some(50));
    }
}
