//! Crash recovery for participant nodes
//!
//! Runs once at startup, before the HTTP listener begins accepting
//! connections. A transaction found in `prepared` state but never decided
//! is unconditionally aborted — this node cannot know whether the
//! coordinator ultimately committed or aborted, and a conservative abort
//! is the only choice that doesn't risk a unilateral commit the
//! coordinator disagrees with. This is a documented liveness weakness,
//! not a bug: it trades availability for safety.

use sqlx::PgPool;
use tracing::{info, instrument};

use crate::error::Result;
use crate::lock_manager;
use crate::wal;

/// One transaction this node unilaterally resolved during recovery.
#[derive(Debug, Clone)]
pub struct RecoveredTransaction {
    pub transaction_id: String,
    pub action: &'static str,
}

/// Abort every `prepared` local transaction owned by this node. No-op for
/// a coordinator node (callers should only invoke this for participants).
#[instrument(skip(pool))]
pub async fn recover(pool: &PgPool, node_id: &str) -> Result<Vec<RecoveredTransaction>> {
    let uncertain: Vec<(String,)> = sqlx::query_as(
        "SELECT transaction_id FROM local_transactions
         WHERE node_id = $1 AND status = 'prepared'",
    )
    .bind(node_id)
    .fetch_all(pool)
    .await?;

    let mut recovered = Vec::with_capacity(uncertain.len());

    for (transaction_id,) in uncertain {
        let mut tx = pool.begin().await?;

        sqlx::query(
            "UPDATE local_transactions SET status = 'aborted', decided_at = now()
             WHERE transaction_id = $1 AND node_id = $2",
        )
        .bind(&transaction_id)
        .bind(node_id)
        .execute(&mut *tx)
        .await?;

        wal::log_recovery_abort(&mut tx, node_id, &transaction_id).await?;
        lock_manager::release_all_locks(&mut tx, &transaction_id).await?;
        tx.commit().await?;

        info!(transaction_id = %transaction_id, "aborted uncertain transaction during recovery");
        recovered.push(RecoveredTransaction {
            transaction_id,
            action: "aborted_due_to_recovery",
        });
    }

    Ok(recovered)
}
