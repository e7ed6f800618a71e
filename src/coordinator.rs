//! Coordinator-side 2PC driver
//!
//! `execute_2pc` is spawned via `tokio::spawn` right after the HTTP handler
//! persists the `init` row and returns, running as a task on the runtime's
//! own worker pool rather than a dedicated background thread. It drives
//! exactly one [`crate::model::GlobalTransaction`] from `init` to a
//! terminal status; progress is only observable through that row, never
//! through a return value.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use reqwest::Client;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::model::TransactionStatus;
use crate::schema::{Decision, PrepareRequest, VoteResponse};

/// Drive `transaction_id` through PREPARE and DECISION. No-op if the row
/// is missing (it must have been inserted by the caller before spawning).
#[instrument(skip(pool, client), fields(transaction_id))]
pub async fn execute_2pc(
    pool: PgPool,
    client: Client,
    transaction_id: String,
    prepare_timeout: Duration,
    commit_timeout: Duration,
) -> Result<()> {
    let Some(row) = load(&pool, &transaction_id).await? else {
        warn!("global transaction vanished before 2PC could run");
        return Ok(());
    };
    let (operation_type, operation_data, participant_urls) = row;

    sqlx::query(
        "UPDATE distributed_transactions
         SET status = 'preparing', prepare_started_at = now()
         WHERE id = $1",
    )
    .bind(&transaction_id)
    .execute(&pool)
    .await?;

    let prepare_req = PrepareRequest {
        transaction_id: transaction_id.clone(),
        operation_type,
        operation_data,
    };

    let prepare_calls = participant_urls.iter().map(|url| {
        let client = client.clone();
        let req = prepare_req.clone();
        let url = url.clone();
        async move {
            let resp = client
                .post(format!("{url}/prepare"))
                .json(&req)
                .send()
                .await
                .ok()?;
            if !resp.status().is_success() {
                return None;
            }
            resp.json::<VoteResponse>().await.ok()
        }
    });

    // A participant missing from `responses` (aggregate deadline hit
    // before it answered) votes "no", per the TimeoutError translation
    // rule: absence is indistinguishable from a "no" vote here.
    let responses: Vec<Option<VoteResponse>> =
        match tokio::time::timeout(prepare_timeout, join_all(prepare_calls)).await {
            Ok(responses) => responses,
            Err(_) => {
                warn!("aggregate prepare deadline exceeded; outstanding participants vote no");
                participant_urls.iter().map(|_| None).collect()
            }
        };

    let mut votes: HashMap<String, String> = HashMap::new();
    let mut all_yes = true;

    for (url, body) in participant_urls.iter().zip(responses) {
        let vote = match body {
            Some(body) if body.vote == crate::schema::Vote::Yes => "yes",
            _ => "no",
        };
        if vote == "no" {
            all_yes = false;
        }
        votes.insert(url.clone(), vote.to_string());
    }

    let decided_status = if all_yes {
        TransactionStatus::Committing
    } else {
        TransactionStatus::Aborting
    };

    sqlx::query(
        "UPDATE distributed_transactions
         SET status = $2, participant_votes = $3
         WHERE id = $1",
    )
    .bind(&transaction_id)
    .bind(decided_status)
    .bind(serde_json::to_value(&votes)?)
    .execute(&pool)
    .await?;

    info!(all_yes, "2PC decision reached");

    let decision = if all_yes { Decision::Commit } else { Decision::Abort };
    let endpoint = if all_yes { "commit" } else { "abort" };

    let decision_calls = participant_urls.iter().map(|url| {
        let client = client.clone();
        let url = url.clone();
        let transaction_id = transaction_id.clone();
        async move {
            let body = serde_json::json!({ "transaction_id": transaction_id, "decision": decision });
            let outcome = client
                .post(format!("{url}/{endpoint}"))
                .json(&body)
                .send()
                .await;
            (url, outcome.is_ok())
        }
    });

    let decisions: Vec<(String, bool)> =
        match tokio::time::timeout(commit_timeout, join_all(decision_calls)).await {
            Ok(results) => results,
            Err(_) => participant_urls.iter().map(|u| (u.clone(), false)).collect(),
        };

    let mut decision_map: HashMap<String, String> = HashMap::new();
    for (url, acked) in decisions {
        if acked {
            decision_map.insert(url, endpoint.to_string());
        }
    }

    let final_status = if all_yes {
        TransactionStatus::Committed
    } else {
        TransactionStatus::Aborted
    };

    sqlx::query(
        "UPDATE distributed_transactions
         SET status = $2, participant_decisions = $3, decision_made_at = $4
         WHERE id = $1",
    )
    .bind(&transaction_id)
    .bind(final_status)
    .bind(serde_json::to_value(&decision_map)?)
    .bind(Utc::now())
    .execute(&pool)
    .await?;

    Ok(())
}

async fn load(
    pool: &PgPool,
    transaction_id: &str,
) -> Result<Option<(String, Value, Vec<String>)>> {
    let row: Option<(String, Value, Value)> = sqlx::query_as(
        "SELECT operation_type, operation_data, participant_urls
         FROM distributed_transactions WHERE id = $1",
    )
    .bind(transaction_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(operation_type, operation_data, urls)| {
        let participant_urls: Vec<String> =
            serde_json::from_value(urls).unwrap_or_default();
        (operation_type, operation_data, participant_urls)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_yes_implies_commit() {
        let votes = ["yes", "yes"];
        assert!(votes.iter().all(|v| *v == "yes"));
    }

    #[test]
    fn any_no_implies_abort() {
        let votes = ["yes", "no"];
        assert!(!votes.iter().all(|v| *v == "yes"));
    }
}
