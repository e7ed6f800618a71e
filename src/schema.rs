//! Wire DTOs for the HTTP edges
//!
//! These are kept separate from [`crate::model`] so storage-column concerns
//! never leak into the HTTP contract.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::TransactionStatus;

/// `POST /transaction/transfer` body.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferRequest {
    pub from_account: String,
    pub to_account: String,
    pub amount: i64,
    pub from_node: String,
    pub to_node: String,
}

/// `POST /prepare` body, sent coordinator -> participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub transaction_id: String,
    pub operation_type: String,
    pub operation_data: Value,
}

/// A participant's response to `/prepare`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub transaction_id: String,
    pub vote: Vote,
    pub node_id: String,
    pub message: Option<String>,
}

/// The two legal votes a participant may cast during prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Yes,
    No,
}

/// `POST /commit` or `/abort` body, sent coordinator -> participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub transaction_id: String,
    pub decision: Decision,
}

/// The terminal decision the coordinator reaches after tallying votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Commit,
    Abort,
}

/// `GET /transactions/{id}` response.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionStatusResponse {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub votes: HashMap<String, Option<String>>,
    pub decisions: HashMap<String, Option<String>>,
    pub created_at: DateTime<Utc>,
    pub timeout_at: Option<DateTime<Utc>>,
}

/// One row of `GET /nodes`.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub role: String,
    pub url: String,
    pub status: HeartbeatStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub uptime: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatStatus {
    Online,
    Offline,
    Recovering,
}

/// One row of `GET /accounts`.
#[derive(Debug, Clone, Serialize)]
pub struct AccountInfo {
    pub id: String,
    pub balance: i64,
    pub node_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<crate::model::Account> for AccountInfo {
    fn from(account: crate::model::Account) -> Self {
        Self {
            id: account.id,
            balance: account.balance,
            node_id: account.node_id,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

/// `GET /api/health` response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
    pub database: bool,
    pub message: Option<String>,
}

/// `POST /recover` body (manual recovery trigger, used by tests and ops).
#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryRequest {
    pub node_id: String,
    pub transaction_id: Option<String>,
}

/// `GET /` and `GET /info` response: this node's self-description.
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub role: String,
    pub schema: String,
    pub participant_urls: Vec<String>,
    pub prepare_timeout_ms: u64,
    pub commit_timeout_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Vote::Yes).unwrap(), "\"yes\"");
        assert_eq!(serde_json::to_string(&Vote::No).unwrap(), "\"no\"");
    }

    #[test]
    fn decision_roundtrips() {
        let d: Decision = serde_json::from_str("\"commit\"").unwrap();
        assert_eq!(d, Decision::Commit);
    }
}
