//! Database entity types
//!
//! Mirrors the five tables every node's schema carries: accounts, the
//! coordinator's distributed transaction ledger, a participant's local
//! transaction record, the write-ahead log, and lock leases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Lifecycle state of a transaction, shared by the coordinator's
/// global record and a participant's local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Init,
    Preparing,
    Prepared,
    Committing,
    Committed,
    Aborting,
    Aborted,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Init => "init",
            TransactionStatus::Preparing => "preparing",
            TransactionStatus::Prepared => "prepared",
            TransactionStatus::Committing => "committing",
            TransactionStatus::Committed => "committed",
            TransactionStatus::Aborting => "aborting",
            TransactionStatus::Aborted => "aborted",
        }
    }
}

/// Kind of lease held in the `locks` table. Only write locks are ever
/// taken by this crate, but the column models both kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LockType {
    Read,
    Write,
}

/// An account balance owned by exactly one participant node.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub balance: i64,
    pub node_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The coordinator's record of a cross-node transaction.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GlobalTransaction {
    pub id: String,
    pub status: TransactionStatus,
    pub operation_type: String,
    pub operation_data: Value,
    pub participant_urls: Value,
    pub participant_votes: Value,
    pub participant_decisions: Value,
    pub created_at: DateTime<Utc>,
    pub prepare_started_at: Option<DateTime<Utc>>,
    pub decision_made_at: Option<DateTime<Utc>>,
    pub timeout_at: Option<DateTime<Utc>>,
    pub recovery_attempts: i32,
    pub last_recovery_attempt: Option<DateTime<Utc>>,
}

/// A participant's own record of its part in a cross-node transaction.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LocalTransaction {
    pub id: i64,
    pub transaction_id: String,
    pub node_id: String,
    pub status: TransactionStatus,
    pub vote: Option<String>,
    pub operation_type: Option<String>,
    pub operation_data: Option<Value>,
    pub before_state: Option<Value>,
    pub after_state: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub prepared_at: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
}

/// One write-ahead log entry, appended inside the same storage
/// transaction as the state change it records.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TransactionLog {
    pub id: i64,
    pub transaction_id: String,
    pub node_id: String,
    pub log_type: String,
    pub old_state: Option<Value>,
    pub new_state: Option<Value>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
    pub applied: bool,
}

/// A held or released lock lease on a resource.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Lock {
    pub id: i64,
    pub resource_type: String,
    pub resource_id: String,
    pub node_id: String,
    pub lock_type: LockType,
    pub transaction_id: String,
    pub acquired_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_as_str_matches_wire_format() {
        assert_eq!(TransactionStatus::Prepared.as_str(), "prepared");
        assert_eq!(TransactionStatus::Aborted.as_str(), "aborted");
    }
}
