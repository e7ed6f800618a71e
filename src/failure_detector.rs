//! Coordinator-side participant health monitor
//!
//! A background task, started only on the coordinator, that polls every
//! known participant's `/api/health` edge on a fixed interval and keeps a
//! per-node view of `{status, last_heartbeat, uptime}`. Purely informational
//! — it does not participate in 2PC decisions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::warn;

use crate::node_registry::NodeRegistry;
use crate::schema::HeartbeatStatus;

#[derive(Debug, Clone)]
pub struct NodeHealth {
    pub status: HeartbeatStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub uptime: i64,
}

/// Shared, continuously-updated view of participant health.
pub struct FailureDetector {
    health: RwLock<HashMap<String, NodeHealth>>,
}

impl FailureDetector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            health: RwLock::new(HashMap::new()),
        })
    }

    pub async fn snapshot(&self) -> HashMap<String, NodeHealth> {
        self.health.read().await.clone()
    }

    /// Spawn the polling loop. Returns the `JoinHandle` so callers can
    /// abort it on shutdown; intended to be called once, from `main`,
    /// only when this node's role is coordinator.
    pub fn spawn(
        self: Arc<Self>,
        client: reqwest::Client,
        registry: Arc<NodeRegistry>,
        heartbeat_interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                for (node_id, entry) in registry.all() {
                    if !registry.is_participant(node_id) {
                        continue;
                    }
                    let url = format!("{}/api/health", entry.url);
                    let now = Utc::now();

                    let reached = client
                        .get(&url)
                        .send()
                        .await
                        .map(|r| r.status().is_success())
                        .unwrap_or(false);

                    let mut health = self.health.write().await;
                    let prior_uptime = health.get(node_id).map(|h| h.uptime).unwrap_or(0);

                    if reached {
                        health.insert(
                            node_id.clone(),
                            NodeHealth {
                                status: HeartbeatStatus::Online,
                                last_heartbeat: Some(now),
                                uptime: prior_uptime + 1,
                            },
                        );
                    } else {
                        let last_heartbeat = health.get(node_id).and_then(|h| h.last_heartbeat);
                        warn!(node_id = %node_id, url = %entry.url, "participant appears down");
                        health.insert(
                            node_id.clone(),
                            NodeHealth {
                                status: HeartbeatStatus::Offline,
                                last_heartbeat,
                                uptime: prior_uptime,
                            },
                        );
                    }
                }

                tokio::time::sleep(heartbeat_interval).await;
            }
        })
    }
}
