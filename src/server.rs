//! HTTP edge and process composition root for the 2PC node
//!
//! One `AppState` is built once in [`Server::new`] and shared behind an
//! `Arc` across every axum handler and the background failure-detector
//! task — never a module-level singleton.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::{Config, NodeRole};
use crate::coordinator;
use crate::error::{Error, Result};
use crate::failure_detector::FailureDetector;
use crate::metrics::MetricsCollector;
use crate::model::{GlobalTransaction, TransactionStatus};
use crate::node_registry::NodeRegistry;
use crate::participant;
use crate::recovery;
use crate::schema::{
    DecisionRequest, HealthResponse, NodeInfo, NodeStatus, PrepareRequest, RecoveryRequest,
    TransactionStatusResponse, TransferRequest, Vote, VoteResponse,
};

/// Shared application state handed to every handler.
pub struct AppState {
    pub config: Config,
    pub pool: PgPool,
    pub client: reqwest::Client,
    pub registry: Arc<NodeRegistry>,
    pub metrics: Arc<MetricsCollector>,
    pub failure_detector: Option<Arc<FailureDetector>>,
    pub start_time: Instant,
    /// Flipped by `/api/failure/inject/reject`; checked by every handler
    /// but the failure-injection surface itself.
    pub rejecting: AtomicBool,
}

/// The 2PC node process: HTTP listener plus whatever background tasks
/// this node's role requires.
pub struct Server {
    config: Config,
    state: Arc<AppState>,
}

impl Server {
    #[instrument(level = "info", skip(config))]
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let schema = config.node.schema_name().to_string();
        let pool = crate::db::connect(
            &config.storage.database_url,
            &schema,
            config.storage.max_connections,
        )
        .await?;
        crate::db::migrate(&pool, &schema).await?;
        crate::db::assert_search_path(&pool, &schema).await?;
        info!(schema = %schema, "verified search_path");

        let registry = Arc::new(NodeRegistry::load(&config.node.nodes_file)?);
        let metrics = Arc::new(MetricsCollector::new()?);
        let client = reqwest::Client::new();

        if config.node.role == NodeRole::Participant {
            let recovered = recovery::recover(&pool, &config.node.node_id).await?;
            if recovered.is_empty() {
                info!("no uncertain transactions found during recovery");
            } else {
                for _ in &recovered {
                    metrics.record_recovery_abort();
                }
                info!(count = recovered.len(), "recovery aborted uncertain transactions");
            }
        }

        let failure_detector = if config.node.role == NodeRole::Coordinator {
            let detector = FailureDetector::new();
            detector.clone().spawn(
                client.clone(),
                Arc::clone(&registry),
                config.timing.heartbeat_interval,
            );
            Some(detector)
        } else {
            None
        };

        let state = Arc::new(AppState {
            config: config.clone(),
            pool,
            client,
            registry,
            metrics,
            failure_detector,
            start_time: Instant::now(),
            rejecting: AtomicBool::new(false),
        });

        Ok(Self { config, state })
    }

    pub async fn run(self) -> Result<()> {
        let router = self.router();
        let addr = format!("0.0.0.0:{}", self.config.node.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::internal(format!("binding {addr}: {e}")))?;

        info!(%addr, role = self.config.node.role.as_str(), "listening");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::internal(format!("server error: {e}")))?;
        info!("shutdown signal received, exiting");
        Ok(())
    }

    /// Exposed for integration tests that drive the HTTP surface through
    /// an in-process router rather than a bound socket.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(root))
            .route("/info", get(node_info))
            .route("/api/health", get(health))
            .route("/debug/search-path", get(debug_search_path))
            .route("/api/failure/inject/crash", post(inject_crash))
            .route("/api/failure/inject/delay", post(inject_delay))
            .route("/api/failure/inject/reject", post(inject_reject))
            .route("/api/transaction/transfer", post(create_transfer))
            .route("/api/transactions/:id", get(get_transaction))
            .route("/api/transactions", get(list_transactions))
            .route("/api/nodes", get(get_nodes))
            .route("/prepare", post(prepare))
            .route("/commit", post(commit))
            .route("/abort", post(abort))
            .route("/recover", post(manual_recover))
            .route("/accounts", get(list_accounts))
            .route("/metrics", get(metrics_text))
            .with_state(Arc::clone(&self.state))
            .layer(middleware::from_fn_with_state(
                Arc::clone(&self.state),
                metrics_middleware,
            ))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive())
                    .layer(TimeoutLayer::new(std::time::Duration::from_secs(30)))
                    .into_inner(),
            )
    }
}

/// Resolves on Ctrl-C or, on unix, SIGTERM — whichever arrives first.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Records request volume/latency for every response, and buckets non-2xx
/// responses into the error counter by status class — the closest thing
/// to an error category available once an `Error` has already been turned
/// into a plain `Response` by `IntoResponse`.
async fn metrics_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> axum::response::Response {
    let started = Instant::now();
    let response = next.run(request).await;
    state.metrics.record_request(started.elapsed().as_secs_f64());

    let status = response.status();
    if status.is_client_error() {
        state.metrics.record_error("client_error");
    } else if status.is_server_error() {
        state.metrics.record_error("server_error");
    }

    response
}

fn require_role(state: &AppState, role: NodeRole, what: &str) -> Result<()> {
    if state.rejecting.load(Ordering::SeqCst) {
        return Err(Error::internal("node is rejecting requests (failure injection)"));
    }
    if state.config.node.role != role {
        return Err(Error::role(format!("only {} can {what}", role.as_str())));
    }
    Ok(())
}

// --- any-role edges ---------------------------------------------------

async fn root(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "node_id": state.config.node.node_id,
        "node_role": state.config.node.role.as_str(),
        "port": state.config.node.port,
        "schema": state.config.node.schema_name(),
        "status": "running",
    }))
}

async fn node_info(State(state): State<Arc<AppState>>) -> Json<NodeInfo> {
    Json(NodeInfo {
        node_id: state.config.node.node_id.clone(),
        role: state.config.node.role.as_str().to_string(),
        schema: state.config.node.schema_name().to_string(),
        participant_urls: state.registry.participant_urls(),
        prepare_timeout_ms: state.config.timing.prepare_timeout.as_millis() as u64,
        commit_timeout_ms: state.config.timing.commit_timeout.as_millis() as u64,
    })
}

#[instrument(level = "debug", skip(state))]
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let database = crate::db::health_check(&state.pool).await;
    Json(HealthResponse {
        status: if database { "healthy".into() } else { "unhealthy".into() },
        node_id: state.config.node.node_id.clone(),
        timestamp: Utc::now(),
        database,
        message: None,
    })
}

/// Failure injection is off by default; a node only exposes these edges
/// when started with `failure_injection_enabled = true`.
fn require_failure_injection(state: &AppState) -> Result<()> {
    if !state.config.failure_injection_enabled {
        return Err(Error::not_found("failure injection is disabled on this node"));
    }
    Ok(())
}

/// Confirms the schema-isolation guarantee by reporting the live
/// `search_path` for this node's pool, same shape the Python debug edge
/// returned.
async fn debug_search_path(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let (search_path,): (String,) = sqlx::query_as("SHOW search_path")
        .fetch_one(&state.pool)
        .await?;
    Ok(Json(json!({ "search_path": search_path })))
}

async fn inject_crash(State(state): State<Arc<AppState>>) -> Result<&'static str> {
    require_failure_injection(&state)?;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    warn!("failure injection: crashing process on operator request");
    std::process::exit(1);
}

#[derive(Debug, Deserialize)]
struct DelayQuery {
    #[serde(default = "default_delay_ms")]
    duration_ms: u64,
}

fn default_delay_ms() -> u64 {
    5000
}

async fn inject_delay(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DelayQuery>,
) -> Result<Json<Value>> {
    require_failure_injection(&state)?;
    tokio::time::sleep(std::time::Duration::from_millis(q.duration_ms)).await;
    Ok(Json(json!({ "message": format!("delayed response after {}ms", q.duration_ms) })))
}

async fn inject_reject(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    require_failure_injection(&state)?;
    state.rejecting.store(true, Ordering::SeqCst);
    Ok(Json(json!({ "message": "node now rejecting requests" })))
}

// --- coordinator edges --------------------------------------------------

/// Resolve `from_node`/`to_node` to participant base URLs, deduplicating
/// a same-node transfer to a single entry. No schema/partition guessing —
/// callers name both participants explicitly.
fn resolve_participants(registry: &NodeRegistry, req: &TransferRequest) -> Result<Vec<String>> {
    if !registry.is_participant(&req.from_node) {
        return Err(Error::validation(format!("unknown from_node: {}", req.from_node)));
    }
    if !registry.is_participant(&req.to_node) {
        return Err(Error::validation(format!("unknown to_node: {}", req.to_node)));
    }
    if req.amount <= 0 {
        return Err(Error::validation("amount must be > 0"));
    }

    let mut node_ids = vec![req.from_node.clone()];
    if req.to_node != req.from_node {
        node_ids.push(req.to_node.clone());
    }

    node_ids
        .into_iter()
        .map(|node_id| {
            registry
                .node_url(&node_id)
                .map(str::to_string)
                .ok_or_else(|| Error::internal(format!("url not found for node {node_id}")))
        })
        .collect()
}

#[instrument(skip(state, request))]
async fn create_transfer(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TransferRequest>,
) -> Result<Json<TransactionStatusResponse>> {
    require_role(&state, NodeRole::Coordinator, "initiate transactions")?;

    let participant_urls = resolve_participants(&state.registry, &request)?;
    if participant_urls.is_empty() {
        return Err(Error::validation("no participants resolved for transfer"));
    }

    let transaction_id = Uuid::new_v4().to_string();
    let operation_data = json!({
        "from_account": request.from_account,
        "to_account": request.to_account,
        "amount": request.amount,
        "from_node": request.from_node,
        "to_node": request.to_node,
    });
    let created_at = Utc::now();
    let timeout_at = created_at
        + chrono::Duration::milliseconds(state.config.timing.prepare_timeout.as_millis() as i64);

    sqlx::query(
        "INSERT INTO distributed_transactions
            (id, status, operation_type, operation_data, participant_urls,
             participant_votes, participant_decisions, created_at, timeout_at)
         VALUES ($1, 'init', 'transfer', $2, $3, '{}'::jsonb, '{}'::jsonb, $4, $5)",
    )
    .bind(&transaction_id)
    .bind(&operation_data)
    .bind(serde_json::to_value(&participant_urls)?)
    .bind(created_at)
    .bind(timeout_at)
    .execute(&state.pool)
    .await?;

    let pool = state.pool.clone();
    let client = state.client.clone();
    let metrics = Arc::clone(&state.metrics);
    let prepare_timeout = state.config.timing.prepare_timeout;
    let commit_timeout = state.config.timing.commit_timeout;
    let tx_id_for_task = transaction_id.clone();

    tokio::spawn(async move {
        if let Err(e) = coordinator::execute_2pc(
            pool.clone(),
            client,
            tx_id_for_task.clone(),
            prepare_timeout,
            commit_timeout,
        )
        .await
        {
            warn!(transaction_id = %tx_id_for_task, error = %e, "2pc driver failed");
            return;
        }
        let outcome: Option<(TransactionStatus,)> = sqlx::query_as(
            "SELECT status FROM distributed_transactions WHERE id = $1",
        )
        .bind(&tx_id_for_task)
        .fetch_optional(&pool)
        .await
        .ok()
        .flatten();
        if let Some((status,)) = outcome {
            metrics.record_transaction_outcome(status.as_str());
        }
    });

    Ok(Json(TransactionStatusResponse {
        transaction_id,
        status: TransactionStatus::Init,
        votes: HashMap::new(),
        decisions: HashMap::new(),
        created_at,
        timeout_at: Some(timeout_at),
    }))
}

#[instrument(skip(state))]
async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TransactionStatusResponse>> {
    require_role(&state, NodeRole::Coordinator, "query transaction status")?;

    let row: Option<GlobalTransaction> =
        sqlx::query_as("SELECT * FROM distributed_transactions WHERE id = $1")
            .bind(&id)
            .fetch_optional(&state.pool)
            .await?;

    let row = row.ok_or_else(|| Error::not_found(format!("transaction {id}")))?;
    Ok(Json(to_status_response(row)))
}

async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<Value>>> {
    require_role(&state, NodeRole::Coordinator, "list transactions")?;

    let limit = q.limit.unwrap_or(50).clamp(1, 500);
    let rows: Vec<GlobalTransaction> = sqlx::query_as(
        "SELECT * FROM distributed_transactions ORDER BY created_at DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;

    let participants_len = |urls: &Value| urls.as_array().map(|a| a.len()).unwrap_or(0);
    Ok(Json(
        rows.into_iter()
            .map(|tx| {
                json!({
                    "transaction_id": tx.id,
                    "status": tx.status.as_str(),
                    "operation_type": tx.operation_type,
                    "created_at": tx.created_at,
                    "timeout_at": tx.timeout_at,
                    "participants": participants_len(&tx.participant_urls),
                })
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<i64>,
}

async fn get_nodes(State(state): State<Arc<AppState>>) -> Result<Json<Vec<NodeStatus>>> {
    require_role(&state, NodeRole::Coordinator, "view node status")?;

    let health_snapshot = match &state.failure_detector {
        Some(detector) => detector.snapshot().await,
        None => HashMap::new(),
    };

    let mut nodes = Vec::new();
    for (node_id, entry) in state.registry.all() {
        let health = health_snapshot.get(node_id);
        nodes.push(NodeStatus {
            node_id: node_id.clone(),
            role: entry.role.as_str().to_string(),
            url: entry.url.clone(),
            status: health
                .map(|h| h.status)
                .unwrap_or(crate::schema::HeartbeatStatus::Offline),
            last_heartbeat: health.and_then(|h| h.last_heartbeat),
            uptime: health.map(|h| h.uptime),
        });
    }
    Ok(Json(nodes))
}

fn to_status_response(tx: GlobalTransaction) -> TransactionStatusResponse {
    let votes: HashMap<String, Option<String>> =
        serde_json::from_value(tx.participant_votes).unwrap_or_default();
    let decisions: HashMap<String, Option<String>> =
        serde_json::from_value(tx.participant_decisions).unwrap_or_default();
    TransactionStatusResponse {
        transaction_id: tx.id,
        status: tx.status,
        votes,
        decisions,
        created_at: tx.created_at,
        timeout_at: tx.timeout_at,
    }
}

// --- participant edges ---------------------------------------------------

#[instrument(skip(state, request))]
async fn prepare(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PrepareRequest>,
) -> Result<Json<VoteResponse>> {
    require_role(&state, NodeRole::Participant, "accept prepare requests")?;

    let node_id = state.config.node.node_id.clone();
    let vote = participant::prepare(
        &state.pool,
        &node_id,
        &request.transaction_id,
        &request.operation_type,
        &request.operation_data,
        state.config.timing.lock_timeout,
        &state.metrics,
    )
    .await
    .unwrap_or(Vote::No);

    state
        .metrics
        .record_prepare_vote(if vote == Vote::Yes { "yes" } else { "no" });

    Ok(Json(VoteResponse {
        transaction_id: request.transaction_id,
        vote,
        node_id,
        message: Some(
            if vote == Vote::Yes { "prepared successfully" } else { "cannot prepare" }.to_string(),
        ),
    }))
}

#[instrument(skip(state))]
async fn commit(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<Value>> {
    require_role(&state, NodeRole::Participant, "accept commit")?;

    participant::commit(&state.pool, &state.config.node.node_id, &request.transaction_id).await?;
    Ok(Json(json!({ "status": "committed", "transaction_id": request.transaction_id })))
}

#[instrument(skip(state))]
async fn abort(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<Value>> {
    require_role(&state, NodeRole::Participant, "accept abort")?;

    participant::abort(&state.pool, &state.config.node.node_id, &request.transaction_id).await?;
    Ok(Json(json!({ "status": "aborted", "transaction_id": request.transaction_id })))
}

async fn manual_recover(
    State(state): State<Arc<AppState>>,
    body: Option<Json<RecoveryRequest>>,
) -> Result<Json<Value>> {
    require_role(&state, NodeRole::Participant, "recover")?;
    let _ = body;

    let recovered = recovery::recover(&state.pool, &state.config.node.node_id).await?;
    for _ in &recovered {
        state.metrics.record_recovery_abort();
    }
    Ok(Json(json!({
        "message": "recovery completed",
        "recovered_count": recovered.len(),
    })))
}

async fn list_accounts(State(state): State<Arc<AppState>>) -> Result<Json<Vec<crate::schema::AccountInfo>>> {
    let rows: Vec<crate::model::Account> = sqlx::query_as("SELECT * FROM accounts ORDER BY id")
        .fetch_all(&state.pool)
        .await?;
    Ok(Json(rows.into_iter().map(crate::schema::AccountInfo::from).collect()))
}

/// Prometheus scrape target, exported as plain text.
async fn metrics_text(State(state): State<Arc<AppState>>) -> Result<String> {
    state.metrics.export()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_node_transfer_dedupes_to_one_participant() {
        let mut nodes = HashMap::new();
        nodes.insert(
            "p1".to_string(),
            crate::node_registry::NodeEntry { role: NodeRole::Participant, url: "http://p1".into() },
        );
        let file = tempfile_fixture(&nodes);
        let registry = NodeRegistry::load(file.path()).unwrap();

        let req = TransferRequest {
            from_account: "a".into(),
            to_account: "b".into(),
            amount: 10,
            from_node: "p1".into(),
            to_node: "p1".into(),
        };
        let urls = resolve_participants(&registry, &req).unwrap();
        assert_eq!(urls, vec!["http://p1".to_string()]);
    }

    #[test]
    fn negative_amount_is_rejected() {
        let mut nodes = HashMap::new();
        nodes.insert(
            "p1".to_string(),
            crate::node_registry::NodeEntry { role: NodeRole::Participant, url: "http://p1".into() },
        );
        let file = tempfile_fixture(&nodes);
        let registry = NodeRegistry::load(file.path()).unwrap();

        let req = TransferRequest {
            from_account: "a".into(),
            to_account: "b".into(),
            amount: -5,
            from_node: "p1".into(),
            to_node: "p1".into(),
        };
        assert!(resolve_participants(&registry, &req).is_err());
    }

    fn tempfile_fixture(
        nodes: &HashMap<String, crate::node_registry::NodeEntry>,
    ) -> tempfile::NamedTempFile {
        use std::io::Write;
        #[derive(serde::Serialize)]
        struct Entry {
            role: &'static str,
            url: String,
        }
        let serializable: HashMap<&str, Entry> = nodes
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str(),
                    Entry {
                        role: if v.role == NodeRole::Participant { "participant" } else { "coordinator" },
                        url: v.url.clone(),
                    },
                )
            })
            .collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&serializable).unwrap()).unwrap();
        file
    }
}
