//! End-to-end tests that boot real coordinator/participant nodes (real
//! TCP listeners, real Postgres schemas) and drive a transfer through the
//! public `/api/transaction/transfer` edge exactly as an operator would.
//!
//! Each participant's `node_id` doubles as its schema name and as the
//! `from_node`/`to_node` value callers must pass in the transfer request
//! body, so every test mints a unique per-run node id (`n1_<suffix>`)
//! rather than a fixed literal, and uses that same value everywhere.

mod common;

use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::sleep;
use twopc_node::config::NodeRole;
use twopc_node::server::Server;

async fn start_node(config: twopc_node::config::Config) {
    let server = Server::new(config).await.expect("node failed to start");
    tokio::spawn(async move {
        let _ = server.run().await;
    });
}

async fn wait_until_terminal(client: &reqwest::Client, coord_url: &str, id: &str) -> Value {
    for _ in 0..50 {
        let resp: Value = client
            .get(format!("{coord_url}/api/transactions/{id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let status = resp["status"].as_str().unwrap_or("");
        if status == "committed" || status == "aborted" {
            return resp;
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("transaction {id} never reached a terminal status");
}

#[tokio::test]
async fn happy_transfer_across_distinct_nodes_commits() {
    let Some(db_url) = common::database_url() else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let suffix = common::unique_suffix();
    let n1 = format!("n1_{suffix}");
    let n2 = format!("n2_{suffix}");
    let coord_port = 19100;
    let n1_port = 19101;
    let n2_port = 19102;

    let nodes_file = common::write_node_registry(&[
        ("coord", "coordinator", format!("http://127.0.0.1:{coord_port}")),
        (n1.as_str(), "participant", format!("http://127.0.0.1:{n1_port}")),
        (n2.as_str(), "participant", format!("http://127.0.0.1:{n2_port}")),
    ]);
    let path = nodes_file.path().to_str().unwrap();

    start_node(common::node_config(&n1, NodeRole::Participant, n1_port, path, &db_url)).await;
    start_node(common::node_config(&n2, NodeRole::Participant, n2_port, path, &db_url)).await;
    sleep(Duration::from_millis(200)).await;

    common::seed_account(&db_url, &n1, "acc-a", 100).await;
    common::seed_account(&db_url, &n2, "acc-b", 50).await;

    start_node(common::node_config("coord", NodeRole::Coordinator, coord_port, path, &db_url)).await;
    sleep(Duration::from_millis(200)).await;

    let client = reqwest::Client::new();
    let coord_url = format!("http://127.0.0.1:{coord_port}");

    let created: Value = client
        .post(format!("{coord_url}/api/transaction/transfer"))
        .json(&json!({
            "from_account": "acc-a", "to_account": "acc-b", "amount": 40,
            "from_node": n1, "to_node": n2,
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created["status"], "init");
    let id = created["transaction_id"].as_str().unwrap().to_string();

    let result = wait_until_terminal(&client, &coord_url, &id).await;
    assert_eq!(result["status"], "committed");

    assert_eq!(common::account_balance(&db_url, &n1, "acc-a").await, 60);
    assert_eq!(common::account_balance(&db_url, &n2, "acc-b").await, 90);

    common::drop_schema(&db_url, &n1).await;
    common::drop_schema(&db_url, &n2).await;
}

#[tokio::test]
async fn insufficient_funds_aborts_global_transaction() {
    let Some(db_url) = common::database_url() else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let suffix = common::unique_suffix();
    let n1 = format!("n1_{suffix}");
    let n2 = format!("n2_{suffix}");
    let coord_port = 19110;
    let n1_port = 19111;
    let n2_port = 19112;

    let nodes_file = common::write_node_registry(&[
        ("coord", "coordinator", format!("http://127.0.0.1:{coord_port}")),
        (n1.as_str(), "participant", format!("http://127.0.0.1:{n1_port}")),
        (n2.as_str(), "participant", format!("http://127.0.0.1:{n2_port}")),
    ]);
    let path = nodes_file.path().to_str().unwrap();

    start_node(common::node_config(&n1, NodeRole::Participant, n1_port, path, &db_url)).await;
    start_node(common::node_config(&n2, NodeRole::Participant, n2_port, path, &db_url)).await;
    sleep(Duration::from_millis(200)).await;

    common::seed_account(&db_url, &n1, "acc-a", 10).await;
    common::seed_account(&db_url, &n2, "acc-b", 0).await;

    start_node(common::node_config("coord", NodeRole::Coordinator, coord_port, path, &db_url)).await;
    sleep(Duration::from_millis(200)).await;

    let client = reqwest::Client::new();
    let coord_url = format!("http://127.0.0.1:{coord_port}");

    let created: Value = client
        .post(format!("{coord_url}/api/transaction/transfer"))
        .json(&json!({
            "from_account": "acc-a", "to_account": "acc-b", "amount": 50,
            "from_node": n1, "to_node": n2,
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["transaction_id"].as_str().unwrap().to_string();

    let result = wait_until_terminal(&client, &coord_url, &id).await;
    assert_eq!(result["status"], "aborted");
    assert_eq!(common::account_balance(&db_url, &n1, "acc-a").await, 10);
    assert_eq!(common::account_balance(&db_url, &n2, "acc-b").await, 0);

    common::drop_schema(&db_url, &n1).await;
    common::drop_schema(&db_url, &n2).await;
}

#[tokio::test]
async fn unreachable_participant_aborts_within_prepare_timeout() {
    let Some(db_url) = common::database_url() else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let suffix = common::unique_suffix();
    let n1 = format!("n1_{suffix}");
    let n2 = format!("n2_{suffix}"); // never started: simulates n2 offline
    let coord_port = 19120;
    let n1_port = 19121;
    let n2_port = 19122;

    let nodes_file = common::write_node_registry(&[
        ("coord", "coordinator", format!("http://127.0.0.1:{coord_port}")),
        (n1.as_str(), "participant", format!("http://127.0.0.1:{n1_port}")),
        (n2.as_str(), "participant", format!("http://127.0.0.1:{n2_port}")),
    ]);
    let path = nodes_file.path().to_str().unwrap();

    start_node(common::node_config(&n1, NodeRole::Participant, n1_port, path, &db_url)).await;
    sleep(Duration::from_millis(200)).await;

    common::seed_account(&db_url, &n1, "acc-a", 100).await;

    start_node(common::node_config("coord", NodeRole::Coordinator, coord_port, path, &db_url)).await;
    sleep(Duration::from_millis(200)).await;

    let client = reqwest::Client::new();
    let coord_url = format!("http://127.0.0.1:{coord_port}");

    let created: Value = client
        .post(format!("{coord_url}/api/transaction/transfer"))
        .json(&json!({
            "from_account": "acc-a", "to_account": "acc-b", "amount": 10,
            "from_node": n1, "to_node": n2,
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["transaction_id"].as_str().unwrap().to_string();

    let result = wait_until_terminal(&client, &coord_url, &id).await;
    assert_eq!(result["status"], "aborted");
    assert_eq!(common::account_balance(&db_url, &n1, "acc-a").await, 100);

    let held_locks: i64 = {
        let pool = twopc_node::db::connect(&db_url, &n1, 2).await.unwrap();
        sqlx::query_scalar("SELECT COUNT(*) FROM locks WHERE released_at IS NULL")
            .fetch_one(&pool)
            .await
            .unwrap()
    };
    assert_eq!(held_locks, 0, "n1 must release its lock once the global decision is ABORT");

    common::drop_schema(&db_url, &n1).await;
    common::drop_schema(&db_url, &n2).await;
}

#[tokio::test]
async fn same_node_transfer_uses_a_single_participant() {
    let Some(db_url) = common::database_url() else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let suffix = common::unique_suffix();
    let n1 = format!("n1_{suffix}");
    let coord_port = 19130;
    let n1_port = 19131;

    let nodes_file = common::write_node_registry(&[
        ("coord", "coordinator", format!("http://127.0.0.1:{coord_port}")),
        (n1.as_str(), "participant", format!("http://127.0.0.1:{n1_port}")),
    ]);
    let path = nodes_file.path().to_str().unwrap();

    start_node(common::node_config(&n1, NodeRole::Participant, n1_port, path, &db_url)).await;
    sleep(Duration::from_millis(200)).await;

    common::seed_account(&db_url, &n1, "acc-x", 100).await;
    common::seed_account(&db_url, &n1, "acc-y", 0).await;

    start_node(common::node_config("coord", NodeRole::Coordinator, coord_port, path, &db_url)).await;
    sleep(Duration::from_millis(200)).await;

    let client = reqwest::Client::new();
    let coord_url = format!("http://127.0.0.1:{coord_port}");

    let created: Value = client
        .post(format!("{coord_url}/api/transaction/transfer"))
        .json(&json!({
            "from_account": "acc-x", "to_account": "acc-y", "amount": 20,
            "from_node": n1, "to_node": n1,
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["transaction_id"].as_str().unwrap().to_string();

    let result = wait_until_terminal(&client, &coord_url, &id).await;
    assert_eq!(result["status"], "committed");
    assert_eq!(result["votes"].as_object().unwrap().len(), 1, "participant_urls dedupes to one entry");

    assert_eq!(common::account_balance(&db_url, &n1, "acc-x").await, 80);
    assert_eq!(common::account_balance(&db_url, &n1, "acc-y").await, 20);

    common::drop_schema(&db_url, &n1).await;
}

// The next two tests reject their request before the coordinator would
// ever need to call out to a participant, so they drive the router
// in-process via `axum_test::TestServer` rather than binding a real port.

#[tokio::test]
async fn rejects_transfer_to_unknown_node() {
    use axum_test::TestServer;

    let Some(db_url) = common::database_url() else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let suffix = common::unique_suffix();
    let n1 = format!("n1_{suffix}");
    let coord_port = 19140;
    let n1_port = 19141;

    let nodes_file = common::write_node_registry(&[
        ("coord", "coordinator", format!("http://127.0.0.1:{coord_port}")),
        (n1.as_str(), "participant", format!("http://127.0.0.1:{n1_port}")),
    ]);
    let path = nodes_file.path().to_str().unwrap();

    let coord = twopc_node::server::Server::new(common::node_config(
        "coord",
        NodeRole::Coordinator,
        coord_port,
        path,
        &db_url,
    ))
    .await
    .expect("node failed to start");
    let server = TestServer::new(coord.router()).unwrap();

    let resp = server
        .post("/api/transaction/transfer")
        .json(&json!({
            "from_account": "acc-x", "to_account": "acc-y", "amount": 20,
            "from_node": n1, "to_node": "ghost-node",
        }))
        .await;
    resp.assert_status(reqwest::StatusCode::BAD_REQUEST);

    // `public` is the coordinator's shared schema across every test in this
    // run (and potentially other tooling against the same database) — never
    // drop it the way a per-participant schema gets torn down above.
}

#[tokio::test]
async fn participant_edges_reject_coordinator_traffic() {
    use axum_test::TestServer;

    let Some(db_url) = common::database_url() else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };

    let suffix = common::unique_suffix();
    let n1 = format!("n1_{suffix}");
    let n1_port = 19151;
    let nodes_file =
        common::write_node_registry(&[(n1.as_str(), "participant", format!("http://127.0.0.1:{n1_port}"))]);
    let path = nodes_file.path().to_str().unwrap();

    let participant = twopc_node::server::Server::new(common::node_config(
        &n1,
        NodeRole::Participant,
        n1_port,
        path,
        &db_url,
    ))
    .await
    .expect("node failed to start");
    let server = TestServer::new(participant.router()).unwrap();

    let resp = server
        .post("/api/transaction/transfer")
        .json(&json!({ "from_account": "a", "to_account": "b", "amount": 1, "from_node": n1, "to_node": n1 }))
        .await;
    resp.assert_status(reqwest::StatusCode::FORBIDDEN);

    common::drop_schema(&db_url, &n1).await;
}
