//! Postgres connection pool and schema bootstrap
//!
//! Every node — coordinator or participant — opens one pool against the
//! same database, with `search_path` pinned to its own schema on every
//! connection. This is the one place in the crate that talks to Postgres
//! directly rather than through [`crate::model`]-typed queries.

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Executor, PgPool};

use crate::error::{Error, Result};

pub const MIGRATION_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Open a pool whose connections default to `schema`'s search_path.
///
/// `schema` is `public` for the coordinator and the node id for a
/// participant, per [`crate::config::NodeConfig::schema_name`].
pub async fn connect(database_url: &str, schema: &str, max_connections: u32) -> Result<PgPool> {
    let schema = schema.to_string();
    let options: PgConnectOptions = database_url
        .parse()
        .map_err(|e: sqlx::Error| Error::config(format!("invalid database_url: {e}")))?;

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .after_connect(move |conn, _meta| {
            let schema = schema.clone();
            Box::pin(async move {
                conn.execute(format!("SET search_path TO {schema}").as_str())
                    .await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Create the node's schema (if not `public`) and apply the embedded DDL.
/// Safe to call on every startup: every statement is `IF NOT EXISTS`.
pub async fn migrate(pool: &PgPool, schema: &str) -> Result<()> {
    if schema != "public" {
        pool.execute(format!("CREATE SCHEMA IF NOT EXISTS {schema}").as_str())
            .await?;
        pool.execute(format!("SET search_path TO {schema}").as_str())
            .await?;
    }

    pool.execute(MIGRATION_SQL).await?;
    Ok(())
}

/// `SELECT 1` liveness probe used by `GET /api/health`.
pub async fn health_check(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

/// Confirm this connection's `search_path` actually resolves to the
/// expected schema first. Used defensively after connecting.
pub async fn assert_search_path(pool: &PgPool, expected: &str) -> Result<()> {
    let row: (String,) = sqlx::query_as("SHOW search_path").fetch_one(pool).await?;
    let schemas: Vec<&str> = row.0.split(',').map(|s| s.trim()).collect();

    if schemas.first() != Some(&expected) {
        return Err(Error::internal(format!(
            "invalid search_path: {} (expected {expected} first)",
            row.0
        )));
    }
    Ok(())
}
