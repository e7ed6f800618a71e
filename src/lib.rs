//! Two-phase commit node: coordinator and participant roles for
//! cross-node money transfers.
//!
//! ## Architecture
//!
//! - **HTTP layer** ([`server`]): axum router, process composition root.
//! - **2PC driver** ([`coordinator`]): PREPARE/DECISION orchestration, run
//!   as a background task per transfer.
//! - **Participant state machine** ([`participant`]): prepare/commit/abort
//!   against local account rows, under strict two-phase locking.
//! - **Durability** ([`wal`], [`recovery`]): write-ahead log entries and
//!   startup crash recovery.
//! - **Cluster topology** ([`node_registry`]): static node-to-URL mapping.
//! - **Ambient stack**: [`config`], [`error`], [`metrics`], [`db`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use twopc_node::{config::Config, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.toml")?;
//!     let server = Server::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod failure_detector;
pub mod lock_manager;
pub mod metrics;
pub mod model;
pub mod node_registry;
pub mod participant;
pub mod recovery;
pub mod schema;
pub mod server;
pub mod wal;

pub use error::{Error, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build information
pub const BUILD_INFO: &str = concat!(
    "twopc-node v",
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("CARGO_PKG_NAME"),
    ")"
);
