use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use twopc_node::config::Config;
use twopc_node::server::Server;

#[derive(Parser, Debug)]
#[command(name = "twopc-node")]
#[command(about = "Two-phase commit coordinator/participant node")]
struct Args {
    /// Path to the node's TOML configuration file. If it cannot be read,
    /// configuration falls back to defaults plus `TWOPC_*` env overrides.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level, used only when `RUST_LOG` is unset.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(version = twopc_node::VERSION, "starting twopc-node");

    let config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(file_err) => {
            info!(
                path = %args.config,
                error = %file_err,
                "config file unreadable, falling back to environment"
            );
            Config::from_env().map_err(|env_err| {
                error!(error = %env_err, "configuration invalid");
                env_err
            })?
        }
    };

    let node_id = config.node.node_id.clone();
    let role = config.node.role.as_str();

    let server = Server::new(config).await.map_err(|e| {
        error!(node_id = %node_id, error = %e, "failed to initialize node");
        e
    })?;

    info!(node_id = %node_id, role, "node initialized, accepting connections");

    server.run().await?;

    Ok(())
}
