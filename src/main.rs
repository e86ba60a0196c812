//! EmberKV server entry point.

use clap::Parser;
use emberkv::{Config, Server};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    print_banner(&config);

    let server = Server::bind(config).await?;
    server.run(shutdown_signal()).await;

    Ok(())
}

/// Resolves on Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        // Without a handler the server can only be killed; keep serving.
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

fn print_banner(config: &Config) {
    info!(
        version = emberkv::VERSION,
        address = %config.bind_address(),
        snapshot = %config.snapshot_path.display(),
        "EmberKV starting"
    );
    println!(
        r#"
EmberKV v{} - In-Memory String/List/Hash Store
──────────────────────────────────────────────
Address:   {}
Snapshot:  {}

Use Ctrl+C to shutdown gracefully.
"#,
        emberkv::VERSION,
        config.bind_address(),
        config.snapshot_path.display()
    );
}
