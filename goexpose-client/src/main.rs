use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use goexpose_proto::command::StdinCommandSource;
use goexpose_proto::config::load_client_config;
use goexpose_proto::tls::{install_crypto_provider, FileClientTlsMaterial, TlsMaterial};

#[derive(Parser)]
#[command(name = "goexpose-client", about = "GoExpose Client — internal endpoint of the reverse-tunnel control plane")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "/etc/goexpose/client.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_client_config(&cli.config)?;

    let log_level = cli.log_level.as_deref().unwrap_or(&config.client.log_level).to_string();
    let filter = tracing_subscriber::EnvFilter::try_new(&log_level).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();

    tracing::info!("GoExpose Client starting");

    install_crypto_provider();
    let tls_material: Arc<dyn TlsMaterial> = Arc::new(FileClientTlsMaterial::new(config.tls.clone()));

    let shutdown = CancellationToken::new();
    let watcher = shutdown.clone();
    tokio::spawn(async move {
        goexpose_proto::shutdown::wait_for_shutdown().await;
        tracing::info!("shutdown signal received");
        watcher.cancel();
    });

    let commands = StdinCommandSource::new();
    goexpose_client::controller::run(commands, tls_material, config.client.control_port, shutdown).await;

    tracing::info!("GoExpose Client stopped");
    Ok(())
}
