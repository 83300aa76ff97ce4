use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use goexpose_proto::config::load_server_config;
use goexpose_proto::tls::{install_crypto_provider, FileServerTlsMaterial, TlsMaterial};
use goexpose_server::{controller, logging};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "goexpose-server", about = "GoExpose Server — public endpoint of the reverse-tunnel control plane")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "/etc/goexpose/server.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Duplicate log records to stdout in addition to the log file
    #[arg(long)]
    console_log: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_server_config(&cli.config)?;

    let log_level = cli.log_level.as_deref().unwrap_or(&config.logging.level).to_string();
    let console = cli.console_log || config.logging.console;
    let _log_guard = logging::init(&log_level, console, &config.logging.dir)?;

    tracing::info!("GoExpose Server starting");

    install_crypto_provider();
    let tls_material = FileServerTlsMaterial::new(config.tls.clone());
    let tls_config = tls_material.server_config()?;

    let listen_addr: std::net::SocketAddr =
        format!("{}:{}", config.server.listen, config.server.control_port).parse()?;

    let shutdown = CancellationToken::new();
    let watcher = shutdown.clone();
    tokio::spawn(async move {
        goexpose_proto::shutdown::wait_for_shutdown().await;
        tracing::info!("shutdown signal received");
        watcher.cancel();
    });

    let accept_timeout = Duration::from_secs(config.limits.proxy_accept_timeout_sec);

    controller::run(listen_addr, tls_config, config.proxy.clone(), accept_timeout, shutdown).await?;

    tracing::info!("GoExpose Server stopped");
    Ok(())
}
