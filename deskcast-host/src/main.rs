//! deskcast host entry point.
//!
//! ```text
//! deskcast-host                     Run in the foreground
//! deskcast-host --config <path>     Load a custom config TOML
//! deskcast-host --gen-config        Write default config to stdout
//! deskcast-host --host 127.0.0.1 --port 9000
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use deskcast_host::config::HostConfig;
use deskcast_host::service::HostService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "deskcast-host", about = "Stream this display to WebSocket viewers")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "deskcast-host.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Bind address (overrides config and REMOTE_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides config and REMOTE_PORT).
    #[arg(short, long)]
    port: Option<u16>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&HostConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config: file, then environment, then flags.
    let mut config = HostConfig::load(&cli.config);
    config.apply_env();
    if let Some(host) = cli.host {
        config.network.host = host;
    }
    if let Some(port) = cli.port {
        config.network.port = port;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let service = HostService::new(config);
    let cfg = service.config();
    info!("deskcast-host v{}", env!("CARGO_PKG_VERSION"));
    info!("listening on: ws://{}", cfg.bind_addr());
    info!(
        "target FPS: {}, JPEG quality: {}, scale: {}",
        cfg.capture.fps, cfg.capture.jpeg_quality, cfg.capture.resize_scale
    );
    info!("max connections: {}", cfg.network.max_connections);

    // Ctrl-C handler.
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Ctrl-C received, shutting down");
            shutdown.cancel();
        }
    });

    service.run(shutdown).await?;

    Ok(())
}
