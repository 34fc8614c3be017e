use anyhow::{Context, Result};
use avatar_relay::cli::{self, TalkOptions};
use avatar_relay::{FileConfig, Relay, load_config};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "avatar")]
#[command(about = "WebSocket relay and terminal client for the avatar chat")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay in the foreground
    Serve(ServeArgs),

    /// Chat through a running relay from this terminal
    Talk(TalkArgs),
}

#[derive(Parser)]
struct ServeArgs {
    /// Config file (defaults to ./avatar.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the relay
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory served under /audio
    #[arg(long)]
    audio_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Parser)]
struct TalkArgs {
    /// Relay WebSocket URL
    #[arg(long, default_value = "ws://localhost:3000/ws")]
    url: String,

    /// Advance automatically after each part
    #[arg(long)]
    auto_read: Option<bool>,

    /// Auto-read delay in milliseconds
    #[arg(long)]
    interval: Option<u64>,

    /// Text speed (higher is faster)
    #[arg(long)]
    speed: Option<u64>,

    /// Start speech capture after each reply
    #[arg(long)]
    auto_record: Option<bool>,

    /// Preferences file (defaults to the user config directory)
    #[arg(long)]
    prefs: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Talk(args) => run_talk(args).await,
    }
}

fn init_tracing(default_directive: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    init_tracing(if args.debug {
        "avatar=debug,tower_http=debug,info"
    } else {
        "avatar=info,tower_http=info,warn"
    });

    let mut config: FileConfig = load_config(args.config.as_deref())
        .extract()
        .context("Invalid configuration")?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(dir) = args.audio_dir {
        config.server.audio_dir = Some(dir);
    }

    info!("Starting avatar relay");
    let listener = tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| {
            format!(
                "Failed to bind {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let actual_addr = listener.local_addr()?;

    let relay = Relay::start(&config);

    info!("Avatar relay listening on http://{}", actual_addr);
    info!("Backend: {}", config.backend.url());
    info!("  GET /ws           - client WebSocket");
    info!("  GET /audio/*      - reply audio");
    info!("  GET /health       - relay and backend status");
    info!("  GET /metrics      - counters");

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    relay
        .serve(listener, shutdown_signal)
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

async fn run_talk(args: TalkArgs) -> Result<()> {
    init_tracing(if args.debug { "avatar=debug,warn" } else { "warn" });

    cli::talk_command(TalkOptions {
        url: args.url,
        auto_read: args.auto_read,
        auto_read_interval_ms: args.interval,
        auto_record: args.auto_record,
        text_speed: args.speed,
        prefs_path: args.prefs,
    })
    .await
}
