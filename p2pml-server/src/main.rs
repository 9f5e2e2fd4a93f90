// p2pml: run a playback session through the local P2P media loader.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::info;
use p2pml_server::{config, PlaybackSession, SessionConfig};

#[derive(Debug, Parser)]
#[command(name = "p2pml", version, about = "Play an HLS stream through the local P2P media loader")]
struct Args {
    /// HLS manifest to play.
    #[arg(long)]
    manifest_url: Option<String>,
    /// Local proxy port.
    #[arg(long)]
    server_port: Option<u16>,
    /// Engine bridge port.
    #[arg(long)]
    engine_port: Option<u16>,
    /// Core config JSON handed to the engine.
    #[arg(long)]
    core_config: Option<String>,
    /// Attach the built-in engine that serves every segment over HTTP.
    #[arg(long)]
    loopback_engine: bool,
    /// Config file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = config::load(args.config.as_deref());
    let mut session_config = SessionConfig::from(&cfg);
    if let Some(url) = args.manifest_url {
        session_config.manifest_url = url;
    }
    if let Some(port) = args.server_port {
        session_config.server_port = port;
    }
    if let Some(port) = args.engine_port {
        session_config.engine_port = port;
    }
    if let Some(json) = args.core_config {
        session_config.core_config_json = json;
    }
    session_config.loopback_engine = args.loopback_engine;

    let rt = tokio::runtime::Runtime::new().context("cannot start runtime")?;
    rt.block_on(async {
        info!("playing {}", session_config.manifest_url);
        let session = PlaybackSession::create(session_config)
            .await
            .context("cannot start loader")?;
        run_until_shutdown(&session).await?;
        session.on_destroy().await;
        info!("bye");
        Ok::<_, anyhow::Error>(())
    })
}

/// SIGUSR1 and SIGUSR2 stand in for foreground and background. Returns on Ctrl+C or SIGTERM.
#[cfg(unix)]
async fn run_until_shutdown(session: &PlaybackSession) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut foreground = signal(SignalKind::user_defined1())?;
    let mut background = signal(SignalKind::user_defined2())?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = sigterm.recv() => return Ok(()),
            _ = foreground.recv() => session.on_start().await,
            _ = background.recv() => session.on_stop().await,
        }
    }
}

#[cfg(not(unix))]
async fn run_until_shutdown(_session: &PlaybackSession) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
