use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tankline_server::config::ServerConfig;
use tankline_server::context::ServerContext;
use tankline_server::lobby::matchmaker::spawn_matchmaker;
use tankline_server::net::heartbeat::spawn_heartbeat_monitor;
use tankline_server::net::transport::GameServer;

#[derive(Parser)]
#[command(name = "tankline-server", version, about = "Authoritative Tankline game server")]
struct Cli {
    /// Path to the YAML configuration file
    config: PathBuf,
    /// Disable bot firing (overrides config)
    #[arg(long)]
    no_bot_fire: bool,
    /// Disable bot steering and aiming entirely (overrides config)
    #[arg(long)]
    no_bot_ai: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Invalid usage exits 2 via clap before we get here
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Tankline server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match ServerConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(1);
        }
    };
    if cli.no_bot_fire {
        config.disable_bot_fire = true;
    }
    if cli.no_bot_ai {
        config.disable_bot_ai = true;
    }
    info!(
        "configuration loaded: {}:{}, {} players/match, {} Hz",
        config.listen_address, config.listen_port, config.max_players_per_match, config.tick_rate
    );

    let (server, shutdown_handle) = match ServerContext::new(config) {
        Ok(built) => built,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(1);
        }
    };

    // SIGINT / SIGTERM set the shutdown flag; every long-running task checks
    // it at its yield points
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        shutdown_handle.trigger();
    });

    let game_server = match GameServer::bind(server.clone()).await {
        Ok(game_server) => game_server,
        Err(e) => {
            error!("failed to bind: {}", e);
            return ExitCode::from(1);
        }
    };

    spawn_heartbeat_monitor(&server);
    spawn_matchmaker(&server);

    if let Err(e) = game_server.run().await {
        error!("server error: {}", e);
        return ExitCode::from(1);
    }

    info!("server stopped");
    ExitCode::SUCCESS
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
