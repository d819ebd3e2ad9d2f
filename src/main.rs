use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use arena_viewer::arena::view::{ArenaView, ViewCommand};
use arena_viewer::config::ViewerConfig;
use arena_viewer::metrics::{self, ViewerMetrics};
use arena_viewer::net::protocol::{select_battle, BattleSummary};
use arena_viewer::render;

/// Pick an arena from a battle listing on disk
async fn arena_from_directory(path: &Path) -> anyhow::Result<String> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading battle directory {}", path.display()))?;
    let battles: Vec<BattleSummary> =
        serde_json::from_str(&raw).context("parsing battle directory")?;
    let chosen = select_battle(&battles)
        .with_context(|| format!("no battles listed in {}", path.display()))?;
    info!(
        "Selected battle {} '{}' ({}) from {} listed",
        chosen.arena_id(),
        chosen.name,
        chosen.state,
        battles.len()
    );
    Ok(chosen.arena_id())
}

/// Parse one line of operator input
fn parse_command(line: &str) -> Option<ViewCommand> {
    let mut parts = line.split_whitespace();
    match parts.next()? {
        "retry" | "r" => Some(ViewCommand::Retry),
        "update" | "u" => Some(ViewCommand::RequestUpdate),
        "switch" | "s" => parts.next().map(|id| ViewCommand::SwitchArena(id.to_string())),
        "quit" | "q" => Some(ViewCommand::Quit),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging (RUST_LOG overrides the default level)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Arena Viewer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ViewerConfig::load_or_default();
    config.validate().context("invalid configuration")?;

    let arena_id = match (&config.arena_id, &config.directory_file) {
        (Some(id), _) => id.clone(),
        (None, Some(path)) => arena_from_directory(path).await?,
        (None, None) => anyhow::bail!("set ARENA_ID or ARENA_DIRECTORY_FILE"),
    };
    info!(
        "Watching arena {} on {} ({} backend, {} fps)",
        arena_id, config.server_host, config.backend, config.render_fps
    );

    let metrics = Arc::new(ViewerMetrics::new());
    if let Some(port) = config.metrics_port {
        let metrics_clone = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(metrics_clone, port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let backend = render::compose(&config)?;
    info!("Frames go to {}", config.output_path().display());

    let view = ArenaView::new(config, arena_id, backend, metrics);

    // Operator commands from stdin
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_command(&line) {
                Some(command) => {
                    if commands_tx.send(command).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => warn!("Unknown command '{}' (retry, update, switch <id>, quit)", line.trim()),
            }
        }
    });

    // Shutdown signal handler
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    let status = view.run(commands_rx, shutdown).await;
    if let Some(fault) = &status.last_error {
        warn!("Last error: {}", fault);
    }
    info!("Viewer stopped ({})", status.state.as_str());

    Ok(())
}
