//! Scoreline: write-consistency layer for live sports-event ingestion.

use std::path::PathBuf;
use std::sync::Arc;

use scoreline_core::{ScorelineConfig, TracingSink};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod routes;
mod state;
mod workers;

use state::AppState;

fn resolve_data_dir() -> PathBuf {
    std::env::var("SCORELINE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if let Some(arg) = args.get(1) {
        match arg.as_str() {
            "--help" | "-h" | "help" => {
                println!("Scoreline: live event write-consistency service");
                println!();
                println!("Usage: scoreline");
                println!();
                println!("Environment:");
                println!("  SCORELINE_DATA_DIR       Data directory (default: data)");
                println!("  PORT                     Operational HTTP port (default: 3004)");
                println!("  UPSTREAM_BASE_URL        Provider API base URL");
                println!("  UPSTREAM_API_KEY         Provider API key");
                println!("  RUST_LOG                 Log filter (default: info)");
                return Ok(());
            }
            _ => {
                eprintln!("Unknown command: {}. Use 'scoreline help' for usage.", arg);
                std::process::exit(1);
            }
        }
    }

    let data_dir = resolve_data_dir();
    info!("Data directory: {}", data_dir.display());

    let config = ScorelineConfig::from_env(&data_dir)?;
    let port = config.port;

    let state = Arc::new(
        AppState::new(config, TracingSink::shared())
            .map_err(|e| anyhow::anyhow!("Failed to initialize: {}", e))?,
    );

    workers::start_background_tasks(state.clone());

    let app = routes::build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Scoreline listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
