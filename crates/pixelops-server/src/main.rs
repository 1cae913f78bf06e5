use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use pixelops_server::{scheduler::Scheduler, state::AppState};

/// `pixelops health`: liveness check for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$PIXELOPS_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("PIXELOPS_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }

    // Structured JSON logging. Level controlled via RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pixelops=info".parse()?),
        )
        .json()
        .init();

    let cfg = pixelops_core::config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/pixelops.db", cfg.data_dir);
    let db = pixelops_duckdb::DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)?;

    let state = Arc::new(AppState::new(db, cfg.clone()));

    // Background jobs: diagnostics, failed-event retry, analytics rollup, cleanup.
    {
        let scheduler = Scheduler::with_default_jobs(AppState::clone(&state));
        tokio::spawn(scheduler.run());
    }

    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = pixelops_server::app::build_app(Arc::clone(&state));

    info!(
        port = cfg.port,
        workers = cfg.worker_concurrency,
        "pixelops listening on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    info!("shutdown complete");
    Ok(())
}
