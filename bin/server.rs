// rank-split - Web Server
// REST API with Axum over the SQLite party ledger

use anyhow::{Context, Result};
use rank_split::api::{router, AppState};
use rank_split::config::{init_tracing, Settings};
use rank_split::open_database;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings = Settings::from_env()?;
    info!(
        db = %settings.db_path.display(),
        policy = %settings.rate_policy,
        "starting rank-split server"
    );

    let conn = open_database(&settings.db_path)?;
    let addr = settings.bind_address.clone();
    let app = router(AppState::new(conn, settings));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("server running on http://{}", addr);
    info!("API: http://{}/api/parties", addr);

    axum::serve(listener, app)
        .await
        .context("Server stopped unexpectedly")?;

    Ok(())
}
