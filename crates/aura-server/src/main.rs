use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use aura_core::store::FunnelStore;
use aura_server::state::AppState;

/// `aura health`: liveness probe for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$AURA_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("AURA_PORT").unwrap_or_else(|_| "8001".to_string());
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
                .add_directive("aura=info".parse()?),
        )
        .json()
        .init();

    let cfg = aura_core::config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/aura.db", cfg.data_dir);
    let db = aura_duckdb::DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)?;

    if !std::path::Path::new(&cfg.geoip_path).exists() {
        tracing::warn!(
            geoip_path = %cfg.geoip_path,
            fallback = %cfg.geo_fallback_url,
            "GeoIP database not found. Geolocation falls back to the HTTP fallback service."
        );
    }
    if cfg.admin_token.is_none() {
        info!("AURA_ADMIN_TOKEN not set, admin endpoints disabled");
    }

    let db: Arc<dyn FunnelStore> = Arc::new(db);
    let state = Arc::new(AppState::new(db, cfg.clone())?);

    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            state.run_maintenance_loop().await;
        });
    }

    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = aura_server::app::build_app(Arc::clone(&state));

    info!(
        port = cfg.port,
        public_url = %cfg.public_url,
        backend_url = ?cfg.backend_url,
        "Aura funnel listening on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::signal::ctrl_c().await.ok();
    })
    .await?;

    Ok(())
}
