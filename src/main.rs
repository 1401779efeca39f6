use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use geoserve::{AppState, Config, FeatureCatalog, PgFeatureCatalog, router};

fn feature_catalog(config: &Config) -> anyhow::Result<Option<Arc<dyn FeatureCatalog>>> {
    let Some(url) = config.database_url.as_deref() else {
        warn!("DATABASE_URL is not set, feature export is disabled");
        return Ok(None);
    };

    // Connections are opened on first use.
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.acquire_timeout())
        .connect_lazy(url)
        .context("invalid DATABASE_URL")?;

    let catalog = PgFeatureCatalog::new(pool, config.schemas())
        .with_batch_size(config.fetch_batch_size)
        .with_statement_timeout(config.statement_timeout());
    Ok(Some(Arc::new(catalog)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("geoserve=info,tower_http=info")),
        )
        .with_target(false)
        .compact()
        .init();

    let config = Config::parse();
    let rasters = config.raster_catalog();
    info!(
        root = %config.raster_root.display(),
        remote = config.allow_remote_sources,
        tile_size = config.tile_size,
        chunk_cache_mb = config.chunk_cache_mb,
        "raster catalog ready"
    );

    let state = AppState::new(rasters, feature_catalog(&config)?);
    let app = router(state);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("listening on http://{}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
