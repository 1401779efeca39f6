//! Process configuration. Every option can be given as a flag or through the
//! environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::features::postgis::DEFAULT_BATCH_SIZE;
use crate::source::{DEFAULT_TILE_SIZE, RasterCatalog};

#[derive(Parser, Debug, Clone)]
#[command(name = "geoserve", version, about = "Raster XYZ tiles and streamed GeoJSON export")]
pub struct Config {
    /// Address the HTTP server listens on
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind_addr: SocketAddr,

    /// Directory that local source identifiers are resolved against
    #[arg(long, env = "RASTER_ROOT", default_value = "/data/raster")]
    pub raster_root: PathBuf,

    /// Accept http(s):// and s3:// source identifiers
    #[arg(long, env = "ALLOW_REMOTE_SOURCES", default_value_t = false)]
    pub allow_remote_sources: bool,

    /// Output tile edge in pixels
    #[arg(long, env = "TILE_SIZE", default_value_t = DEFAULT_TILE_SIZE)]
    pub tile_size: usize,

    /// Decoded chunk cache shared across requests, in MiB (0 disables it)
    #[arg(long, env = "CHUNK_CACHE_MB", default_value_t = 0)]
    pub chunk_cache_mb: usize,

    /// PostGIS connection string; feature export is unavailable without it
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Schemas whose spatial tables may be exported, in lookup order
    #[arg(long, env = "EXPORT_SCHEMAS", value_delimiter = ',', default_value = "public")]
    pub export_schemas: Vec<String>,

    /// Rows fetched from the export cursor per round trip
    #[arg(long, env = "FETCH_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub fetch_batch_size: u32,

    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 5)]
    pub db_max_connections: u32,

    #[arg(long, env = "DB_ACQUIRE_TIMEOUT_SECS", default_value_t = 5)]
    pub db_acquire_timeout_secs: u64,

    /// Per-statement timeout for export queries, in milliseconds
    #[arg(long, env = "STATEMENT_TIMEOUT_MS")]
    pub statement_timeout_ms: Option<u64>,
}

impl Config {
    /// Raster catalog described by this configuration.
    #[must_use]
    pub fn raster_catalog(&self) -> RasterCatalog {
        RasterCatalog::new(&self.raster_root)
            .with_remote_sources(self.allow_remote_sources)
            .with_tile_size(self.tile_size)
            .with_chunk_cache(self.chunk_cache_mb.saturating_mul(1024 * 1024))
    }

    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.db_acquire_timeout_secs)
    }

    #[must_use]
    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_ms.map(Duration::from_millis)
    }

    /// Schema allow-list with blanks removed.
    #[must_use]
    pub fn schemas(&self) -> Vec<String> {
        self.export_schemas
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
