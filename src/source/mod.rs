//! Raster catalog: maps request source identifiers to opened rasters.
//!
//! Local identifiers are paths relative to the raster root. `http(s)://` and
//! `s3://` identifiers are read with range requests, but only when remote
//! sources are enabled.

pub mod local;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::cog_reader::RasterSource;
use crate::error::{Result, ServeError};
use crate::range_reader::{create_range_reader, RangeReader};
use crate::tile_cache::ChunkCache;

/// Default output tile edge in pixels.
pub const DEFAULT_TILE_SIZE: usize = 256;

fn is_remote(identifier: &str) -> bool {
    ["http://", "https://", "s3://"]
        .iter()
        .any(|scheme| identifier.starts_with(scheme))
}

/// Read-only configuration shared by every raster request.
#[derive(Clone)]
pub struct RasterCatalog {
    root: PathBuf,
    allow_remote: bool,
    tile_size: usize,
    cache: Option<Arc<ChunkCache>>,
}

impl std::fmt::Debug for RasterCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterCatalog")
            .field("root", &self.root)
            .field("allow_remote", &self.allow_remote)
            .field("tile_size", &self.tile_size)
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

impl RasterCatalog {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            allow_remote: false,
            tile_size: DEFAULT_TILE_SIZE,
            cache: None,
        }
    }

    #[must_use]
    pub fn with_remote_sources(mut self, allow: bool) -> Self {
        self.allow_remote = allow;
        self
    }

    #[must_use]
    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = tile_size.max(1);
        self
    }

    /// Share decoded chunks across requests, bounded to `capacity_bytes`.
    #[must_use]
    pub fn with_chunk_cache(mut self, capacity_bytes: usize) -> Self {
        self.cache = (capacity_bytes > 0).then(|| Arc::new(ChunkCache::new(capacity_bytes)));
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    fn reader_for(&self, identifier: &str) -> Result<Arc<dyn RangeReader>> {
        let not_found = || ServeError::SourceNotFound(identifier.to_string());

        let location = if is_remote(identifier) {
            if !self.allow_remote {
                debug!(source = identifier, "remote sources are disabled");
                return Err(not_found());
            }
            identifier.to_string()
        } else {
            let path = local::resolve(&self.root, identifier).ok_or_else(not_found)?;
            path.to_string_lossy().into_owned()
        };

        create_range_reader(&location).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::InvalidInput => not_found(),
            _ => ServeError::Decode(format!("{identifier}: {e}")),
        })
    }

    /// Open a source. Blocking: call from `spawn_blocking`.
    pub fn open(&self, identifier: &str) -> Result<RasterSource> {
        let source = RasterSource::open(self.reader_for(identifier)?)?;
        Ok(match &self.cache {
            Some(cache) => source.with_cache(Arc::clone(cache)),
            None => source,
        })
    }

    /// Identifiers of the GeoTIFFs under the raster root.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        local::scan(&self.root)
    }
}
