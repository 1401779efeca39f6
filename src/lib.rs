//! # geoserve - XYZ raster tiles and streamed GeoJSON export
//!
//! Serves map tiles rendered on demand from (Cloud Optimized) GeoTIFFs and
//! exports PostGIS tables as GeoJSON FeatureCollections streamed row by row.
//!
//! ## Features
//!
//! - **Range requests**: rasters are read from local files, HTTP or S3 without
//!   loading the whole file
//! - **Overviews**: the coarsest overview that still satisfies the tile
//!   resolution is read
//! - **Reprojection**: Web Mercator tiles over rasters in any EPSG CRS known to
//!   proj4rs
//! - **Rendering**: optional linear rescale and colormap, nodata as transparency
//! - **Streaming export**: bounded memory, cursor released exactly once
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use geoserve::{RasterCatalog, RenderOptions, TileCoordinate, read_tile, render};
//!
//! let catalog = RasterCatalog::new("/data/raster");
//! let mut source = catalog.open("dem.tif")?;
//! let tile = TileCoordinate::new(10, 163, 395)?;
//! let window = read_tile(&mut source, tile, 256)?;
//! let options = RenderOptions::parse(Some("0,3000"), Some("terrain"))?;
//! let rgba = render(window, &options)?;
//! ```
//!
//! ## Architecture
//!
//! - [`xyz_tile`]: tile coordinates, tile bounds and windowed tile reads
//! - [`cog_reader`]: GeoTIFF metadata, overview levels and chunk decoding
//! - [`range_reader`]: I/O abstraction for local/HTTP/S3 sources
//! - [`render`]: rescale, colormaps and PNG encoding
//! - [`features`]: the FeatureCollection stream and the PostGIS catalog
//! - [`server`]: axum router and handlers

// ============================================================================
// Public modules
// ============================================================================

pub mod cog_reader;
pub mod config;
pub mod error;
pub mod features;
pub mod geometry;
pub mod range_reader;
pub mod raster;
pub mod render;
pub mod s3;
pub mod server;
pub mod source;
pub mod tile_cache;
pub mod xyz_tile;

#[cfg(test)]
pub(crate) mod test_support;

// ============================================================================
// Errors
// ============================================================================

pub use error::{Result, ServeError};

// ============================================================================
// Raster Sources
// ============================================================================

pub use cog_reader::{DecodedChunk, GeoReference, RasterLevel, RasterSource};
pub use raster::RasterWindow;
pub use source::RasterCatalog;

// ============================================================================
// XYZ Tiles
// ============================================================================

pub use xyz_tile::{MercatorExtent, TileCoordinate, read_tile, tile_to_bounds};

// ============================================================================
// Geometry & Projections
// ============================================================================

pub use geometry::projection::{
    get_proj_string,
    is_geographic_crs,
    lon_lat_to_mercator,
    mercator_to_lon_lat,
    project_point,
    reproject_bounds,
};
pub use geometry::{Crs, GeoBounds};

// ============================================================================
// Rendering
// ============================================================================

pub use render::colormap::{ColorMap, ColorMapId};
pub use render::encode::{ImageFormat, encode};
pub use render::{RenderOptions, RgbaBuffer, render};

// ============================================================================
// Range Readers (I/O Abstraction)
// ============================================================================

pub use range_reader::{
    HttpRangeReader,
    LocalRangeReader,
    MemoryRangeReader,
    RangeReader,
    create_range_reader,
};
pub use s3::{S3Config, S3RangeReaderAsync, S3RangeReaderSync};

// ============================================================================
// Caching
// ============================================================================

pub use tile_cache::ChunkCache;

// ============================================================================
// Feature Export
// ============================================================================

pub use features::postgis::PgFeatureCatalog;
pub use features::{FeatureCatalog, FeatureRow, FeatureStream, RowCursor, TableRef};

// ============================================================================
// Server
// ============================================================================

pub use config::Config;
pub use server::{AppState, router};
