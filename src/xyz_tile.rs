//! XYZ tile extraction from GeoTIFF sources
//!
//! Maps `(zoom, column, row)` in the Web Mercator quad-tree to a window,
//! picks the pyramid level that matches the output resolution, and samples
//! each output pixel center with nearest neighbour. Only chunks that output
//! pixels actually land in are decoded.
//!
//! # Example
//!
//! ```rust,ignore
//! use geoserve::{RasterSource, TileCoordinate, read_tile};
//!
//! let mut source = RasterSource::open(reader)?;
//! let tile = TileCoordinate::new(3, 7, 5)?;
//! let window = read_tile(&mut source, tile, 256)?;
//! ```

use std::f64::consts::PI;
use std::sync::Arc;

use ahash::AHashMap;

use crate::cog_reader::{DecodedChunk, RasterSource};
use crate::error::{Result, ServeError};
use crate::geometry::projection::PointTransformer;
use crate::geometry::{Crs, GeoBounds};
use crate::raster::RasterWindow;

/// Highest zoom accepted; `2^30` tiles per side still fits in `u32`.
pub const MAX_ZOOM: u32 = 30;

/// Half the earth's circumference in Web Mercator meters
const HALF_EARTH: f64 = 20037508.342789244;

/// A validated tile address: `column, row < 2^zoom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoordinate {
    pub zoom: u32,
    pub column: u32,
    pub row: u32,
}

impl TileCoordinate {
    /// Validate a tile address. Out-of-range values are rejected, never clamped.
    pub fn new(zoom: u32, column: u32, row: u32) -> Result<Self> {
        let invalid = ServeError::InvalidTileCoordinate { zoom, column, row };
        if zoom > MAX_ZOOM {
            return Err(invalid);
        }
        let n = 1u32 << zoom;
        if column >= n || row >= n {
            return Err(invalid);
        }
        Ok(Self { zoom, column, row })
    }

    #[inline]
    #[must_use]
    pub fn tiles_per_side(&self) -> u32 {
        1u32 << self.zoom
    }

    /// `(x0, y0, x1, y1)` as fractions of the world, `y` counted from the north edge.
    fn fractions(&self) -> (f64, f64, f64, f64) {
        let n = f64::from(self.tiles_per_side());
        (
            f64::from(self.column) / n,
            f64::from(self.row) / n,
            f64::from(self.column + 1) / n,
            f64::from(self.row + 1) / n,
        )
    }

    /// Bounds of this tile in EPSG:4326.
    #[must_use]
    pub fn bounds(&self) -> GeoBounds {
        let (fx0, fy0, fx1, fy1) = self.fractions();
        GeoBounds::new(
            fx0 * 360.0 - 180.0,
            fraction_to_lat(fy1),
            fx1 * 360.0 - 180.0,
            fraction_to_lat(fy0),
            Crs::WGS84,
        )
    }
}

/// Latitude of the horizontal line `fraction` of the way down the Mercator square.
#[inline]
fn fraction_to_lat(fraction: f64) -> f64 {
    (PI * (1.0 - 2.0 * fraction)).sinh().atan().to_degrees()
}

/// EPSG:4326 bounds of a Web Mercator tile.
pub fn tile_to_bounds(zoom: u32, column: u32, row: u32) -> Result<GeoBounds> {
    Ok(TileCoordinate::new(zoom, column, row)?.bounds())
}

/// A tile's extent in Web Mercator meters (EPSG:3857)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MercatorExtent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl MercatorExtent {
    #[must_use]
    pub fn from_tile(tile: &TileCoordinate) -> Self {
        let (fx0, fy0, fx1, fy1) = tile.fractions();
        let span = 2.0 * HALF_EARTH;
        Self {
            min_x: -HALF_EARTH + fx0 * span,
            min_y: HALF_EARTH - fy1 * span,
            max_x: -HALF_EARTH + fx1 * span,
            max_y: HALF_EARTH - fy0 * span,
        }
    }
}

/// Fast inline conversion from Web Mercator X to longitude (degrees)
#[inline(always)]
fn merc_x_to_lon(x: f64) -> f64 {
    x * 180.0 / HALF_EARTH
}

/// Fast inline conversion from Web Mercator Y to latitude (degrees)
#[inline(always)]
fn merc_y_to_lat(y: f64) -> f64 {
    let y_rad = y * PI / HALF_EARTH;
    (2.0 * y_rad.exp().atan() - PI / 2.0).to_degrees()
}

/// How tile coordinates (EPSG:3857) reach the source CRS
enum TransformStrategy {
    /// Source is already EPSG:3857
    Identity,
    /// Inline inverse Mercator for EPSG:4326 sources
    FastMerc2Geo,
    /// proj4rs for everything else
    Proj4rs(PointTransformer),
}

impl TransformStrategy {
    fn for_source(crs: Crs) -> Result<Self> {
        Ok(match crs {
            Crs::WEB_MERCATOR => Self::Identity,
            Crs::WGS84 => Self::FastMerc2Geo,
            other => Self::Proj4rs(PointTransformer::new(Crs::WEB_MERCATOR, other)?),
        })
    }

    /// True when source x depends only on mercator x and source y only on mercator y.
    fn is_separable(&self) -> bool {
        matches!(self, Self::Identity | Self::FastMerc2Geo)
    }

    #[inline(always)]
    fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        match self {
            Self::Identity => Ok((x, y)),
            Self::FastMerc2Geo => Ok((merc_x_to_lon(x), merc_y_to_lat(y))),
            Self::Proj4rs(t) => t.transform(x, y),
        }
    }
}

/// Footprint of the tile in the source CRS: corners, edge midpoints and center,
/// skipping points the projection cannot represent.
fn source_footprint(extent: &MercatorExtent, strategy: &TransformStrategy, crs: Crs) -> Result<GeoBounds> {
    let xs = [extent.min_x, (extent.min_x + extent.max_x) / 2.0, extent.max_x];
    let ys = [extent.min_y, (extent.min_y + extent.max_y) / 2.0, extent.max_y];

    let points: Vec<(f64, f64)> = xs
        .iter()
        .flat_map(|&x| ys.iter().map(move |&y| (x, y)))
        .filter_map(|(x, y)| strategy.transform(x, y).ok())
        .collect();

    GeoBounds::enclosing(&points, crs)
        .filter(GeoBounds::is_finite)
        .ok_or_else(|| ServeError::ReprojectionFailed(format!("tile extent has no image in {crs}")))
}

/// Read the window for `tile` from `source`, resampled to `tile_size` x `tile_size`.
///
/// Fails with [`ServeError::TileOutOfBounds`] when the tile does not overlap the
/// raster at all. Output pixels outside the raster are `NaN`.
pub fn read_tile(source: &mut RasterSource, tile: TileCoordinate, tile_size: usize) -> Result<RasterWindow> {
    if tile_size == 0 {
        return Err(ServeError::Internal("tile size must be positive".into()));
    }

    let extent = MercatorExtent::from_tile(&tile);
    let native = source.native_bounds();
    let strategy = TransformStrategy::for_source(native.crs)?;

    let footprint = source_footprint(&extent, &strategy, native.crs)?;
    if !footprint.intersects(&native) {
        return Err(ServeError::TileOutOfBounds);
    }

    let georef = *source.georeference();
    let extent_src_width = footprint.width() / georef.pixel_width;
    let extent_src_height = footprint.height() / georef.pixel_height;
    let level_idx = source.best_level_for_resolution(extent_src_width, extent_src_height, tile_size);
    let level = source.levels()[level_idx].clone();

    tracing::debug!(
        source = source.identifier(),
        z = tile.zoom,
        x = tile.column,
        y = tile.row,
        level = level_idx,
        level_width = level.width,
        "sampling tile"
    );

    let bands = source.band_count();
    let mut window = RasterWindow::empty(tile.bounds(), tile_size, tile_size, bands, source.nodata());

    // Output pixel resolution in Web Mercator
    let out_res_x = (extent.max_x - extent.min_x) / tile_size as f64;
    let out_res_y = (extent.max_y - extent.min_y) / tile_size as f64;

    // Level pixel coordinate from a source-CRS coordinate, None when outside
    let to_px = |wx: f64| {
        let px = (wx - georef.origin_x) / level.pixel_size.0;
        (px >= 0.0 && px < level.width as f64).then_some(px as usize)
    };
    let to_py = |wy: f64| {
        let py = (georef.origin_y - wy) / level.pixel_size.1;
        (py >= 0.0 && py < level.height as f64).then_some(py as usize)
    };

    // Separable transforms need one x per column and one y per row
    let separable = strategy.is_separable();
    let column_px: Vec<Option<usize>> = if separable {
        (0..tile_size)
            .map(|col| {
                let merc_x = extent.min_x + (col as f64 + 0.5) * out_res_x;
                strategy.transform(merc_x, 0.0).ok().and_then(|(wx, _)| to_px(wx))
            })
            .collect()
    } else {
        Vec::new()
    };

    let mut chunks: AHashMap<usize, Arc<DecodedChunk>> = AHashMap::new();

    for out_y in 0..tile_size {
        let merc_y = extent.max_y - (out_y as f64 + 0.5) * out_res_y;

        let row_py = if separable {
            match strategy.transform(0.0, merc_y).ok().and_then(|(_, wy)| to_py(wy)) {
                Some(py) => Some(py),
                None => continue,
            }
        } else {
            None
        };

        for out_x in 0..tile_size {
            let (px, py) = if separable {
                match (column_px[out_x], row_py) {
                    (Some(px), Some(py)) => (px, py),
                    _ => continue,
                }
            } else {
                let merc_x = extent.min_x + (out_x as f64 + 0.5) * out_res_x;
                let Ok((wx, wy)) = strategy.transform(merc_x, merc_y) else {
                    continue;
                };
                match (to_px(wx), to_py(wy)) {
                    (Some(px), Some(py)) => (px, py),
                    _ => continue,
                }
            };

            let Some(chunk_idx) = level.chunk_index_for_pixel(px, py) else {
                continue;
            };
            let chunk = match chunks.get(&chunk_idx) {
                Some(chunk) => Arc::clone(chunk),
                None => {
                    let chunk = source.read_chunk(level_idx, chunk_idx)?;
                    chunks.insert(chunk_idx, Arc::clone(&chunk));
                    chunk
                }
            };

            let local_x = px % level.chunk_width;
            let local_y = py % level.chunk_height;
            if local_x >= chunk.width || local_y >= chunk.height {
                continue;
            }
            let base = (local_y * chunk.width + local_x) * bands;
            for band in 0..bands {
                window.data[[band, out_y, out_x]] = chunk.data[base + band];
            }
        }
    }

    Ok(window)
}
