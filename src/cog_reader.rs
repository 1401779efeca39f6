//! Windowed GeoTIFF reader
//!
//! A [`RasterSource`] wraps a `tiff` decoder running over a [`RangeCursor`], so
//! opening a source only touches the header and the IFD chain, and each chunk
//! (tile or strip) is fetched with its own range read when a window needs it.
//!
//! - Overviews: every later IFD that is a reduced-resolution image (not a mask)
//!   with the same band layout becomes a [`RasterLevel`]
//! - Georeferencing from `ModelPixelScale` + `ModelTiepoint`, or an axis-aligned
//!   `ModelTransformation`
//! - CRS detection from the `GeoKey` directory
//! - Nodata from the GDAL nodata tag

use std::sync::Arc;

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tracing::{debug, warn};

use crate::error::{Result, ServeError};
use crate::geometry::{Crs, GeoBounds};
use crate::range_reader::{RangeCursor, RangeReader};
use crate::tile_cache::ChunkCache;

// GeoTIFF tags not named by the tiff crate
const TAG_NEW_SUBFILE_TYPE: u16 = 254;
const TAG_MODEL_TRANSFORMATION: u16 = 34264;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

// GeoKey IDs
const GEO_KEY_GEOGRAPHIC_TYPE: u32 = 2048;
const GEO_KEY_PROJECTED_CRS: u32 = 3072;

/// `NewSubfileType` bit marking a transparency mask
const SUBFILE_MASK: u32 = 4;

/// Pixel-to-world mapping of the full-resolution image.
///
/// Only north-up rasters are supported: `y` decreases as the row increases.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoReference {
    /// World coordinate of the top-left corner of pixel (0, 0)
    pub origin_x: f64,
    pub origin_y: f64,
    /// CRS units per pixel, both positive
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoReference {
    #[inline]
    #[must_use]
    pub fn pixel_to_world(&self, px: f64, py: f64) -> (f64, f64) {
        (
            self.origin_x + px * self.pixel_width,
            self.origin_y - py * self.pixel_height,
        )
    }

    /// `(min_x, min_y, max_x, max_y)` of an image with the given dimensions
    #[must_use]
    pub fn extent(&self, width: usize, height: usize) -> (f64, f64, f64, f64) {
        let (min_x, max_y) = self.pixel_to_world(0.0, 0.0);
        let (max_x, min_y) = self.pixel_to_world(width as f64, height as f64);
        (min_x, min_y, max_x, max_y)
    }

    fn from_decoder<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Result<Self> {
        let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok();
        let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok();

        let georef = if let (Some(scale), Some(tie)) = (scale, tiepoint)
            && scale.len() >= 2
            && tie.len() >= 6
        {
            Self {
                origin_x: tie[3] - tie[0] * scale[0],
                origin_y: tie[4] + tie[1] * scale[1],
                pixel_width: scale[0],
                pixel_height: scale[1],
            }
        } else if let Ok(m) =
            decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_TRANSFORMATION))
            && m.len() >= 8
        {
            // Row-major 4x4: x = m0*i + m1*j + m3, y = m4*i + m5*j + m7
            if m[1] != 0.0 || m[4] != 0.0 {
                return Err(ServeError::UnsupportedFormat(
                    "rotated or sheared model transformation".into(),
                ));
            }
            Self {
                origin_x: m[3],
                origin_y: m[7],
                pixel_width: m[0],
                pixel_height: -m[5],
            }
        } else {
            return Err(ServeError::UnsupportedFormat(
                "missing georeferencing (no pixel scale/tiepoint or transformation)".into(),
            ));
        };

        let valid = [georef.origin_x, georef.origin_y, georef.pixel_width, georef.pixel_height]
            .iter()
            .all(|v| v.is_finite())
            && georef.pixel_width > 0.0
            && georef.pixel_height > 0.0;
        if !valid {
            return Err(ServeError::UnsupportedFormat(format!(
                "unusable georeferencing {georef:?} (south-up or degenerate)"
            )));
        }
        Ok(georef)
    }
}

/// One level of the pyramid: the full-resolution image or an overview.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterLevel {
    /// IFD index in the file
    pub ifd_index: usize,
    pub width: usize,
    pub height: usize,
    pub chunk_width: usize,
    pub chunk_height: usize,
    pub chunks_across: usize,
    pub chunks_down: usize,
    /// CRS units per pixel at this level (x, y)
    pub pixel_size: (f64, f64),
}

impl RasterLevel {
    /// Decimation relative to the full-resolution image (1.0 for level 0).
    #[must_use]
    pub fn scale(&self, full_width: usize) -> f64 {
        full_width as f64 / self.width as f64
    }

    /// Chunk index containing pixel `(px, py)` of this level.
    #[must_use]
    pub fn chunk_index_for_pixel(&self, px: usize, py: usize) -> Option<usize> {
        if px >= self.width || py >= self.height {
            return None;
        }
        Some((py / self.chunk_height) * self.chunks_across + px / self.chunk_width)
    }
}

/// A decoded chunk with interleaved samples, row-major.
///
/// Edge chunks may be smaller than the nominal chunk dimensions.
#[derive(Debug, Clone)]
pub struct DecodedChunk {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

/// An opened GeoTIFF.
///
/// Owns its decoder; dropping the source releases the byte-range reader.
pub struct RasterSource {
    identifier: String,
    decoder: Decoder<RangeCursor>,
    current_ifd: usize,
    bands: usize,
    crs: Crs,
    georef: GeoReference,
    nodata: Option<f64>,
    levels: Vec<RasterLevel>,
    cache: Option<Arc<ChunkCache>>,
}

impl std::fmt::Debug for RasterSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterSource")
            .field("identifier", &self.identifier)
            .field("bands", &self.bands)
            .field("crs", &self.crs)
            .field("levels", &self.levels.len())
            .finish_non_exhaustive()
    }
}

impl RasterSource {
    /// Open a GeoTIFF through any range reader. Reads only metadata.
    pub fn open(reader: Arc<dyn RangeReader>) -> Result<Self> {
        let identifier = reader.identifier().to_string();
        let cursor = RangeCursor::new(reader);
        let mut decoder = Decoder::new(cursor)?.with_limits(Limits::unlimited());

        let bands = samples_per_pixel(&mut decoder)?;
        let full = read_level(&mut decoder, 0, None)?;
        let georef = GeoReference::from_decoder(&mut decoder)?;
        let nodata = read_nodata(&mut decoder);
        let (min_x, min_y, max_x, max_y) = georef.extent(full.width, full.height);

        let crs = match read_crs(&mut decoder) {
            Some(crs) => crs,
            None => {
                let inferred = if min_x >= -180.0 && max_x <= 180.0 && min_y >= -90.0 && max_y <= 90.0 {
                    Crs::WGS84
                } else {
                    Crs::WEB_MERCATOR
                };
                warn!(source = %identifier, crs = %inferred, "no CRS in GeoKey directory, inferring from extent");
                inferred
            }
        };

        let mut levels = vec![RasterLevel {
            pixel_size: (georef.pixel_width, georef.pixel_height),
            ..full
        }];

        let mut ifd_index = 0;
        while decoder.more_images() {
            decoder.next_image()?;
            ifd_index += 1;

            let subfile_type = decoder
                .find_tag(Tag::from_u16_exhaustive(TAG_NEW_SUBFILE_TYPE))
                .ok()
                .flatten()
                .and_then(|v| v.into_u32().ok())
                .unwrap_or(0);
            if subfile_type & SUBFILE_MASK != 0 {
                debug!(source = %identifier, ifd = ifd_index, "skipping mask IFD");
                continue;
            }

            match samples_per_pixel(&mut decoder) {
                Ok(n) if n == bands => {}
                _ => {
                    debug!(source = %identifier, ifd = ifd_index, "skipping IFD with different band layout");
                    continue;
                }
            }

            let level = read_level(&mut decoder, ifd_index, Some((&levels[0], &georef)))?;
            if level.width >= levels[0].width {
                debug!(source = %identifier, ifd = ifd_index, "skipping IFD that is not reduced resolution");
                continue;
            }
            levels.push(level);
        }

        // Finest first, so index 0 stays the full-resolution image
        levels[1..].sort_by(|a, b| b.width.cmp(&a.width));

        debug!(
            source = %identifier,
            width = levels[0].width,
            height = levels[0].height,
            bands,
            crs = %crs,
            overviews = levels.len() - 1,
            "opened raster"
        );

        Ok(Self {
            identifier,
            decoder,
            current_ifd: ifd_index,
            bands,
            crs,
            georef,
            nodata,
            levels,
            cache: None,
        })
    }

    /// Share decoded chunks with other sources through `cache`.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ChunkCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    #[must_use]
    pub fn band_count(&self) -> usize {
        self.bands
    }

    #[must_use]
    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    #[must_use]
    pub fn native_crs(&self) -> Crs {
        self.crs
    }

    #[must_use]
    pub fn georeference(&self) -> &GeoReference {
        &self.georef
    }

    /// Extent of the full-resolution image in its native CRS.
    #[must_use]
    pub fn native_bounds(&self) -> GeoBounds {
        let (min_x, min_y, max_x, max_y) = self.georef.extent(self.levels[0].width, self.levels[0].height);
        GeoBounds::new(min_x, min_y, max_x, max_y, self.crs)
    }

    /// Pyramid levels; index 0 is full resolution, then overviews finest first.
    #[must_use]
    pub fn levels(&self) -> &[RasterLevel] {
        &self.levels
    }

    /// Pick the level to sample for a window covering `extent_src_width` x
    /// `extent_src_height` full-resolution pixels rendered at `output_size`.
    ///
    /// Returns the coarsest level whose decimation does not exceed the one
    /// needed, or 0 when close to 1:1.
    #[must_use]
    pub fn best_level_for_resolution(&self, extent_src_width: f64, extent_src_height: f64, output_size: usize) -> usize {
        let output_size = output_size.max(1) as f64;
        let needed_scale = (extent_src_width / output_size).max(extent_src_height / output_size);

        if needed_scale < 1.5 {
            return 0;
        }

        let full_width = self.levels[0].width;
        let mut best_idx = 0;
        let mut best_scale = 1.0;
        for (idx, level) in self.levels.iter().enumerate().skip(1) {
            let scale = level.scale(full_width);
            if scale <= needed_scale && scale > best_scale {
                best_scale = scale;
                best_idx = idx;
            }
        }
        best_idx
    }

    /// Decode one chunk of a level, consulting the shared cache first.
    pub fn read_chunk(&mut self, level_idx: usize, chunk_index: usize) -> Result<Arc<DecodedChunk>> {
        let level = self
            .levels
            .get(level_idx)
            .ok_or_else(|| ServeError::Internal(format!("level {level_idx} out of range")))?;
        if chunk_index >= level.chunks_across * level.chunks_down {
            return Err(ServeError::Internal(format!(
                "chunk {chunk_index} out of range at level {level_idx}"
            )));
        }
        let ifd_index = level.ifd_index;

        if let Some(cache) = &self.cache
            && let Some(chunk) = cache.get(&self.identifier, level_idx, chunk_index)
        {
            return Ok(chunk);
        }

        if self.current_ifd != ifd_index {
            self.decoder.seek_to_image(ifd_index)?;
            self.current_ifd = ifd_index;
        }

        let (width, height) = self.decoder.chunk_data_dimensions(chunk_index as u32);
        let (width, height) = (width as usize, height as usize);
        let data = convert_decoding_result(self.decoder.read_chunk(chunk_index as u32)?);

        let expected = width * height * self.bands;
        if data.len() < expected {
            return Err(ServeError::Decode(format!(
                "chunk {chunk_index} of {} decoded to {} samples, expected {expected}",
                self.identifier,
                data.len()
            )));
        }

        let chunk = Arc::new(DecodedChunk { width, height, data });
        if let Some(cache) = &self.cache {
            cache.insert(&self.identifier, level_idx, chunk_index, Arc::clone(&chunk));
        }
        Ok(chunk)
    }
}

fn samples_per_pixel<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Result<usize> {
    let bands = match decoder.colortype()? {
        tiff::ColorType::Gray(_) => 1,
        tiff::ColorType::GrayA(_) => 2,
        tiff::ColorType::RGB(_) => 3,
        tiff::ColorType::RGBA(_) | tiff::ColorType::CMYK(_) => 4,
        tiff::ColorType::Multiband { num_samples, .. } => num_samples as usize,
        other => {
            return Err(ServeError::UnsupportedFormat(format!("color type {other:?}")));
        }
    };

    let planar = decoder
        .find_tag(Tag::PlanarConfiguration)
        .ok()
        .flatten()
        .and_then(|v| v.into_u16().ok())
        .unwrap_or(1);
    if planar != 1 && bands > 1 {
        return Err(ServeError::UnsupportedFormat("band-separate (planar) layout".into()));
    }
    Ok(bands)
}

/// Read the current IFD's dimensions. For overviews the pixel size is derived
/// from the full-resolution image.
fn read_level<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    ifd_index: usize,
    full: Option<(&RasterLevel, &GeoReference)>,
) -> Result<RasterLevel> {
    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);
    if width == 0 || height == 0 {
        return Err(ServeError::UnsupportedFormat(format!("IFD {ifd_index} has zero size")));
    }

    let (chunk_width, chunk_height) = decoder.chunk_dimensions();
    let chunk_width = (chunk_width as usize).max(1);
    let chunk_height = (chunk_height as usize).max(1);

    let pixel_size = match full {
        Some((level, georef)) => (
            georef.pixel_width * level.width as f64 / width as f64,
            georef.pixel_height * level.height as f64 / height as f64,
        ),
        None => (0.0, 0.0),
    };

    Ok(RasterLevel {
        ifd_index,
        width,
        height,
        chunk_width,
        chunk_height,
        chunks_across: width.div_ceil(chunk_width),
        chunks_down: height.div_ceil(chunk_height),
        pixel_size,
    })
}

fn read_crs<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<Crs> {
    let keys = decoder
        .get_tag_u32_vec(Tag::from_u16_exhaustive(TAG_GEO_KEY_DIRECTORY))
        .ok()?;
    parse_geokey_crs(&keys)
}

/// Find the EPSG code in a `GeoKeyDirectory`. Projected wins over geographic.
fn parse_geokey_crs(keys: &[u32]) -> Option<Crs> {
    let count = *keys.get(3)? as usize;
    let mut projected = None;
    let mut geographic = None;

    for entry in keys.get(4..)?.chunks_exact(4).take(count) {
        let (key, location, value) = (entry[0], entry[1], entry[3]);
        // Only inline SHORT values carry an EPSG code; 32767 is "user-defined"
        if location != 0 || value == 0 || value == 32767 {
            continue;
        }
        match key {
            GEO_KEY_PROJECTED_CRS => projected = Some(Crs(value)),
            GEO_KEY_GEOGRAPHIC_TYPE => geographic = Some(Crs(value)),
            _ => {}
        }
    }

    projected.or(geographic)
}

fn read_nodata<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    decoder
        .get_tag_ascii_string(Tag::from_u16_exhaustive(TAG_GDAL_NODATA))
        .ok()
        .and_then(|s| s.trim_end_matches('\0').trim().parse().ok())
}

fn convert_decoding_result(result: DecodingResult) -> Vec<f32> {
    match result {
        DecodingResult::U8(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::U16(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::I16(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::F16(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
    }
}
