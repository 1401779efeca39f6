//! Turning raster windows into images.
//!
//! A window goes through an optional linear rescale, then either a colormap
//! lookup (single band) or a direct band-to-RGBA mapping, and finally an
//! image encoder.

pub mod colormap;
pub mod encode;
pub mod transform;

use crate::error::{Result, ServeError};
use crate::raster::RasterWindow;
use colormap::{ColorMap, ColorMapId};

/// Row-major 8-bit RGBA pixels; `data.len() == width * height * 4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaBuffer {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl RgbaBuffer {
    /// Fully transparent buffer.
    #[must_use]
    pub fn transparent(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height * 4],
        }
    }

    #[inline]
    pub fn set_pixel(&mut self, x: usize, y: usize, rgba: [u8; 4]) {
        let offset = (y * self.width + x) * 4;
        self.data[offset..offset + 4].copy_from_slice(&rgba);
    }

    #[inline]
    #[must_use]
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let offset = (y * self.width + x) * 4;
        [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ]
    }
}

/// Optional rendering steps requested with a tile.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderOptions {
    /// Input range mapped onto `[0, 255]`, applied before the colormap.
    pub rescale: Option<(f64, f64)>,
    pub colormap: Option<ColorMapId>,
}

impl RenderOptions {
    /// Parse the `rescale` (`"<min>,<max>"`) and `colormap` query parameters.
    pub fn parse(rescale: Option<&str>, colormap: Option<&str>) -> Result<Self> {
        let rescale = rescale.map(parse_rescale).transpose()?;
        let colormap = colormap.map(str::parse::<ColorMapId>).transpose()?;
        Ok(Self { rescale, colormap })
    }
}

fn parse_rescale(raw: &str) -> Result<(f64, f64)> {
    let invalid = || ServeError::InvalidRescaleSyntax(raw.to_string());
    let (min, max) = raw.split_once(',').ok_or_else(invalid)?;
    let min: f64 = min.trim().parse().map_err(|_| invalid())?;
    let max: f64 = max.trim().parse().map_err(|_| invalid())?;
    if !min.is_finite() || !max.is_finite() {
        return Err(invalid());
    }
    if min == max {
        return Err(ServeError::DegenerateRescaleRange(min));
    }
    Ok((min, max))
}

/// Apply `options` to a window and produce RGBA pixels.
pub fn render(window: RasterWindow, options: &RenderOptions) -> Result<RgbaBuffer> {
    let window = match options.rescale {
        Some((min, max)) => transform::rescale(window, min, max)?,
        None => window,
    };
    match options.colormap {
        Some(id) => transform::apply_colormap(&window, &ColorMap::new(id)),
        None => Ok(transform::to_rgba(&window)),
    }
}
