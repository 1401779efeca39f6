//! Per-pixel value transforms: linear rescale, colormap lookup and direct
//! band-to-RGBA mapping. Nodata always ends up as a transparent pixel.

use crate::error::{Result, ServeError};
use crate::raster::{RasterWindow, matches_nodata};
use crate::render::colormap::ColorMap;
use crate::render::RgbaBuffer;

const TRANSPARENT: [u8; 4] = [0, 0, 0, 0];

/// Round and clamp a sample into a byte.
#[inline]
fn to_byte(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Map samples linearly from `[in_min, in_max]` to `[0, 255]`, clamping values
/// outside the range. Nodata samples become `NaN` and the window's nodata value
/// is cleared, so no rescaled value can collide with it.
pub fn rescale(mut window: RasterWindow, in_min: f64, in_max: f64) -> Result<RasterWindow> {
    if !in_min.is_finite() || !in_max.is_finite() {
        return Err(ServeError::InvalidRescaleSyntax(format!("{in_min},{in_max}")));
    }
    if in_min == in_max {
        return Err(ServeError::DegenerateRescaleRange(in_min));
    }

    let factor = 255.0 / (in_max - in_min);
    let nodata = window.nodata;
    window.data.mapv_inplace(|v| {
        if matches_nodata(v, nodata) {
            f32::NAN
        } else {
            ((f64::from(v) - in_min) * factor).clamp(0.0, 255.0) as f32
        }
    });
    window.nodata = None;
    Ok(window)
}

/// Look up each sample of a single-band window in `colormap`.
pub fn apply_colormap(window: &RasterWindow, colormap: &ColorMap) -> Result<RgbaBuffer> {
    if window.band_count != 1 {
        return Err(ServeError::ColormapRequiresSingleBand(window.band_count));
    }

    let mut buffer = RgbaBuffer::transparent(window.width, window.height);
    for ((row, col), value) in window.data.index_axis(ndarray::Axis(0), 0).indexed_iter() {
        let pixel = if window.is_nodata(*value) {
            TRANSPARENT
        } else {
            colormap.lookup(to_byte(*value))
        };
        buffer.set_pixel(col, row, pixel);
    }
    Ok(buffer)
}

/// Interpret bands directly: 1 gray, 2 gray+alpha, 3 RGB, 4+ RGBA (first four).
/// A pixel with nodata in any band is transparent.
#[must_use]
pub fn to_rgba(window: &RasterWindow) -> RgbaBuffer {
    let mut buffer = RgbaBuffer::transparent(window.width, window.height);
    if window.band_count == 0 {
        return buffer;
    }

    for row in 0..window.height {
        for col in 0..window.width {
            if window.pixel_is_nodata(row, col) {
                continue;
            }
            let band = |b: usize| to_byte(window.data[[b, row, col]]);
            let pixel = match window.band_count {
                1 => {
                    let v = band(0);
                    [v, v, v, 255]
                }
                2 => {
                    let v = band(0);
                    [v, v, v, band(1)]
                }
                3 => [band(0), band(1), band(2), 255],
                _ => [band(0), band(1), band(2), band(3)],
            };
            buffer.set_pixel(col, row, pixel);
        }
    }
    buffer
}
