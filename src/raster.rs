use ndarray::Array3;

use crate::geometry::GeoBounds;

/// True if `value` is `NaN` or equals `nodata` once narrowed to the sample type.
///
/// Samples are decoded to `f32`, so the nodata value has to be narrowed the
/// same way before comparing: a u32 `4294967295` or an f64 `0.1` would never
/// match its own nodata value in `f64`.
#[inline]
#[must_use]
pub fn matches_nodata(value: f32, nodata: Option<f64>) -> bool {
    value.is_nan() || nodata.is_some_and(|nd| value == nd as f32)
}

/// A resampled slice of a raster, ready for the pixel transform stage.
///
/// `data` is laid out `(band, row, col)`. Pixels the source does not cover
/// are `NaN`; both `NaN` and the source's nodata value count as nodata.
#[derive(Debug, Clone)]
pub struct RasterWindow {
    pub bounds: GeoBounds,
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub nodata: Option<f64>,
    pub data: Array3<f32>,
}

impl RasterWindow {
    /// A window with every sample set to `NaN`.
    #[must_use]
    pub fn empty(bounds: GeoBounds, width: usize, height: usize, band_count: usize, nodata: Option<f64>) -> Self {
        Self {
            bounds,
            width,
            height,
            band_count,
            nodata,
            data: Array3::from_elem((band_count, height, width), f32::NAN),
        }
    }

    /// Build a window from an existing array; dimensions come from its shape.
    #[must_use]
    pub fn from_array(bounds: GeoBounds, data: Array3<f32>, nodata: Option<f64>) -> Self {
        let (band_count, height, width) = data.dim();
        Self {
            bounds,
            width,
            height,
            band_count,
            nodata,
            data,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_nodata(&self, value: f32) -> bool {
        matches_nodata(value, self.nodata)
    }

    /// True if any band of pixel `(row, col)` is nodata.
    #[must_use]
    pub fn pixel_is_nodata(&self, row: usize, col: usize) -> bool {
        (0..self.band_count).any(|band| self.is_nodata(self.data[[band, row, col]]))
    }

    #[inline]
    #[must_use]
    pub fn sample(&self, band: usize, row: usize, col: usize) -> Option<f32> {
        self.data.get([band, row, col]).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Crs;

    #[test]
    fn test_nodata_detection() {
        let bounds = GeoBounds::new(0.0, 0.0, 1.0, 1.0, Crs::WGS84);
        let mut window = RasterWindow::empty(bounds, 2, 1, 1, Some(-9999.0));
        window.data[[0, 0, 1]] = -9999.0;
        assert!(window.pixel_is_nodata(0, 0));
        assert!(window.pixel_is_nodata(0, 1));

        window.data[[0, 0, 0]] = 3.0;
        assert!(!window.pixel_is_nodata(0, 0));
        assert_eq!(window.sample(0, 0, 0), Some(3.0));
        assert_eq!(window.sample(1, 0, 0), None);
    }

    #[test]
    fn test_nodata_compared_in_sample_precision() {
        let bounds = GeoBounds::new(0.0, 0.0, 1.0, 1.0, Crs::WGS84);

        let mut window = RasterWindow::empty(bounds, 1, 1, 1, Some(4_294_967_295.0));
        window.data[[0, 0, 0]] = u32::MAX as f32;
        assert!(window.pixel_is_nodata(0, 0));

        let mut window = RasterWindow::empty(bounds, 1, 1, 1, Some(f64::MIN));
        window.data[[0, 0, 0]] = f64::MIN as f32;
        assert!(window.pixel_is_nodata(0, 0));

        let mut window = RasterWindow::empty(bounds, 1, 1, 1, Some(0.1));
        window.data[[0, 0, 0]] = 0.1f32;
        assert!(window.pixel_is_nodata(0, 0));
        window.data[[0, 0, 0]] = 0.2f32;
        assert!(!window.pixel_is_nodata(0, 0));
    }
}
