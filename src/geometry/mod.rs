pub mod projection;

use std::fmt;

/// An EPSG coordinate reference system code.
///
/// Axis order is always (x, y): easting/longitude first, northing/latitude
/// second, regardless of what the EPSG registry declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs(pub u32);

impl Crs {
    /// Geographic longitude/latitude on WGS84 (EPSG:4326).
    pub const WGS84: Crs = Crs(4326);
    /// Spherical Web Mercator (EPSG:3857).
    pub const WEB_MERCATOR: Crs = Crs(3857);

    #[inline]
    #[must_use]
    pub fn epsg(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

/// An axis-aligned bounding box tagged with the CRS its coordinates are in.
///
/// In a geographic CRS `min_x`/`max_x` are longitudes and `min_y`/`max_y`
/// latitudes.
///
/// # Example
///
/// ```rust
/// use geoserve::{Crs, GeoBounds};
///
/// let b = GeoBounds::new(-10.0, -5.0, 10.0, 5.0, Crs::WGS84);
/// assert!(b.contains(&GeoBounds::new(0.0, 0.0, 1.0, 1.0, Crs::WGS84)));
/// assert_eq!(b.to_array(), [-10.0, -5.0, 10.0, 5.0]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub crs: Crs,
}

impl GeoBounds {
    /// Create bounds; the caller guarantees `min <= max` on both axes.
    #[inline]
    #[must_use]
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64, crs: Crs) -> Self {
        Self { min_x, min_y, max_x, max_y, crs }
    }

    /// Smallest box enclosing a set of points. Returns `None` for an empty set.
    #[must_use]
    pub fn enclosing(points: &[(f64, f64)], crs: Crs) -> Option<Self> {
        let (&(x0, y0), rest) = points.split_first()?;
        let mut b = Self::new(x0, y0, x0, y0, crs);
        for &(x, y) in rest {
            b.min_x = b.min_x.min(x);
            b.min_y = b.min_y.min(y);
            b.max_x = b.max_x.max(x);
            b.max_y = b.max_y.max(y);
        }
        Some(b)
    }

    /// The four corners, counter-clockwise from the lower left.
    #[must_use]
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.min_x, self.min_y),
            (self.max_x, self.min_y),
            (self.max_x, self.max_y),
            (self.min_x, self.max_y),
        ]
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// True if the boxes share any area. Touching edges do not count.
    #[must_use]
    pub fn intersects(&self, other: &GeoBounds) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    /// True if `other` lies entirely within `self` (edges inclusive).
    #[must_use]
    pub fn contains(&self, other: &GeoBounds) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }

    /// `[min_x, min_y, max_x, max_y]`, the layout used in JSON responses.
    #[must_use]
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enclosing() {
        let b = GeoBounds::enclosing(&[(3.0, -1.0), (-2.0, 4.0), (0.0, 0.0)], Crs::WGS84).unwrap();
        assert_eq!(b.to_array(), [-2.0, -1.0, 3.0, 4.0]);
        assert!(GeoBounds::enclosing(&[], Crs::WGS84).is_none());
    }

    #[test]
    fn test_intersects_excludes_touching_edges() {
        let a = GeoBounds::new(0.0, 0.0, 10.0, 10.0, Crs::WGS84);
        let b = GeoBounds::new(5.0, 5.0, 15.0, 15.0, Crs::WGS84);
        let c = GeoBounds::new(10.0, 0.0, 20.0, 10.0, Crs::WGS84);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_crs_display() {
        assert_eq!(Crs::WEB_MERCATOR.to_string(), "EPSG:3857");
    }
}
