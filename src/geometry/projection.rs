//! Coordinate transforms between EPSG codes using pure Rust (proj4rs + crs-definitions).

use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use crate::error::{Result, ServeError};
use crate::geometry::{Crs, GeoBounds};

/// Project a point from one CRS to another.
///
/// Handles any EPSG code known to the crs-definitions database (UTM zones,
/// national grids, etc). Geographic coordinates are in degrees on both sides.
#[inline]
pub fn project_point(source: Crs, target: Crs, x: f64, y: f64) -> Result<(f64, f64)> {
    if source == target {
        return Ok((x, y));
    }
    PointTransformer::new(source, target)?.transform(x, y)
}

/// Reproject a bounding box by transforming all four corners and taking the
/// enclosing axis-aligned box.
///
/// The diagonal pair alone is not enough: a transform can rotate or shear the
/// box so that another corner becomes the extreme.
pub fn reproject_bounds(bounds: &GeoBounds, source: Crs, target: Crs) -> Result<GeoBounds> {
    if source == target {
        return Ok(GeoBounds { crs: target, ..*bounds });
    }

    let transformer = PointTransformer::new(source, target)?;
    let mut projected = Vec::with_capacity(4);
    for (x, y) in bounds.corners() {
        projected.push(transformer.transform(x, y)?);
    }

    GeoBounds::enclosing(&projected, target)
        .filter(GeoBounds::is_finite)
        .ok_or_else(|| {
            ServeError::ReprojectionFailed(format!(
                "bounds {:?} have no finite image in {target}",
                bounds.to_array()
            ))
        })
}

/// Longitude/latitude (EPSG:4326) to Web Mercator (EPSG:3857)
#[inline]
pub fn lon_lat_to_mercator(lon: f64, lat: f64) -> Result<(f64, f64)> {
    project_point(Crs::WGS84, Crs::WEB_MERCATOR, lon, lat)
}

/// Web Mercator (EPSG:3857) to longitude/latitude (EPSG:4326)
#[inline]
pub fn mercator_to_lon_lat(x: f64, y: f64) -> Result<(f64, f64)> {
    project_point(Crs::WEB_MERCATOR, Crs::WGS84, x, y)
}

/// Get PROJ4 string for an EPSG code using the crs-definitions database
#[inline]
#[must_use]
pub fn get_proj_string(crs: Crs) -> Option<&'static str> {
    u16::try_from(crs.epsg())
        .ok()
        .and_then(crs_definitions::from_code)
        .map(|def| def.proj4)
}

/// Check if an EPSG code represents a geographic (lon/lat) CRS
#[inline]
#[must_use]
pub fn is_geographic_crs(crs: Crs) -> bool {
    if let Some(proj_str) = get_proj_string(crs) {
        proj_str.contains("+proj=longlat")
    } else {
        // Geographic CRS codes are typically in the 4000-4999 range
        (4000..5000).contains(&crs.epsg())
    }
}

/// A reusable proj4rs transform between two EPSG codes.
///
/// Building a [`Proj`] parses the PROJ string, so per-pixel callers should
/// construct one transformer and reuse it.
pub struct PointTransformer {
    source: Proj,
    target: Proj,
    source_crs: Crs,
    target_crs: Crs,
    /// proj4rs works in radians for geographic systems
    source_is_geographic: bool,
    target_is_geographic: bool,
}

impl PointTransformer {
    pub fn new(source_crs: Crs, target_crs: Crs) -> Result<Self> {
        let source = Self::proj_for(source_crs)?;
        let target = Self::proj_for(target_crs)?;
        Ok(Self {
            source,
            target,
            source_crs,
            target_crs,
            source_is_geographic: is_geographic_crs(source_crs),
            target_is_geographic: is_geographic_crs(target_crs),
        })
    }

    fn proj_for(crs: Crs) -> Result<Proj> {
        let proj_str = get_proj_string(crs).ok_or_else(|| {
            ServeError::ReprojectionFailed(format!("{crs} is not in the crs-definitions database"))
        })?;
        Proj::from_proj_string(proj_str)
            .map_err(|e| ServeError::ReprojectionFailed(format!("invalid projection {crs}: {e:?}")))
    }

    /// Transform one point. Fails if proj4rs rejects it or produces a
    /// non-finite coordinate (e.g. a pole in Mercator).
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let mut point = if self.source_is_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        transform(&self.source, &self.target, &mut point).map_err(|e| {
            ServeError::ReprojectionFailed(format!(
                "({x}, {y}) from {} to {}: {e:?}",
                self.source_crs, self.target_crs
            ))
        })?;

        let (out_x, out_y) = if self.target_is_geographic {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };

        if !out_x.is_finite() || !out_y.is_finite() {
            return Err(ServeError::ReprojectionFailed(format!(
                "({x}, {y}) from {} to {} is undefined",
                self.source_crs, self.target_crs
            )));
        }
        Ok((out_x, out_y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < EPS
    }

    #[test]
    fn test_lon_lat_to_mercator_origin() {
        let (x, y) = lon_lat_to_mercator(0.0, 0.0).unwrap();
        assert!(approx_eq(x, 0.0));
        assert!(approx_eq(y, 0.0));
    }

    #[test]
    fn test_roundtrip_4326_3857() {
        let test_points = [
            (0.0, 0.0),
            (10.0, 51.5),   // London-ish
            (-122.4, 37.8), // San Francisco
            (139.7, 35.7),  // Tokyo
        ];

        for (lon, lat) in test_points {
            let (x, y) = lon_lat_to_mercator(lon, lat).unwrap();
            let (lon2, lat2) = mercator_to_lon_lat(x, y).unwrap();
            assert!(approx_eq(lon, lon2), "lon: {} != {}", lon, lon2);
            assert!(approx_eq(lat, lat2), "lat: {} != {}", lat, lat2);
        }
    }

    #[test]
    fn test_project_point_utm() {
        // EPSG:32633 is UTM zone 33N
        let (x, y) = project_point(Crs::WGS84, Crs(32633), 15.0, 52.0).unwrap();
        assert!(x > 400000.0 && x < 600000.0, "UTM easting: {}", x);
        assert!(y > 5000000.0 && y < 6000000.0, "UTM northing: {}", y);
    }

    #[test]
    fn test_unsupported_epsg_code() {
        let result = project_point(Crs::WGS84, Crs(999999), 0.0, 0.0);
        assert!(matches!(result, Err(ServeError::ReprojectionFailed(_))));
    }

    #[test]
    fn test_is_geographic_crs() {
        assert!(is_geographic_crs(Crs::WGS84));
        assert!(!is_geographic_crs(Crs::WEB_MERCATOR));
        assert!(!is_geographic_crs(Crs(32633)));
    }

    #[test]
    fn test_reproject_bounds_roundtrip_mercator() {
        let original = GeoBounds::new(-122.5, 37.2, -121.0, 38.4, Crs::WGS84);
        let merc = reproject_bounds(&original, Crs::WGS84, Crs::WEB_MERCATOR).unwrap();
        assert_eq!(merc.crs, Crs::WEB_MERCATOR);
        assert!(merc.min_x < merc.max_x && merc.min_y < merc.max_y);

        let back = reproject_bounds(&merc, Crs::WEB_MERCATOR, Crs::WGS84).unwrap();
        for (a, b) in original.to_array().iter().zip(back.to_array()) {
            assert!((a - b).abs() < 1e-7, "{a} != {b}");
        }
    }

    #[test]
    fn test_reproject_bounds_uses_all_corners() {
        // Near the edge of UTM 33N the grid is rotated relative to lon/lat, so the
        // western corners do not share an easting. Enclosing all four corners must
        // contain every individually projected corner.
        let geo = GeoBounds::new(10.0, 50.0, 11.0, 60.0, Crs::WGS84);
        let utm = reproject_bounds(&geo, Crs::WGS84, Crs(32633)).unwrap();
        for (lon, lat) in geo.corners() {
            let (x, y) = project_point(Crs::WGS84, Crs(32633), lon, lat).unwrap();
            assert!(x >= utm.min_x - 1e-6 && x <= utm.max_x + 1e-6);
            assert!(y >= utm.min_y - 1e-6 && y <= utm.max_y + 1e-6);
        }
        let (x_sw, _) = project_point(Crs::WGS84, Crs(32633), 10.0, 50.0).unwrap();
        let (x_nw, _) = project_point(Crs::WGS84, Crs(32633), 10.0, 60.0).unwrap();
        assert!((x_sw - x_nw).abs() > 1000.0);
    }

    #[test]
    fn test_reproject_bounds_pole_fails() {
        let polar = GeoBounds::new(-10.0, 80.0, 10.0, 90.0, Crs::WGS84);
        let result = reproject_bounds(&polar, Crs::WGS84, Crs::WEB_MERCATOR);
        assert!(matches!(result, Err(ServeError::ReprojectionFailed(_))));
    }

    #[test]
    fn test_same_crs_is_identity() {
        let b = GeoBounds::new(1.0, 2.0, 3.0, 4.0, Crs::WGS84);
        assert_eq!(reproject_bounds(&b, Crs::WGS84, Crs::WGS84).unwrap(), b);
    }
}
