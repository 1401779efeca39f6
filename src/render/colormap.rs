//! Named color ramps and their 256-entry lookup tables.

use std::fmt;
use std::str::FromStr;

use crate::error::ServeError;

/// A color stop: position in [0, 1] mapped to an RGB color.
#[derive(Debug, Clone, Copy)]
struct ColorStop {
    t: f64,
    rgb: [u8; 3],
}

impl ColorStop {
    const fn new(t: f64, r: u8, g: u8, b: u8) -> Self {
        Self { t, rgb: [r, g, b] }
    }
}

/// Built-in colormaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorMapId {
    /// Purple -> Teal -> Yellow
    Viridis,
    /// Green -> Yellow -> Brown -> White (elevation)
    Terrain,
    /// Black -> White
    Grayscale,
    /// Brown -> Yellow -> Green
    Ndvi,
    /// Blue -> White -> Red (divergent data)
    BlueWhiteRed,
    /// White -> Cyan -> Blue (water depth/moisture)
    Water,
    /// Yellow -> Orange -> Red -> Brown
    Accumulation,
}

impl ColorMapId {
    pub const ALL: &[ColorMapId] = &[
        Self::Viridis,
        Self::Terrain,
        Self::Grayscale,
        Self::Ndvi,
        Self::BlueWhiteRed,
        Self::Water,
        Self::Accumulation,
    ];

    /// Name accepted in the `colormap` query parameter.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Viridis => "viridis",
            Self::Terrain => "terrain",
            Self::Grayscale => "grayscale",
            Self::Ndvi => "ndvi",
            Self::BlueWhiteRed => "blue_white_red",
            Self::Water => "water",
            Self::Accumulation => "accumulation",
        }
    }

    fn stops(&self) -> &'static [ColorStop] {
        match self {
            Self::Viridis => VIRIDIS_STOPS,
            Self::Terrain => TERRAIN_STOPS,
            Self::Grayscale => GRAYSCALE_STOPS,
            Self::Ndvi => NDVI_STOPS,
            Self::BlueWhiteRed => BLUE_WHITE_RED_STOPS,
            Self::Water => WATER_STOPS,
            Self::Accumulation => ACCUMULATION_STOPS,
        }
    }
}

impl fmt::Display for ColorMapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ColorMapId {
    type Err = ServeError;

    /// Case-insensitive; `-` and `_` are interchangeable.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|id| id.name() == wanted)
            .ok_or_else(|| ServeError::UnknownColormap(s.to_string()))
    }
}

// ─── Color stop definitions ───────────────────────────────────────────

const VIRIDIS_STOPS: &[ColorStop] = &[
    ColorStop::new(0.00, 68, 1, 84),
    ColorStop::new(0.25, 59, 82, 139),
    ColorStop::new(0.50, 33, 145, 140),
    ColorStop::new(0.75, 94, 201, 98),
    ColorStop::new(1.00, 253, 231, 37),
];

const TERRAIN_STOPS: &[ColorStop] = &[
    ColorStop::new(0.00, 34, 139, 34),
    ColorStop::new(0.25, 144, 190, 60),
    ColorStop::new(0.50, 220, 200, 80),
    ColorStop::new(0.75, 180, 120, 60),
    ColorStop::new(1.00, 255, 255, 255),
];

const GRAYSCALE_STOPS: &[ColorStop] = &[
    ColorStop::new(0.0, 0, 0, 0),
    ColorStop::new(1.0, 255, 255, 255),
];

const NDVI_STOPS: &[ColorStop] = &[
    ColorStop::new(0.0, 120, 70, 20),
    ColorStop::new(0.3, 200, 170, 60),
    ColorStop::new(0.5, 240, 230, 100),
    ColorStop::new(0.7, 100, 180, 50),
    ColorStop::new(1.0, 10, 100, 20),
];

const BLUE_WHITE_RED_STOPS: &[ColorStop] = &[
    ColorStop::new(0.00, 33, 102, 172),
    ColorStop::new(0.25, 103, 169, 207),
    ColorStop::new(0.50, 247, 247, 247),
    ColorStop::new(0.75, 239, 138, 98),
    ColorStop::new(1.00, 178, 24, 43),
];

const WATER_STOPS: &[ColorStop] = &[
    ColorStop::new(0.00, 240, 249, 255),
    ColorStop::new(0.25, 186, 228, 250),
    ColorStop::new(0.50, 80, 180, 230),
    ColorStop::new(0.75, 30, 120, 200),
    ColorStop::new(1.00, 8, 48, 107),
];

const ACCUMULATION_STOPS: &[ColorStop] = &[
    ColorStop::new(0.00, 255, 255, 212),
    ColorStop::new(0.25, 254, 217, 142),
    ColorStop::new(0.50, 254, 153, 41),
    ColorStop::new(0.75, 204, 76, 2),
    ColorStop::new(1.00, 102, 37, 6),
];

// ─── Interpolation ────────────────────────────────────────────────────

fn lerp(a: u8, b: u8, t: f64) -> u8 {
    (f64::from(a) + (f64::from(b) - f64::from(a)) * t).round() as u8
}

fn multi_stop(stops: &[ColorStop], t: f64) -> [u8; 3] {
    let (first, last) = (stops[0], stops[stops.len() - 1]);
    if t <= first.t {
        return first.rgb;
    }
    for pair in stops.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if t <= hi.t {
            let ratio = (t - lo.t) / (hi.t - lo.t);
            return [
                lerp(lo.rgb[0], hi.rgb[0], ratio),
                lerp(lo.rgb[1], hi.rgb[1], ratio),
                lerp(lo.rgb[2], hi.rgb[2], ratio),
            ];
        }
    }
    last.rgb
}

/// 256-entry lookup table: index `i` is the ramp evaluated at `i / 255`.
#[derive(Clone, PartialEq, Eq)]
pub struct ColorMap {
    id: ColorMapId,
    table: [[u8; 4]; 256],
}

impl fmt::Debug for ColorMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColorMap").field("id", &self.id).finish_non_exhaustive()
    }
}

impl ColorMap {
    #[must_use]
    pub fn new(id: ColorMapId) -> Self {
        let stops = id.stops();
        let mut table = [[0u8; 4]; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let [r, g, b] = multi_stop(stops, i as f64 / 255.0);
            *entry = [r, g, b, 255];
        }
        Self { id, table }
    }

    #[inline]
    #[must_use]
    pub fn lookup(&self, index: u8) -> [u8; 4] {
        self.table[index as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("viridis".parse::<ColorMapId>().unwrap(), ColorMapId::Viridis);
        assert_eq!("Terrain".parse::<ColorMapId>().unwrap(), ColorMapId::Terrain);
        assert_eq!("blue-white-red".parse::<ColorMapId>().unwrap(), ColorMapId::BlueWhiteRed);
        assert!(matches!(
            "rainbow".parse::<ColorMapId>(),
            Err(ServeError::UnknownColormap(name)) if name == "rainbow"
        ));
    }

    #[test]
    fn test_names_round_trip() {
        for &id in ColorMapId::ALL {
            assert_eq!(id.name().parse::<ColorMapId>().unwrap(), id);
        }
    }

    #[test]
    fn test_table_endpoints() {
        let terrain = ColorMap::new(ColorMapId::Terrain);
        assert_eq!(terrain.lookup(0), [34, 139, 34, 255]);
        assert_eq!(terrain.lookup(255), [255, 255, 255, 255]);

        let viridis = ColorMap::new(ColorMapId::Viridis);
        assert_eq!(viridis.lookup(0), [68, 1, 84, 255]);
        assert_eq!(viridis.lookup(255), [253, 231, 37, 255]);
    }

    #[test]
    fn test_grayscale_is_identity_ramp() {
        let gray = ColorMap::new(ColorMapId::Grayscale);
        for i in [0u8, 1, 77, 128, 254, 255] {
            assert_eq!(gray.lookup(i), [i, i, i, 255]);
        }
    }

    #[test]
    fn test_all_entries_opaque() {
        for &id in ColorMapId::ALL {
            let map = ColorMap::new(id);
            assert!((0..=255u8).all(|i| map.lookup(i)[3] == 255), "{id}");
        }
    }
}
