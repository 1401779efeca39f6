//! GeoTIFF fixtures for unit tests, written with `tiff::encoder`.

use std::io::Cursor;
use std::path::Path;

use tiff::encoder::colortype::{Gray32, Gray32Float, Gray64Float, RGB32Float};
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

const GEOTIFF_MODELPIXELSCALE: u16 = 33550;
const GEOTIFF_MODELTIEPOINT: u16 = 33922;
const GEOTIFF_GEOKEYDIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;
const NEW_SUBFILE_TYPE: u16 = 254;

/// Sample format written for single-band fixtures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SampleType {
    F32,
    F64,
    U32,
}

/// Builder for a small north-up GeoTIFF, optionally with overview IFDs.
#[derive(Debug, Clone)]
pub(crate) struct GeoTiffFixture {
    width: u32,
    height: u32,
    bands: usize,
    sample_type: SampleType,
    pixels: Vec<f64>,
    origin: (f64, f64),
    pixel_size: f64,
    crs: Option<u32>,
    georeferenced: bool,
    nodata: Option<String>,
    overviews: Vec<u32>,
    rows_per_strip: Option<u32>,
}

impl GeoTiffFixture {
    /// Value written at `(x, y)` by [`GeoTiffFixture::gradient`].
    pub(crate) fn gradient_value(x: u32, y: u32, width: u32) -> f32 {
        ((y * width + x) % 251) as f32
    }

    /// Single band, values from [`GeoTiffFixture::gradient_value`]; EPSG:3857
    /// with the top-left corner at the origin and 1 m pixels.
    pub(crate) fn gradient(width: u32, height: u32) -> Self {
        let pixels = (0..height)
            .flat_map(|y| (0..width).map(move |x| f64::from(Self::gradient_value(x, y, width))))
            .collect();
        Self::with_pixels(width, height, 1, pixels)
    }

    /// Single band filled with one value.
    pub(crate) fn filled(width: u32, height: u32, value: f64) -> Self {
        Self::with_pixels(width, height, 1, vec![value; (width * height) as usize])
    }

    /// Three bands, each pixel `[r, g, b]`.
    pub(crate) fn rgb(width: u32, height: u32, rgb: [f32; 3]) -> Self {
        let pixels = (0..width * height).flat_map(|_| rgb.map(f64::from)).collect();
        Self::with_pixels(width, height, 3, pixels)
    }

    fn with_pixels(width: u32, height: u32, bands: usize, pixels: Vec<f64>) -> Self {
        assert_eq!(pixels.len(), (width * height) as usize * bands);
        Self {
            width,
            height,
            bands,
            sample_type: SampleType::F32,
            pixels,
            origin: (0.0, 0.0),
            pixel_size: 1.0,
            crs: Some(3857),
            georeferenced: true,
            nodata: None,
            overviews: Vec::new(),
            rows_per_strip: None,
        }
    }

    /// Overwrite one pixel of a single-band fixture.
    pub(crate) fn set_pixel(mut self, x: u32, y: u32, value: f64) -> Self {
        self.pixels[(y * self.width + x) as usize * self.bands] = value;
        self
    }

    /// Write single-band samples as `sample_type` instead of f32.
    pub(crate) fn sample_type(mut self, sample_type: SampleType) -> Self {
        self.sample_type = sample_type;
        self
    }

    pub(crate) fn origin(mut self, x: f64, y: f64) -> Self {
        self.origin = (x, y);
        self
    }

    pub(crate) fn pixel_size(mut self, size: f64) -> Self {
        self.pixel_size = size;
        self
    }

    pub(crate) fn crs(mut self, epsg: u32) -> Self {
        self.crs = Some(epsg);
        self
    }

    pub(crate) fn without_crs(mut self) -> Self {
        self.crs = None;
        self
    }

    pub(crate) fn without_georeferencing(mut self) -> Self {
        self.georeferenced = false;
        self
    }

    pub(crate) fn nodata(mut self, value: &str) -> Self {
        self.nodata = Some(value.to_string());
        self
    }

    /// Decimation factors of the overview IFDs to append, e.g. `[2, 4]`.
    pub(crate) fn overviews(mut self, factors: &[u32]) -> Self {
        self.overviews = factors.to_vec();
        self
    }

    pub(crate) fn rows_per_strip(mut self, rows: u32) -> Self {
        self.rows_per_strip = Some(rows);
        self
    }

    /// Nearest-neighbour decimation of the pixels by `factor`.
    fn decimated(&self, factor: u32) -> (u32, u32, Vec<f64>) {
        let width = self.width.div_ceil(factor);
        let height = self.height.div_ceil(factor);
        let mut out = Vec::with_capacity((width * height) as usize * self.bands);
        for y in 0..height {
            for x in 0..width {
                let src = ((y * factor) * self.width + x * factor) as usize * self.bands;
                out.extend_from_slice(&self.pixels[src..src + self.bands]);
            }
        }
        (width, height, out)
    }

    fn geokeys(&self, epsg: u32) -> Vec<u16> {
        let geographic = epsg == 4326;
        let (model_type, crs_key) = if geographic { (2, 2048) } else { (1, 3072) };
        vec![
            1, 1, 0, 3,
            1024, 0, 1, model_type,
            1025, 0, 1, 1,
            crs_key, 0, 1, epsg as u16,
        ]
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut cursor).unwrap();
            let mut images = vec![(self.width, self.height, self.pixels.clone(), 1u32, false)];
            for &factor in &self.overviews {
                let (w, h, px) = self.decimated(factor);
                images.push((w, h, px, factor, true));
            }

            for (width, height, pixels, factor, is_overview) in images {
                macro_rules! write_as {
                    ($color:ty, $data:expr) => {{
                        let mut image = encoder.new_image::<$color>(width, height).unwrap();
                        self.write_tags(image.encoder(), factor, is_overview);
                        if let Some(rows) = self.rows_per_strip {
                            image.rows_per_strip(rows).unwrap();
                        }
                        image.write_data(&$data).unwrap();
                    }};
                }

                match (self.bands, self.sample_type) {
                    (1, SampleType::F32) => {
                        write_as!(Gray32Float, pixels.iter().map(|&v| v as f32).collect::<Vec<f32>>())
                    }
                    (1, SampleType::F64) => write_as!(Gray64Float, pixels),
                    (1, SampleType::U32) => {
                        write_as!(Gray32, pixels.iter().map(|&v| v as u32).collect::<Vec<u32>>())
                    }
                    (3, SampleType::F32) => {
                        write_as!(RGB32Float, pixels.iter().map(|&v| v as f32).collect::<Vec<f32>>())
                    }
                    (n, t) => panic!("fixtures support 1 band of any type or 3 f32 bands, got {n} x {t:?}"),
                }
            }
        }
        cursor.into_inner()
    }

    fn write_tags<W: std::io::Write + std::io::Seek, K: tiff::encoder::TiffKind>(
        &self,
        dir: &mut tiff::encoder::DirectoryEncoder<W, K>,
        factor: u32,
        is_overview: bool,
    ) {
        if is_overview {
            dir.write_tag(Tag::Unknown(NEW_SUBFILE_TYPE), 1u32).unwrap();
        }
        if self.georeferenced {
            let size = self.pixel_size * f64::from(factor);
            let pixel_scale = [size, size, 0.0];
            dir.write_tag(Tag::Unknown(GEOTIFF_MODELPIXELSCALE), pixel_scale.as_slice()).unwrap();
            let tiepoint = [0.0, 0.0, 0.0, self.origin.0, self.origin.1, 0.0];
            dir.write_tag(Tag::Unknown(GEOTIFF_MODELTIEPOINT), tiepoint.as_slice()).unwrap();
            if let Some(epsg) = self.crs {
                let keys = self.geokeys(epsg);
                dir.write_tag(Tag::Unknown(GEOTIFF_GEOKEYDIRECTORY), keys.as_slice()).unwrap();
            }
        }
        if let Some(nodata) = &self.nodata {
            dir.write_tag(Tag::Unknown(GDAL_NODATA), nodata.as_str()).unwrap();
        }
    }

    pub(crate) fn write_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, self.to_bytes()).unwrap();
    }
}
