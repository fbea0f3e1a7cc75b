use crate::core::flags::{CloudFlags, LandFlags, MerisL1Flags};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

/// Real-valued raster (rows x cols)
pub type RealImage = Array2<f32>;

/// Per-band raster stack (band x rows x cols)
pub type BandCube = Array3<f32>;

/// Packed flag raster (rows x cols)
pub type FlagImage = Array2<u32>;

/// Sentinel written to every reflectance of a skipped or invalid pixel
pub const BAD_VALUE: f32 = -1.0;

/// Number of MERIS spectral bands
pub const MERIS_NUM_BANDS: usize = 15;

/// Number of Landsat-8 spectral bands used for classification
pub const LANDSAT8_NUM_BANDS: usize = 11;

/// MERIS band indices, named by nominal centre wavelength
pub mod meris_band {
    pub const BB412: usize = 0;
    pub const BB442: usize = 1;
    pub const BB490: usize = 2;
    pub const BB510: usize = 3;
    pub const BB560: usize = 4;
    pub const BB620: usize = 5;
    pub const BB665: usize = 6;
    pub const BB681: usize = 7;
    pub const BB705: usize = 8;
    pub const BB753: usize = 9;
    pub const BB760: usize = 10;
    pub const BB775: usize = 11;
    pub const BB865: usize = 12;
    pub const BB890: usize = 13;
    pub const BB900: usize = 14;

    /// Nominal wavelengths in nm
    pub const WAVELENGTHS: [f64; super::MERIS_NUM_BANDS] = [
        412.5, 442.5, 490.0, 510.0, 560.0, 620.0, 665.0, 681.25, 708.75, 753.75, 760.625, 778.75,
        865.0, 885.0, 900.0,
    ];
}

/// Landsat-8 band indices in classification order
pub mod landsat8_band {
    pub const COASTAL_AEROSOL: usize = 0;
    pub const BLUE: usize = 1;
    pub const GREEN: usize = 2;
    pub const RED: usize = 3;
    pub const NIR: usize = 4;
    pub const SWIR_1: usize = 5;
    pub const SWIR_2: usize = 6;
    pub const PANCHROMATIC: usize = 7;
    pub const CIRRUS: usize = 8;
    pub const THERMAL_1: usize = 9;
    pub const THERMAL_2: usize = 10;

    /// Nominal wavelengths in nm, indexed like the constants above
    pub const WAVELENGTHS: [u32; super::LANDSAT8_NUM_BANDS] =
        [440, 480, 560, 655, 865, 1610, 2200, 590, 1370, 10895, 12005];

    /// Map a nominal wavelength (nm) to its band index
    pub fn index_of_wavelength(wavelength: u32) -> Option<usize> {
        WAVELENGTHS.iter().position(|&w| w == wavelength)
    }
}

/// Supported sensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sensor {
    Meris,
    Landsat8,
}

impl Sensor {
    pub fn num_bands(&self) -> usize {
        match self {
            Sensor::Meris => MERIS_NUM_BANDS,
            Sensor::Landsat8 => LANDSAT8_NUM_BANDS,
        }
    }
}

impl std::fmt::Display for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sensor::Meris => write!(f, "MERIS"),
            Sensor::Landsat8 => write!(f, "Landsat-8"),
        }
    }
}

/// MERIS product resolution, which fixes the detector count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MerisResolution {
    /// Reduced resolution (RR), 925 detectors
    Reduced,
    /// Full resolution (FR), 3700 detectors
    Full,
}

impl MerisResolution {
    pub fn detector_count(&self) -> usize {
        match self {
            MerisResolution::Reduced => 925,
            MerisResolution::Full => 3700,
        }
    }

    /// Parse a product type or resolution tag such as `MER_RR__1P` or `FR`
    pub fn from_product_type(product_type: &str) -> ClassifResult<Self> {
        let upper = product_type.to_uppercase();
        if upper.contains("RR") {
            Ok(MerisResolution::Reduced)
        } else if upper.contains("FR") {
            Ok(MerisResolution::Full)
        } else {
            Err(ClassifError::AuxData(format!(
                "Product type '{}' is neither reduced nor full resolution",
                product_type
            )))
        }
    }
}

/// Rectangle in scene pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle covering a whole raster of the given (rows, cols) shape
    pub fn of_shape(shape: (usize, usize)) -> Self {
        Self::new(0, 0, shape.1, shape.0)
    }

    pub fn x_end(&self) -> usize {
        self.x + self.width
    }

    pub fn y_end(&self) -> usize {
        self.y + self.height
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x as i64 && y >= self.y as i64 && x < self.x_end() as i64 && y < self.y_end() as i64
    }

    pub fn intersection(&self, other: &Rect) -> Rect {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.x_end().min(other.x_end());
        let y1 = self.y_end().min(other.y_end());
        if x1 <= x0 || y1 <= y0 {
            Rect::new(x0, y0, 0, 0)
        } else {
            Rect::new(x0, y0, x1 - x0, y1 - y0)
        }
    }

    /// Split into row-major sub-rectangles of at most `block_width` x `block_height`
    pub fn blocks(&self, block_width: usize, block_height: usize) -> Vec<Rect> {
        let bw = block_width.max(1);
        let bh = block_height.max(1);
        let mut blocks = Vec::new();
        for y in (self.y..self.y_end()).step_by(bh) {
            for x in (self.x..self.x_end()).step_by(bw) {
                let w = bw.min(self.x_end() - x);
                let h = bh.min(self.y_end() - y);
                blocks.push(Rect::new(x, y, w, h));
            }
        }
        blocks
    }
}

/// Per-pixel state carried through the MERIS pipeline.
///
/// Built fresh for every pixel; per-band arrays always hold
/// [`MERIS_NUM_BANDS`] entries.
#[derive(Debug, Clone, Default)]
pub struct PixelRecord {
    pub x: usize,
    pub y: usize,
    pub detector: usize,
    pub sza: f64,
    pub vza: f64,
    pub saa: f64,
    pub vaa: f64,
    pub ecmwf_pressure: f64,
    pub ozone: f64,
    pub wind_u: f64,
    pub wind_v: f64,
    pub altitude: f64,
    /// TOA radiance, used only for saturation tests (zero when unknown)
    pub radiance: [f64; MERIS_NUM_BANDS],
    pub rho_toa: [f64; MERIS_NUM_BANDS],
    pub rho_ng: [f64; MERIS_NUM_BANDS],
    pub brr: [f64; MERIS_NUM_BANDS],
    pub l1_flags: u32,
    pub cloud_flags: u32,
    pub land_flags: u32,
}

impl PixelRecord {
    /// Fill every corrected band with [`BAD_VALUE`]
    pub fn mark_bad(&mut self) {
        self.rho_ng = [BAD_VALUE as f64; MERIS_NUM_BANDS];
        self.brr = [BAD_VALUE as f64; MERIS_NUM_BANDS];
    }

    pub fn is_invalid(&self) -> bool {
        MerisL1Flags(self.l1_flags).contains(MerisL1Flags::INVALID)
    }

    /// Land according to the L1 flags
    pub fn is_l1_land(&self) -> bool {
        MerisL1Flags(self.l1_flags).contains(MerisL1Flags::LAND_OCEAN)
    }

    pub fn is_l1_bright(&self) -> bool {
        MerisL1Flags(self.l1_flags).contains(MerisL1Flags::BRIGHT)
    }

    pub fn is_cloud(&self) -> bool {
        CloudFlags(self.cloud_flags).contains(CloudFlags::CLOUD)
    }

    /// Land after land/water reclassification
    pub fn is_land_consolidated(&self) -> bool {
        LandFlags(self.land_flags).contains(LandFlags::LANDCONS)
    }
}

/// Error types for correction and classification
#[derive(Debug, thiserror::Error)]
pub enum ClassifError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Auxiliary data error: {0}")]
    AuxData(String),

    #[error("Invalid lookup table: {0}")]
    InvalidLut(String),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for correction and classification
pub type ClassifResult<T> = Result<T, ClassifError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_blocks_cover_area() {
        let rect = Rect::new(0, 0, 10, 7);
        let blocks = rect.blocks(4, 4);
        assert_eq!(blocks.len(), 6);
        let covered: usize = blocks.iter().map(|b| b.area()).sum();
        assert_eq!(covered, 70);
        assert_eq!(blocks[2], Rect::new(8, 0, 2, 4));
        assert_eq!(blocks[5], Rect::new(8, 4, 2, 3));
    }

    #[test]
    fn test_rect_intersection_and_contains() {
        let a = Rect::new(0, 0, 8, 8);
        let b = Rect::new(6, 6, 8, 8);
        assert_eq!(a.intersection(&b), Rect::new(6, 6, 2, 2));
        assert!(a.contains(7, 7));
        assert!(!a.contains(8, 0));
        assert!(!a.contains(-1, 0));
        assert!(a.intersection(&Rect::new(20, 20, 1, 1)).is_empty());
    }

    #[test]
    fn test_resolution_from_product_type() {
        assert_eq!(
            MerisResolution::from_product_type("MER_RR__1P").unwrap(),
            MerisResolution::Reduced
        );
        assert_eq!(MerisResolution::from_product_type("fr").unwrap().detector_count(), 3700);
        assert!(MerisResolution::from_product_type("OLI_TIRS").is_err());
    }

    #[test]
    fn test_pixel_record_flag_accessors() {
        let mut pixel = PixelRecord {
            l1_flags: 1 << MerisL1Flags::LAND_OCEAN,
            ..Default::default()
        };
        assert!(pixel.is_l1_land());
        assert!(!pixel.is_invalid());
        assert!(!pixel.is_cloud());

        pixel.mark_bad();
        assert!(pixel.rho_ng.iter().all(|&v| v == BAD_VALUE as f64));
    }

    #[test]
    fn test_landsat8_wavelength_map() {
        assert_eq!(landsat8_band::index_of_wavelength(865), Some(landsat8_band::NIR));
        assert_eq!(landsat8_band::index_of_wavelength(1610), Some(landsat8_band::SWIR_1));
        assert_eq!(landsat8_band::index_of_wavelength(999), None);
    }
}
