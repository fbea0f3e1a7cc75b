//! Spatial post-processing of classified flag rasters: coastline refinement
//! and cloud buffer dilation.
//!
//! Runs as a separate pass over a fully classified raster. Each output tile
//! reads a halo-extended window of the source flags, so tiles are
//! independent and can be processed in any order.

use crate::core::flags::{CloudFlags, Landsat8Flags};
use crate::types::{ClassifError, ClassifResult, FlagImage, Rect, Sensor};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

/// Water fractions above this are no-data
const WATER_FRACTION_MAX: u8 = 100;

/// How the scene is geolocated, which decides how a coastline shows up in
/// the water fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GeoCodingKind {
    /// Per-pixel geolocation: the water fraction is 0 or 100 only
    Pixel,
    /// Tie-point or map geolocation: mixed pixels carry fractional values
    TiePoint,
}

impl GeoCodingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoCodingKind::Pixel => "pixel",
            GeoCodingKind::TiePoint => "tie_point",
        }
    }
}

impl std::str::FromStr for GeoCodingKind {
    type Err = ClassifError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pixel" => Ok(GeoCodingKind::Pixel),
            "tie_point" | "tiepoint" | "map" => Ok(GeoCodingKind::TiePoint),
            other => Err(ClassifError::Config(format!("Unknown geocoding kind '{}'", other))),
        }
    }
}

impl TryFrom<String> for GeoCodingKind {
    type Error = ClassifError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GeoCodingKind> for String {
    fn from(kind: GeoCodingKind) -> Self {
        kind.as_str().to_string()
    }
}

/// A cloud bit and the bit its dilation is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloudBufferPair {
    pub cloud: u32,
    pub buffer: u32,
}

/// Landsat-8 test bits with their buffer bits
pub const LANDSAT8_BUFFER_PAIRS: [CloudBufferPair; 5] = [
    CloudBufferPair { cloud: Landsat8Flags::CLOUD_SHIMEZ, buffer: Landsat8Flags::CLOUD_SHIMEZ_BUFFER },
    CloudBufferPair { cloud: Landsat8Flags::CLOUD_HOT, buffer: Landsat8Flags::CLOUD_HOT_BUFFER },
    CloudBufferPair { cloud: Landsat8Flags::CLOUD_OTSU, buffer: Landsat8Flags::CLOUD_OTSU_BUFFER },
    CloudBufferPair { cloud: Landsat8Flags::CLOUD_CLOST, buffer: Landsat8Flags::CLOUD_CLOST_BUFFER },
    CloudBufferPair { cloud: Landsat8Flags::CLOUD_SURE, buffer: Landsat8Flags::CLOUD_BUFFER },
];

/// MERIS decision-table cloud bit with its buffer bit
pub const MERIS_BUFFER_PAIRS: [CloudBufferPair; 1] = [CloudBufferPair {
    cloud: CloudFlags::CLOUD,
    buffer: CloudFlags::CLOUD_BUFFER,
}];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessParams {
    pub compute_cloud_buffer: bool,
    /// Chebyshev radius of the buffer in pixels
    pub cloud_buffer_width: usize,
    pub refine_coastlines: bool,
    pub geocoding: GeoCodingKind,
    /// Fraction of the 3x3 window that must be cloudy for a coastal cloud
    /// pixel to be kept
    pub surrounded_fraction: f64,
    /// Halo read around each tile
    pub halo: usize,
    pub tile_size: usize,
}

impl Default for PostProcessParams {
    fn default() -> Self {
        Self {
            compute_cloud_buffer: true,
            cloud_buffer_width: 2,
            refine_coastlines: false,
            geocoding: GeoCodingKind::Pixel,
            surrounded_fraction: 0.7,
            halo: 64,
            tile_size: 512,
        }
    }
}

/// Pads rectangles by a fixed halo, clipped to the scene
#[derive(Debug, Clone, Copy)]
pub struct RectangleExtender {
    bounds: Rect,
    halo_x: usize,
    halo_y: usize,
}

impl RectangleExtender {
    pub fn new(bounds: Rect, halo_x: usize, halo_y: usize) -> Self {
        Self { bounds, halo_x, halo_y }
    }

    pub fn extend(&self, rect: &Rect) -> Rect {
        let x0 = rect.x.saturating_sub(self.halo_x);
        let y0 = rect.y.saturating_sub(self.halo_y);
        let x1 = rect.x_end() + self.halo_x;
        let y1 = rect.y_end() + self.halo_y;
        Rect::new(x0, y0, x1 - x0, y1 - y0).intersection(&self.bounds)
    }
}

/// Inclusive square window of the given radius around (x, y), clipped to `rect`
fn window(x: usize, y: usize, radius: usize, rect: &Rect) -> (std::ops::RangeInclusive<usize>, std::ops::RangeInclusive<usize>) {
    let x0 = x.saturating_sub(radius).max(rect.x);
    let y0 = y.saturating_sub(radius).max(rect.y);
    let x1 = (x + radius).min(rect.x_end() - 1);
    let y1 = (y + radius).min(rect.y_end() - 1);
    (x0..=x1, y0..=y1)
}

fn has_bit(word: u32, bit: u32) -> bool {
    word & (1 << bit) != 0
}

pub struct PostProcessor {
    params: PostProcessParams,
    pairs: Vec<CloudBufferPair>,
    /// The flag word carries a snow/ice bit
    clears_snow: bool,
    /// Pixels with this bit pass through untouched
    invalid_bit: Option<u32>,
}

impl PostProcessor {
    /// Post-processor for the Landsat-8 flag layout
    pub fn new() -> Self {
        Self::with_params(PostProcessParams::default())
    }

    pub fn with_params(params: PostProcessParams) -> Self {
        Self {
            params,
            pairs: LANDSAT8_BUFFER_PAIRS.to_vec(),
            clears_snow: true,
            invalid_bit: Some(Landsat8Flags::INVALID),
        }
    }

    /// Post-processor buffering an arbitrary set of cloud bits. Snow/ice is
    /// left alone; coastline refinement writes Landsat-8 bits and is only
    /// meaningful with that layout.
    pub fn with_pairs(params: PostProcessParams, pairs: Vec<CloudBufferPair>) -> Self {
        Self {
            params,
            pairs,
            clears_snow: false,
            invalid_bit: None,
        }
    }

    /// Cloud buffer on the MERIS cloud word. Coastline refinement is off.
    pub fn for_meris(params: PostProcessParams) -> Self {
        let params = PostProcessParams {
            refine_coastlines: false,
            ..params
        };
        Self::with_pairs(params, MERIS_BUFFER_PAIRS.to_vec())
    }

    /// Post-processor for the given sensor's classification flag layout
    pub fn for_sensor(sensor: Sensor, params: PostProcessParams) -> Self {
        match sensor {
            Sensor::Meris => Self::for_meris(params),
            Sensor::Landsat8 => Self::with_params(params),
        }
    }

    pub fn params(&self) -> &PostProcessParams {
        &self.params
    }

    /// Mixed land/water pixel. Only meaningful with fractional geolocation.
    pub fn is_coastline_pixel(&self, water_fraction: &Array2<u8>, x: usize, y: usize) -> bool {
        let wf = water_fraction[[y, x]];
        wf <= WATER_FRACTION_MAX && wf > 0 && wf < WATER_FRACTION_MAX
    }

    /// A land/water transition lies in the 3x3 window around (x, y)
    pub fn is_near_coastline(&self, water_fraction: &Array2<u8>, x: usize, y: usize, rect: &Rect) -> bool {
        let center = water_fraction[[y, x]];
        let (xs, ys) = window(x, y, 1, rect);
        for j in ys {
            for i in xs.clone() {
                let near = match self.params.geocoding {
                    GeoCodingKind::Pixel => water_fraction[[j, i]] != center,
                    GeoCodingKind::TiePoint => self.is_coastline_pixel(water_fraction, i, j),
                };
                if near {
                    return true;
                }
            }
        }
        false
    }

    /// Enough of the 3x3 window is flagged with `bit`
    pub fn is_pixel_surrounded(&self, flags: &FlagImage, x: usize, y: usize, bit: u32, rect: &Rect) -> bool {
        let (xs, ys) = window(x, y, 1, rect);
        let mut count = 0usize;
        for j in ys {
            for i in xs.clone() {
                if has_bit(flags[[j, i]], bit) {
                    count += 1;
                }
            }
        }
        count as f64 / 9.0 >= self.params.surrounded_fraction
    }

    /// A coastal cloud pixel survives when surrounded by cloud or attached to
    /// a cloudy pixel away from the coast
    fn keeps_coastal_cloud(&self, flags: &FlagImage, water_fraction: &Array2<u8>, x: usize, y: usize, bit: u32, rect: &Rect) -> bool {
        if self.is_pixel_surrounded(flags, x, y, bit, rect) {
            return true;
        }
        let (xs, ys) = window(x, y, 1, rect);
        for j in ys {
            for i in xs.clone() {
                if has_bit(flags[[j, i]], bit) && !self.is_near_coastline(water_fraction, i, j, rect) {
                    return true;
                }
            }
        }
        false
    }

    /// Flags of one pixel after coastline refinement, before buffering
    fn refine_pixel(&self, source: &FlagImage, water_fraction: Option<&Array2<u8>>, x: usize, y: usize, rect: &Rect) -> u32 {
        if self.is_invalid(source[[y, x]]) {
            return source[[y, x]];
        }
        let mut flags = Landsat8Flags(source[[y, x]]);
        let coastal =
            water_fraction.filter(|wf| self.params.refine_coastlines && self.is_near_coastline(wf, x, y, rect));
        if coastal.is_some() {
            flags.set(Landsat8Flags::COASTLINE, true);
            flags.set(Landsat8Flags::SNOW_ICE, false);
        }

        for pair in &self.pairs {
            if let Some(wf) = coastal {
                if has_bit(source[[y, x]], pair.cloud) && !self.keeps_coastal_cloud(source, wf, x, y, pair.cloud, rect) {
                    flags.set(Landsat8Flags::CLOUD_SHIMEZ, false);
                    flags.set(Landsat8Flags::CLOUD_SURE, false);
                    flags.set(Landsat8Flags::CLOUD_AMBIGUOUS, false);
                }
            }
            if self.clears_snow && flags.contains(pair.cloud) {
                flags.set(Landsat8Flags::SNOW_ICE, false);
            }
        }
        flags.bits()
    }

    /// Extra rows/columns a tile must read so that its output does not
    /// depend on the tiling
    pub fn required_halo(&self) -> usize {
        let buffer = if self.params.compute_cloud_buffer {
            self.params.cloud_buffer_width
        } else {
            0
        };
        // Refinement looks at neighbours of neighbours
        let refinement = if self.params.refine_coastlines { 2 } else { 0 };
        self.params.halo.max(buffer + refinement)
    }

    /// Post-process one target rectangle. Returns the tile's flags.
    pub fn process_tile(&self, source: &FlagImage, water_fraction: Option<&Array2<u8>>, target: &Rect) -> FlagImage {
        let bounds = Rect::of_shape(source.dim());
        let halo = self.required_halo();
        let extended = RectangleExtender::new(bounds, halo, halo).extend(target);

        // Refined flags over the part of the halo the buffer can reach
        let reach = if self.params.compute_cloud_buffer {
            self.params.cloud_buffer_width
        } else {
            0
        };
        let refined_rect = RectangleExtender::new(bounds, reach, reach).extend(target);
        let mut refined = FlagImage::zeros((refined_rect.height, refined_rect.width));
        for y in refined_rect.y..refined_rect.y_end() {
            for x in refined_rect.x..refined_rect.x_end() {
                refined[[y - refined_rect.y, x - refined_rect.x]] = self.refine_pixel(source, water_fraction, x, y, &extended);
            }
        }

        let mut tile = FlagImage::zeros((target.height, target.width));
        for y in target.y..target.y_end() {
            for x in target.x..target.x_end() {
                let mut word = refined[[y - refined_rect.y, x - refined_rect.x]];
                if self.params.compute_cloud_buffer && !self.is_invalid(word) {
                    for pair in &self.pairs {
                        if !has_bit(word, pair.cloud) && self.within_buffer(&refined, &refined_rect, x, y, pair.cloud) {
                            word |= 1 << pair.buffer;
                        }
                    }
                }
                tile[[y - target.y, x - target.x]] = word;
            }
        }
        tile
    }

    fn is_invalid(&self, word: u32) -> bool {
        self.invalid_bit.map_or(false, |bit| has_bit(word, bit))
    }

    /// Any pixel flagged with `bit` lies within the buffer radius
    fn within_buffer(&self, refined: &FlagImage, refined_rect: &Rect, x: usize, y: usize, bit: u32) -> bool {
        let (xs, ys) = window(x, y, self.params.cloud_buffer_width, refined_rect);
        for j in ys {
            for i in xs.clone() {
                if has_bit(refined[[j - refined_rect.y, i - refined_rect.x]], bit) {
                    return true;
                }
            }
        }
        false
    }

    fn check_inputs(&self, source: &FlagImage, water_fraction: Option<&Array2<u8>>) -> ClassifResult<()> {
        if let Some(wf) = water_fraction {
            if wf.dim() != source.dim() {
                return Err(ClassifError::InvalidFormat(format!(
                    "Water fraction raster is {:?}, flag raster is {:?}",
                    wf.dim(),
                    source.dim()
                )));
            }
        }
        if self.params.tile_size == 0 {
            return Err(ClassifError::Config("Post-processing tile size must be positive".to_string()));
        }
        Ok(())
    }

    fn nothing_to_do(&self) -> bool {
        !self.params.compute_cloud_buffer && !self.params.refine_coastlines
    }

    /// Post-process a whole flag raster tile by tile
    pub fn post_process(&self, source: &FlagImage, water_fraction: Option<&Array2<u8>>) -> ClassifResult<FlagImage> {
        self.check_inputs(source, water_fraction)?;
        if self.nothing_to_do() {
            return Ok(source.clone());
        }
        let (rows, cols) = source.dim();
        log::info!("Post-processing {}x{} flag raster", rows, cols);
        let start = std::time::Instant::now();

        let mut output = FlagImage::zeros((rows, cols));
        let size = self.params.tile_size;
        for target in Rect::of_shape((rows, cols)).blocks(size, size) {
            let tile = self.process_tile(source, water_fraction, &target);
            output
                .slice_mut(s![target.y..target.y_end(), target.x..target.x_end()])
                .assign(&tile);
        }

        log::info!("Post-processing finished in {:.2}s", start.elapsed().as_secs_f64());
        Ok(output)
    }

    /// Post-process tiles in parallel; each tile reads only the source
    #[cfg(feature = "parallel")]
    pub fn post_process_parallel(&self, source: &FlagImage, water_fraction: Option<&Array2<u8>>) -> ClassifResult<FlagImage> {
        use rayon::prelude::*;

        self.check_inputs(source, water_fraction)?;
        if self.nothing_to_do() {
            return Ok(source.clone());
        }
        let (rows, cols) = source.dim();
        log::info!("Post-processing {}x{} flag raster in parallel", rows, cols);

        let size = self.params.tile_size;
        let tiles: Vec<(Rect, FlagImage)> = Rect::of_shape((rows, cols))
            .blocks(size, size)
            .into_par_iter()
            .map(|target| {
                let tile = self.process_tile(source, water_fraction, &target);
                (target, tile)
            })
            .collect();

        let mut output = FlagImage::zeros((rows, cols));
        for (target, tile) in tiles {
            output
                .slice_mut(s![target.y..target.y_end(), target.x..target.x_end()])
                .assign(&tile);
        }
        Ok(output)
    }

    #[cfg(not(feature = "parallel"))]
    pub fn post_process_parallel(&self, source: &FlagImage, water_fraction: Option<&Array2<u8>>) -> ClassifResult<FlagImage> {
        self.post_process(source, water_fraction)
    }
}

impl Default for PostProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloud_at(rows: usize, cols: usize, pixels: &[(usize, usize)]) -> FlagImage {
        let mut flags = FlagImage::zeros((rows, cols));
        for &(x, y) in pixels {
            flags[[y, x]] = 1 << Landsat8Flags::CLOUD_SURE;
        }
        flags
    }

    #[test]
    fn test_rectangle_extender_clips_to_scene() {
        let ext = RectangleExtender::new(Rect::new(0, 0, 100, 50), 8, 8);
        assert_eq!(ext.extend(&Rect::new(0, 0, 10, 10)), Rect::new(0, 0, 18, 18));
        assert_eq!(ext.extend(&Rect::new(40, 20, 10, 10)), Rect::new(32, 12, 26, 26));
        assert_eq!(ext.extend(&Rect::new(95, 45, 5, 5)), Rect::new(87, 37, 13, 13));
    }

    #[test]
    fn test_single_cloud_buffer_square() {
        let source = cloud_at(7, 7, &[(3, 3)]);
        let out = PostProcessor::new().post_process(&source, None).unwrap();
        for y in 0..7 {
            for x in 0..7 {
                let f = Landsat8Flags(out[[y, x]]);
                let d = (x as i64 - 3).abs().max((y as i64 - 3).abs());
                assert_eq!(f.contains(Landsat8Flags::CLOUD_BUFFER), d >= 1 && d <= 2, "({}, {})", x, y);
            }
        }
        assert!(Landsat8Flags(out[[3, 3]]).contains(Landsat8Flags::CLOUD_SURE));
    }

    #[test]
    fn test_buffer_independent_of_tiling() {
        let source = cloud_at(20, 20, &[(4, 4), (5, 4), (15, 9), (9, 10)]);
        let whole = PostProcessor::new().post_process(&source, None).unwrap();
        let tiled = PostProcessor::with_params(PostProcessParams {
            tile_size: 3,
            halo: 0,
            ..Default::default()
        })
        .post_process(&source, None)
        .unwrap();
        assert_eq!(whole, tiled);
    }

    #[test]
    fn test_cloud_clears_snow() {
        let mut source = cloud_at(3, 3, &[(1, 1)]);
        source[[1, 1]] |= 1 << Landsat8Flags::SNOW_ICE;
        source[[0, 0]] |= 1 << Landsat8Flags::SNOW_ICE;
        let out = PostProcessor::new().post_process(&source, None).unwrap();
        assert!(!Landsat8Flags(out[[1, 1]]).contains(Landsat8Flags::SNOW_ICE));
        assert!(Landsat8Flags(out[[0, 0]]).contains(Landsat8Flags::SNOW_ICE));
    }

    #[test]
    fn test_near_coastline_by_geocoding() {
        let wf = Array2::from_shape_vec((1, 4), vec![0u8, 0, 50, 100]).unwrap();
        let rect = Rect::of_shape(wf.dim());
        let pixel = PostProcessor::new();
        assert!(!pixel.is_near_coastline(&wf, 0, 0, &rect));
        assert!(pixel.is_near_coastline(&wf, 1, 0, &rect));

        let tie_point = PostProcessor::with_params(PostProcessParams {
            geocoding: GeoCodingKind::TiePoint,
            ..Default::default()
        });
        assert!(tie_point.is_near_coastline(&wf, 3, 0, &rect));
        assert!(!tie_point.is_near_coastline(&wf, 0, 0, &rect));
        // No-data is not a coastline
        let nodata = Array2::from_shape_vec((1, 2), vec![0u8, 200]).unwrap();
        assert!(!tie_point.is_near_coastline(&nodata, 0, 0, &Rect::of_shape(nodata.dim())));
    }

    #[test]
    fn test_surrounded_needs_most_of_window() {
        let flags = cloud_at(3, 3, &[(0, 0), (1, 0), (2, 0), (0, 1), (1, 1), (2, 1)]);
        let rect = Rect::of_shape(flags.dim());
        let p = PostProcessor::new();
        assert!(!p.is_pixel_surrounded(&flags, 1, 1, Landsat8Flags::CLOUD_SURE, &rect));
        let flags = cloud_at(3, 3, &[(0, 0), (1, 0), (2, 0), (0, 1), (1, 1), (2, 1), (0, 2)]);
        assert!(p.is_pixel_surrounded(&flags, 1, 1, Landsat8Flags::CLOUD_SURE, &rect));
    }

    #[test]
    fn test_disabled_is_passthrough() {
        let source = cloud_at(4, 4, &[(1, 1)]);
        let p = PostProcessor::with_params(PostProcessParams {
            compute_cloud_buffer: false,
            ..Default::default()
        });
        assert_eq!(p.post_process(&source, None).unwrap(), source);
    }

    #[test]
    fn test_meris_layout_buffer() {
        let mut source = FlagImage::zeros((5, 5));
        source[[2, 2]] = 1 << CloudFlags::CLOUD;
        let out = PostProcessor::for_sensor(Sensor::Meris, PostProcessParams {
            cloud_buffer_width: 1,
            ..Default::default()
        })
        .post_process(&source, None)
        .unwrap();
        assert!(CloudFlags(out[[1, 1]]).contains(CloudFlags::CLOUD_BUFFER));
        assert!(!CloudFlags(out[[0, 0]]).contains(CloudFlags::CLOUD_BUFFER));
        assert_eq!(out[[2, 2]], 1 << CloudFlags::CLOUD);
    }

    #[test]
    fn test_invalid_pixel_passes_through() {
        // Cloud inland, coast between x = 5 and x = 6
        let mut source = cloud_at(8, 8, &[(1, 1)]);
        source[[1, 2]] = 1 << Landsat8Flags::INVALID;
        source[[5, 5]] = 1 << Landsat8Flags::INVALID;
        let wf = Array2::from_shape_fn((8, 8), |(_, x)| if x < 6 { 0u8 } else { 100 });
        let p = PostProcessor::for_sensor(Sensor::Landsat8, PostProcessParams {
            refine_coastlines: true,
            ..Default::default()
        });
        let out = p.post_process(&source, Some(&wf)).unwrap();
        assert_eq!(out[[1, 2]], 1 << Landsat8Flags::INVALID);
        assert_eq!(out[[5, 5]], 1 << Landsat8Flags::INVALID);
        assert!(Landsat8Flags(out[[1, 3]]).contains(Landsat8Flags::CLOUD_BUFFER));
        assert!(Landsat8Flags(out[[4, 5]]).contains(Landsat8Flags::COASTLINE));
    }

    #[test]
    fn test_mismatched_water_fraction_rejected() {
        let source = FlagImage::zeros((4, 4));
        let wf = Array2::<u8>::zeros((3, 4));
        assert!(PostProcessor::new().post_process(&source, Some(&wf)).is_err());
    }
}
