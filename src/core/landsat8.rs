//! Landsat-8 spectral and neural-network cloud classification.
//!
//! Each pixel is tested independently on TOA reflectance. The neural network
//! is an external scoring function reached through [`CloudNet`]; evaluators
//! keep internal state, so every worker thread builds its own from a
//! [`CloudNetFactory`].

use crate::core::flags::{Landsat8Flags, Landsat8QualityFlags};
use crate::types::{
    landsat8_band::{self, *},
    BandCube, ClassifError, ClassifResult, FlagImage, RealImage, LANDSAT8_NUM_BANDS,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Binarised OTSU values above this are cloud
const OTSU_CLOUD_LEVEL: f64 = 128.0;
/// Water fractions above this are no-data
const WATER_FRACTION_MAX: u8 = 100;

/// Cloud network evaluator
pub trait CloudNet: Send {
    /// Lower bound the network was trained with for input `index`
    fn input_minimum(&self, _index: usize) -> f64 {
        0.0
    }

    /// Score one input vector
    fn score(&mut self, input: &[f64]) -> f64;
}

/// Builds one evaluator per worker
pub type CloudNetFactory = Arc<dyn Fn() -> Box<dyn CloudNet> + Send + Sync>;

/// Which trained network is plugged in, which fixes its input layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NnSelector {
    All,
    Land,
    LandUseThermal,
    Water,
    WaterNotidal,
    WaterUseThermal,
    WaterNotidalUseThermal,
}

impl NnSelector {
    pub fn as_str(&self) -> &'static str {
        match self {
            NnSelector::All => "ALL",
            NnSelector::Land => "LAND",
            NnSelector::LandUseThermal => "LAND_USE_THERMAL",
            NnSelector::Water => "WATER",
            NnSelector::WaterNotidal => "WATER_NOTIDAL",
            NnSelector::WaterUseThermal => "WATER_USE_THERMAL",
            NnSelector::WaterNotidalUseThermal => "WATER_NOTIDAL_USE_THERMAL",
        }
    }

    pub fn uses_thermal(&self) -> bool {
        matches!(
            self,
            NnSelector::LandUseThermal | NnSelector::WaterUseThermal | NnSelector::WaterNotidalUseThermal
        )
    }

    /// Length of the network input vector
    pub fn input_len(&self) -> usize {
        if self.uses_thermal() {
            10
        } else {
            8
        }
    }
}

impl std::str::FromStr for NnSelector {
    type Err = ClassifError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        [
            NnSelector::All,
            NnSelector::Land,
            NnSelector::LandUseThermal,
            NnSelector::Water,
            NnSelector::WaterNotidal,
            NnSelector::WaterUseThermal,
            NnSelector::WaterNotidalUseThermal,
        ]
        .into_iter()
        .find(|selector| selector.as_str() == upper)
        .ok_or_else(|| ClassifError::Config(format!("Unknown network selector '{}'", s)))
    }
}

impl TryFrom<String> for NnSelector {
    type Error = ClassifError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NnSelector> for String {
    fn from(selector: NnSelector) -> Self {
        selector.as_str().to_string()
    }
}

/// Network score bins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NnCategory {
    Clear,
    Ambiguous,
    Cloud,
    SnowIce,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Landsat8Params {
    pub apply_shimez: bool,
    /// SHIMEZ ratio tolerance (A)
    pub shimez_diff_threshold: f64,
    /// SHIMEZ mean brightness (B)
    pub shimez_mean_threshold: f64,
    pub apply_hot: bool,
    pub hot_threshold: f64,
    pub apply_clost: bool,
    pub clost_threshold: f64,
    pub apply_otsu: bool,
    pub nn_selector: NnSelector,
    pub nn_ambiguous_lower: f64,
    pub nn_ambiguous_sure_separation: f64,
    pub nn_sure_snow_separation: f64,
    /// Brightness band wavelength over land (nm)
    pub brightness_band_land: u32,
    pub brightness_threshold_land: f64,
    pub brightness_band_1_water: u32,
    pub brightness_weight_1_water: f64,
    pub brightness_band_2_water: u32,
    pub brightness_weight_2_water: f64,
    pub brightness_threshold_water: f64,
    pub whiteness_band_1_land: u32,
    pub whiteness_band_2_land: u32,
    pub whiteness_threshold_land: f64,
    pub whiteness_band_1_water: u32,
    pub whiteness_band_2_water: u32,
    pub whiteness_threshold_water: f64,
    pub dark_glint_band_1: u32,
    pub dark_glint_threshold_1: f64,
    pub dark_glint_band_2: u32,
    pub dark_glint_threshold_2: f64,
}

impl Default for Landsat8Params {
    fn default() -> Self {
        Self {
            apply_shimez: true,
            shimez_diff_threshold: 0.1,
            shimez_mean_threshold: 0.25,
            apply_hot: false,
            hot_threshold: 0.1,
            apply_clost: false,
            clost_threshold: 1.0e-5,
            apply_otsu: false,
            nn_selector: NnSelector::All,
            nn_ambiguous_lower: 1.95,
            nn_ambiguous_sure_separation: 3.45,
            nn_sure_snow_separation: 4.3,
            brightness_band_land: 480,
            brightness_threshold_land: 0.5,
            brightness_band_1_water: 655,
            brightness_weight_1_water: 1.0,
            brightness_band_2_water: 865,
            brightness_weight_2_water: 1.0,
            brightness_threshold_water: 0.5,
            whiteness_band_1_land: 655,
            whiteness_band_2_land: 865,
            whiteness_threshold_land: 2.0,
            whiteness_band_1_water: 655,
            whiteness_band_2_water: 865,
            whiteness_threshold_water: 2.0,
            dark_glint_band_1: 865,
            dark_glint_threshold_1: 0.15,
            dark_glint_band_2: 1610,
            dark_glint_threshold_2: 0.15,
        }
    }
}

/// Wavelength parameters resolved to band indices
#[derive(Debug, Clone, Copy)]
struct BandIndices {
    brightness_land: usize,
    brightness_water: [usize; 2],
    whiteness_land: [usize; 2],
    whiteness_water: [usize; 2],
    dark_glint: [usize; 2],
}

fn band_of(wavelength: u32) -> ClassifResult<usize> {
    landsat8_band::index_of_wavelength(wavelength)
        .ok_or_else(|| ClassifError::Config(format!("No Landsat-8 band at {} nm", wavelength)))
}

impl BandIndices {
    fn resolve(p: &Landsat8Params) -> ClassifResult<Self> {
        Ok(Self {
            brightness_land: band_of(p.brightness_band_land)?,
            brightness_water: [band_of(p.brightness_band_1_water)?, band_of(p.brightness_band_2_water)?],
            whiteness_land: [band_of(p.whiteness_band_1_land)?, band_of(p.whiteness_band_2_land)?],
            whiteness_water: [band_of(p.whiteness_band_1_water)?, band_of(p.whiteness_band_2_water)?],
            dark_glint: [band_of(p.dark_glint_band_1)?, band_of(p.dark_glint_band_2)?],
        })
    }
}

/// Per-pixel inputs besides the reflectances
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Landsat8Ancillary {
    pub invalid: bool,
    pub land: bool,
    /// Externally computed CLOST value (0 when absent)
    pub clost: f64,
    /// Binarised OTSU value (0 when absent)
    pub otsu: f64,
}

/// Result of the two dark-glint diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DarkGlintTests {
    pub test_1: bool,
    pub test_2: bool,
}

/// Input scene. Reflectance is (band, rows, cols).
#[derive(Debug, Clone)]
pub struct Landsat8Scene {
    pub reflectance: BandCube,
    /// L1 quality word per pixel
    pub quality: FlagImage,
    /// Water fraction in percent, > 100 is no-data
    pub water_fraction: Option<Array2<u8>>,
    pub clost: Option<RealImage>,
    pub otsu: Option<RealImage>,
}

impl Landsat8Scene {
    pub fn dim(&self) -> (usize, usize) {
        self.quality.dim()
    }

    pub fn validate(&self) -> ClassifResult<()> {
        let (bands, rows, cols) = self.reflectance.dim();
        if bands != LANDSAT8_NUM_BANDS {
            return Err(ClassifError::InvalidFormat(format!(
                "Expected {} Landsat-8 bands, got {}",
                LANDSAT8_NUM_BANDS, bands
            )));
        }
        let shape = (rows, cols);
        let mut shapes = vec![("quality", self.quality.dim())];
        if let Some(wf) = &self.water_fraction {
            shapes.push(("water fraction", wf.dim()));
        }
        if let Some(c) = &self.clost {
            shapes.push(("clost", c.dim()));
        }
        if let Some(o) = &self.otsu {
            shapes.push(("otsu", o.dim()));
        }
        for (name, dim) in shapes {
            if dim != shape {
                return Err(ClassifError::InvalidFormat(format!(
                    "{} raster is {:?}, reflectance is {:?}",
                    name, dim, shape
                )));
            }
        }
        Ok(())
    }

    pub fn reflectance_at(&self, row: usize, col: usize) -> [f64; LANDSAT8_NUM_BANDS] {
        std::array::from_fn(|b| self.reflectance[[b, row, col]] as f64)
    }

    /// Land from the water fraction, falling back to the L1 water
    /// confidence where the fraction is no-data. Without a water fraction
    /// raster every pixel is water.
    pub fn is_land(&self, row: usize, col: usize) -> bool {
        match &self.water_fraction {
            None => false,
            Some(wf) => {
                let fraction = wf[[row, col]];
                if fraction <= WATER_FRACTION_MAX {
                    fraction == 0
                } else {
                    !Landsat8QualityFlags(self.quality[[row, col]])
                        .contains(Landsat8QualityFlags::WATER_CONFIDENCE_HIGH)
                }
            }
        }
    }

    pub fn ancillary_at(&self, row: usize, col: usize) -> Landsat8Ancillary {
        Landsat8Ancillary {
            invalid: Landsat8QualityFlags(self.quality[[row, col]]).contains(Landsat8QualityFlags::DESIGNATED_FILL),
            land: self.is_land(row, col),
            clost: self.clost.as_ref().map_or(0.0, |c| c[[row, col]] as f64),
            otsu: self.otsu.as_ref().map_or(0.0, |o| o[[row, col]] as f64),
        }
    }
}

/// Classified scene
#[derive(Debug, Clone)]
pub struct Landsat8Output {
    pub flags: FlagImage,
    /// Raw network score
    pub nn_score: RealImage,
}

pub struct Landsat8Classifier {
    params: Landsat8Params,
    bands: BandIndices,
    net_factory: CloudNetFactory,
}

impl Landsat8Classifier {
    pub fn new(net_factory: CloudNetFactory) -> ClassifResult<Self> {
        Self::with_params(net_factory, Landsat8Params::default())
    }

    pub fn with_params(net_factory: CloudNetFactory, params: Landsat8Params) -> ClassifResult<Self> {
        if !(params.nn_ambiguous_lower <= params.nn_ambiguous_sure_separation
            && params.nn_ambiguous_sure_separation <= params.nn_sure_snow_separation)
        {
            return Err(ClassifError::Config(format!(
                "NN category boundaries must increase: {} / {} / {}",
                params.nn_ambiguous_lower, params.nn_ambiguous_sure_separation, params.nn_sure_snow_separation
            )));
        }
        let bands = BandIndices::resolve(&params)?;
        Ok(Self {
            params,
            bands,
            net_factory,
        })
    }

    pub fn params(&self) -> &Landsat8Params {
        &self.params
    }

    /// Fresh network evaluator
    pub fn make_net(&self) -> Box<dyn CloudNet> {
        (self.net_factory)()
    }

    pub fn nn_category(&self, score: f64) -> NnCategory {
        let p = &self.params;
        if score < p.nn_ambiguous_lower {
            NnCategory::Clear
        } else if score < p.nn_ambiguous_sure_separation {
            NnCategory::Ambiguous
        } else if score < p.nn_sure_snow_separation {
            NnCategory::Cloud
        } else {
            NnCategory::SnowIce
        }
    }

    /// Network input: square roots of the reflective bands, the
    /// panchromatic entry floored at the network's minimum, and the two
    /// thermal bands for thermal networks
    pub fn nn_input(&self, rho: &[f64; LANDSAT8_NUM_BANDS], net: &dyn CloudNet) -> Vec<f64> {
        let mut input = Vec::with_capacity(self.params.nn_selector.input_len());
        input.extend(rho[..PANCHROMATIC].iter().map(|r| r.sqrt()));
        input.push(rho[PANCHROMATIC].sqrt().max(net.input_minimum(PANCHROMATIC)));
        if self.params.nn_selector.uses_thermal() {
            input.push(rho[THERMAL_1].sqrt());
            input.push(rho[THERMAL_2].sqrt());
        }
        input
    }

    pub fn is_cloud_shimez(&self, rho: &[f64; LANDSAT8_NUM_BANDS]) -> bool {
        if rho[GREEN] <= 0.0 {
            return false;
        }
        let a = self.params.shimez_diff_threshold;
        let blue_green = rho[BLUE] / rho[GREEN];
        let red_green = rho[RED] / rho[GREEN];
        let mean = (rho[BLUE] + rho[GREEN] + rho[RED]) / 3.0;
        (blue_green - 1.0).abs() < a && (red_green - 1.0).abs() < a && mean > self.params.shimez_mean_threshold
    }

    pub fn is_cloud_hot(&self, rho: &[f64; LANDSAT8_NUM_BANDS]) -> bool {
        rho[BLUE] - 0.5 * rho[RED] > self.params.hot_threshold
    }

    /// With OTSU enabled the CLOST value comes from the auxiliary raster
    pub fn is_cloud_clost(&self, rho: &[f64; LANDSAT8_NUM_BANDS], clost: f64) -> bool {
        let value = if self.params.apply_otsu {
            clost
        } else {
            rho[COASTAL_AEROSOL] * rho[BLUE] * rho[PANCHROMATIC] * rho[CIRRUS]
        };
        value > self.params.clost_threshold
    }

    pub fn is_cloud_otsu(&self, otsu: f64) -> bool {
        otsu > OTSU_CLOUD_LEVEL
    }

    pub fn is_bright(&self, rho: &[f64; LANDSAT8_NUM_BANDS], land: bool) -> bool {
        let p = &self.params;
        if land {
            rho[self.bands.brightness_land] > p.brightness_threshold_land
        } else {
            let [b1, b2] = self.bands.brightness_water;
            p.brightness_weight_1_water * rho[b1] + p.brightness_weight_2_water * rho[b2]
                > p.brightness_threshold_water
        }
    }

    pub fn is_white(&self, rho: &[f64; LANDSAT8_NUM_BANDS], land: bool) -> bool {
        let ([b1, b2], threshold) = if land {
            (self.bands.whiteness_land, self.params.whiteness_threshold_land)
        } else {
            (self.bands.whiteness_water, self.params.whiteness_threshold_water)
        };
        rho[b2] > 0.0 && rho[b1] / rho[b2] < threshold
    }

    pub fn dark_glint_tests(&self, rho: &[f64; LANDSAT8_NUM_BANDS]) -> DarkGlintTests {
        let [b1, b2] = self.bands.dark_glint;
        DarkGlintTests {
            test_1: rho[b1] > self.params.dark_glint_threshold_1,
            test_2: rho[b2] > self.params.dark_glint_threshold_2,
        }
    }

    /// Flag word from reflectances, ancillary inputs and the network score.
    /// Buffer, shadow, glint and coastline bits are left to post-processing.
    pub fn classify_pixel(&self, rho: &[f64; LANDSAT8_NUM_BANDS], anc: &Landsat8Ancillary, nn_score: f64) -> Landsat8Flags {
        if anc.invalid {
            let mut flags = Landsat8Flags::empty();
            flags.set(Landsat8Flags::INVALID, true);
            return flags;
        }
        let p = &self.params;
        let category = self.nn_category(nn_score);

        let shimez = p.apply_shimez && self.is_cloud_shimez(rho);
        let hot = p.apply_hot && self.is_cloud_hot(rho);
        let clost = p.apply_clost && self.is_cloud_clost(rho, anc.clost);
        let otsu = p.apply_otsu && self.is_cloud_otsu(anc.otsu);
        let nn_cloud = category == NnCategory::Cloud;

        let mut flags = Landsat8Flags::empty();
        flags.set(Landsat8Flags::CLOUD_SHIMEZ, shimez);
        flags.set(Landsat8Flags::CLOUD_HOT, hot);
        flags.set(Landsat8Flags::CLOUD_OTSU, otsu);
        flags.set(Landsat8Flags::CLOUD_CLOST, clost);
        flags.set(Landsat8Flags::CLOUD_SURE, shimez || clost || otsu || (nn_cloud && !anc.land));
        flags.set(Landsat8Flags::CLOUD_AMBIGUOUS, category == NnCategory::Ambiguous);
        flags.set(Landsat8Flags::SNOW_ICE, category == NnCategory::SnowIce);
        flags.set(Landsat8Flags::BRIGHT, self.is_bright(rho, anc.land));
        flags.set(Landsat8Flags::WHITE, self.is_white(rho, anc.land));
        flags.set(Landsat8Flags::LAND, anc.land);
        flags
    }

    fn classify_at(&self, scene: &Landsat8Scene, net: &mut dyn CloudNet, row: usize, col: usize) -> (u32, f32) {
        let rho = scene.reflectance_at(row, col);
        let anc = scene.ancillary_at(row, col);
        if anc.invalid {
            return (self.classify_pixel(&rho, &anc, 0.0).bits(), 0.0);
        }
        let input = self.nn_input(&rho, &*net);
        let score = net.score(&input);
        (self.classify_pixel(&rho, &anc, score).bits(), score as f32)
    }

    /// Classify every pixel with one network evaluator
    pub fn classify_scene(&self, scene: &Landsat8Scene) -> ClassifResult<Landsat8Output> {
        scene.validate()?;
        let (rows, cols) = scene.dim();
        log::info!("Classifying Landsat-8 scene {}x{}", rows, cols);
        let start = std::time::Instant::now();

        let mut net = self.make_net();
        let mut flags = FlagImage::zeros((rows, cols));
        let mut nn_score = RealImage::zeros((rows, cols));
        for row in 0..rows {
            for col in 0..cols {
                let (f, s) = self.classify_at(scene, net.as_mut(), row, col);
                flags[[row, col]] = f;
                nn_score[[row, col]] = s;
            }
        }

        log::info!("Landsat-8 classification finished in {:.2}s", start.elapsed().as_secs_f64());
        Ok(Landsat8Output { flags, nn_score })
    }

    /// Row-parallel classification, one network evaluator per worker
    #[cfg(feature = "parallel")]
    pub fn classify_scene_parallel(&self, scene: &Landsat8Scene) -> ClassifResult<Landsat8Output> {
        use ndarray::Axis;
        use rayon::prelude::*;

        scene.validate()?;
        let (rows, cols) = scene.dim();
        log::info!("Classifying Landsat-8 scene {}x{} in parallel", rows, cols);
        let start = std::time::Instant::now();

        let mut flags = FlagImage::zeros((rows, cols));
        let mut nn_score = RealImage::zeros((rows, cols));
        flags
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(nn_score.axis_iter_mut(Axis(0)).into_par_iter())
            .enumerate()
            .for_each_init(
                || self.make_net(),
                |net, (row, (mut flag_row, mut score_row))| {
                    for col in 0..cols {
                        let (f, s) = self.classify_at(scene, net.as_mut(), row, col);
                        flag_row[col] = f;
                        score_row[col] = s;
                    }
                },
            );

        log::info!(
            "Parallel Landsat-8 classification finished in {:.2}s",
            start.elapsed().as_secs_f64()
        );
        Ok(Landsat8Output { flags, nn_score })
    }

    #[cfg(not(feature = "parallel"))]
    pub fn classify_scene_parallel(&self, scene: &Landsat8Scene) -> ClassifResult<Landsat8Output> {
        self.classify_scene(scene)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// Network returning a fixed score
    struct FixedNet(f64);

    impl CloudNet for FixedNet {
        fn score(&mut self, _input: &[f64]) -> f64 {
            self.0
        }
    }

    /// Network scoring the mean of its inputs
    struct MeanNet;

    impl CloudNet for MeanNet {
        fn input_minimum(&self, index: usize) -> f64 {
            if index == PANCHROMATIC {
                0.3
            } else {
                0.0
            }
        }

        fn score(&mut self, input: &[f64]) -> f64 {
            input.iter().sum::<f64>() / input.len() as f64
        }
    }

    fn classifier(score: f64) -> Landsat8Classifier {
        Landsat8Classifier::new(Arc::new(move || Box::new(FixedNet(score)) as Box<dyn CloudNet>)).unwrap()
    }

    fn flat(rho: f64) -> [f64; LANDSAT8_NUM_BANDS] {
        [rho; LANDSAT8_NUM_BANDS]
    }

    #[test]
    fn test_nn_categories() {
        let c = classifier(0.0);
        assert_eq!(c.nn_category(1.0), NnCategory::Clear);
        assert_eq!(c.nn_category(1.95), NnCategory::Ambiguous);
        assert_eq!(c.nn_category(3.45), NnCategory::Cloud);
        assert_eq!(c.nn_category(4.29), NnCategory::Cloud);
        assert_eq!(c.nn_category(4.3), NnCategory::SnowIce);
    }

    #[test]
    fn test_nn_input_layout() {
        let c = classifier(0.0);
        let rho = flat(0.04);
        let input = c.nn_input(&rho, &MeanNet);
        assert_eq!(input.len(), 8);
        assert!((input[0] - 0.2).abs() < 1e-12);
        // Panchromatic floored at the network minimum
        assert_eq!(input[PANCHROMATIC], 0.3);

        let params = Landsat8Params {
            nn_selector: NnSelector::WaterUseThermal,
            ..Default::default()
        };
        let thermal = Landsat8Classifier::with_params(Arc::new(|| Box::new(MeanNet) as Box<dyn CloudNet>), params).unwrap();
        assert_eq!(thermal.nn_input(&rho, &MeanNet).len(), 10);
    }

    #[test]
    fn test_shimez_and_hot() {
        let c = classifier(0.0);
        assert!(c.is_cloud_shimez(&flat(0.4)));
        assert!(!c.is_cloud_shimez(&flat(0.2)));

        let mut rho = flat(0.4);
        rho[BLUE] = 0.5;
        assert!(!c.is_cloud_shimez(&rho));
        assert!(c.is_cloud_hot(&rho));
    }

    #[test]
    fn test_clost_source_depends_on_otsu() {
        let c = classifier(0.0);
        assert!(c.is_cloud_clost(&flat(0.1), 0.0));
        assert!(!c.is_cloud_clost(&flat(0.01), 1.0));

        let params = Landsat8Params {
            apply_otsu: true,
            ..Default::default()
        };
        let otsu = Landsat8Classifier::with_params(Arc::new(|| Box::new(FixedNet(0.0)) as Box<dyn CloudNet>), params).unwrap();
        assert!(otsu.is_cloud_clost(&flat(0.01), 1.0));
        assert!(otsu.is_cloud_otsu(200.0));
        assert!(!otsu.is_cloud_otsu(128.0));
    }

    #[test]
    fn test_bright_and_white() {
        let c = classifier(0.0);
        let mut rho = flat(0.3);
        assert!(!c.is_bright(&rho, true));
        assert!(c.is_bright(&rho, false));
        rho[BLUE] = 0.6;
        assert!(c.is_bright(&rho, true));
        assert!(c.is_white(&rho, true));
        rho[RED] = 0.7;
        assert!(!c.is_white(&rho, false));
    }

    #[test]
    fn test_dark_glint() {
        let c = classifier(0.0);
        let mut rho = flat(0.1);
        rho[NIR] = 0.2;
        let t = c.dark_glint_tests(&rho);
        assert!(t.test_1);
        assert!(!t.test_2);
    }

    #[test]
    fn test_nn_cloud_only_counts_over_water() {
        let c = classifier(0.0);
        let rho = flat(0.05);
        let water = Landsat8Ancillary::default();
        let land = Landsat8Ancillary { land: true, ..Default::default() };

        let flags = c.classify_pixel(&rho, &water, 4.0);
        assert!(flags.contains(Landsat8Flags::CLOUD_SURE));
        let flags = c.classify_pixel(&rho, &land, 4.0);
        assert!(!flags.contains(Landsat8Flags::CLOUD_SURE));
        assert!(flags.contains(Landsat8Flags::LAND));

        let flags = c.classify_pixel(&rho, &water, 2.5);
        assert!(flags.contains(Landsat8Flags::CLOUD_AMBIGUOUS));
        let flags = c.classify_pixel(&rho, &water, 5.0);
        assert!(flags.contains(Landsat8Flags::SNOW_ICE));
    }

    #[test]
    fn test_invalid_pixel_has_no_cloud() {
        let c = classifier(4.0);
        let anc = Landsat8Ancillary { invalid: true, ..Default::default() };
        let flags = c.classify_pixel(&flat(0.4), &anc, 4.0);
        assert_eq!(flags.bits(), 1 << Landsat8Flags::INVALID);

        let land = Landsat8Ancillary { invalid: true, land: true, ..Default::default() };
        let flags = c.classify_pixel(&flat(0.4), &land, 5.0);
        assert_eq!(flags.bits(), 1 << Landsat8Flags::INVALID);
    }

    #[test]
    fn test_dark_pixel_ratios_are_false() {
        let c = classifier(0.0);
        let rho = flat(0.0);
        assert!(!c.is_cloud_shimez(&rho));
        assert!(!c.is_white(&rho, true));
        assert!(!c.is_white(&rho, false));
        let flags = c.classify_pixel(&rho, &Landsat8Ancillary::default(), 0.0);
        assert!(!flags.contains(Landsat8Flags::CLOUD_SHIMEZ));
        assert!(!flags.contains(Landsat8Flags::WHITE));
    }

    #[test]
    fn test_land_from_water_fraction() {
        let mut quality = FlagImage::zeros((1, 3));
        quality[[0, 2]] = 1 << Landsat8QualityFlags::WATER_CONFIDENCE_HIGH;
        let scene = Landsat8Scene {
            reflectance: Array3::zeros((LANDSAT8_NUM_BANDS, 1, 3)),
            quality,
            water_fraction: Some(Array2::from_shape_vec((1, 3), vec![0, 50, 255]).unwrap()),
            clost: None,
            otsu: None,
        };
        assert!(scene.is_land(0, 0));
        assert!(!scene.is_land(0, 1));
        assert!(!scene.is_land(0, 2));

        let no_mask = Landsat8Scene { water_fraction: None, ..scene };
        assert!(!no_mask.is_land(0, 0));
    }

    #[test]
    fn test_scene_writes_scores() {
        let c = classifier(2.0);
        let scene = Landsat8Scene {
            reflectance: Array3::from_elem((LANDSAT8_NUM_BANDS, 2, 2), 0.05),
            quality: FlagImage::zeros((2, 2)),
            water_fraction: None,
            clost: None,
            otsu: None,
        };
        let out = c.classify_scene(&scene).unwrap();
        assert!(out.nn_score.iter().all(|&s| s == 2.0));
        assert!(out
            .flags
            .iter()
            .all(|&f| Landsat8Flags(f).contains(Landsat8Flags::CLOUD_AMBIGUOUS)));
    }

    #[test]
    fn test_rejects_bad_band_count() {
        let c = classifier(0.0);
        let scene = Landsat8Scene {
            reflectance: Array3::zeros((7, 2, 2)),
            quality: FlagImage::zeros((2, 2)),
            water_fraction: None,
            clost: None,
            otsu: None,
        };
        assert!(c.classify_scene(&scene).is_err());
    }
}
