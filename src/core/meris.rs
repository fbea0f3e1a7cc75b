//! MERIS block pipeline and scene driver.
//!
//! Each block runs cloud classification, gaseous correction, land/water
//! reclassification, Rayleigh correction and smile correction in that
//! order. Blocks share nothing but the calibration context, so the scene
//! can be processed block-parallel and stitched afterwards.

use crate::core::auxdata::MerisAuxData;
use crate::core::cloud::{CloudClassifier, CloudParams, CloudResult};
use crate::core::flags::LandFlags;
use crate::core::gaseous::{GasBlockResult, GaseousCorrection, GaseousParams};
use crate::core::geometry::radiance_to_reflectance;
use crate::core::land_water::LandWaterClassifier;
use crate::core::postprocess::{PostProcessParams, PostProcessor};
use crate::core::rayleigh::{RayleighBlockResult, RayleighCorrection, RayleighParams};
use crate::core::smile::SmileCorrection;
use crate::types::{
    BandCube, ClassifError, ClassifResult, FlagImage, PixelRecord, RealImage, Rect, Sensor, BAD_VALUE,
    MERIS_NUM_BANDS,
};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// MERIS processing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MerisParams {
    /// Edge length of the square processing block
    pub block_size: usize,
    pub apply_smile: bool,
    pub cloud: CloudParams,
    pub gaseous: GaseousParams,
    pub rayleigh: RayleighParams,
}

impl Default for MerisParams {
    fn default() -> Self {
        Self {
            block_size: 4,
            apply_smile: true,
            cloud: CloudParams::default(),
            gaseous: GaseousParams::default(),
            rayleigh: RayleighParams::default(),
        }
    }
}

/// Input rasters of a MERIS scene, all (rows, cols) except the band cubes
#[derive(Debug, Clone)]
pub struct MerisScene {
    /// TOA reflectance (band, rows, cols)
    pub rho_toa: BandCube,
    /// TOA radiance for saturation tests (band, rows, cols)
    pub radiance: Option<BandCube>,
    pub sza: RealImage,
    pub vza: RealImage,
    pub saa: RealImage,
    pub vaa: RealImage,
    /// ECMWF sea level pressure (hPa)
    pub ecmwf_pressure: RealImage,
    /// Total ozone (DU)
    pub ozone: RealImage,
    pub wind_u: RealImage,
    pub wind_v: RealImage,
    /// Surface altitude (m)
    pub altitude: RealImage,
    pub detector: Array2<u16>,
    pub l1_flags: FlagImage,
    /// Externally retrieved cloud-top pressure (hPa)
    pub cloud_top_pressure: Option<RealImage>,
}

impl MerisScene {
    /// Scene at nadir, standard pressure, 350 DU ozone and no wind, with zero
    /// reflectance. Fields are meant to be overwritten.
    pub fn new(rows: usize, cols: usize) -> Self {
        let shape = (rows, cols);
        Self {
            rho_toa: Array3::zeros((MERIS_NUM_BANDS, rows, cols)),
            radiance: None,
            sza: RealImage::zeros(shape),
            vza: RealImage::zeros(shape),
            saa: RealImage::zeros(shape),
            vaa: RealImage::zeros(shape),
            ecmwf_pressure: RealImage::from_elem(shape, 1013.25),
            ozone: RealImage::from_elem(shape, 350.0),
            wind_u: RealImage::zeros(shape),
            wind_v: RealImage::zeros(shape),
            altitude: RealImage::zeros(shape),
            detector: Array2::zeros(shape),
            l1_flags: FlagImage::zeros(shape),
            cloud_top_pressure: None,
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.l1_flags.dim()
    }

    /// Set the radiance cube and derive TOA reflectance from it
    pub fn with_radiance(mut self, radiance: BandCube, aux: &MerisAuxData) -> ClassifResult<Self> {
        if radiance.dim() != self.rho_toa.dim() {
            return Err(ClassifError::InvalidFormat(format!(
                "Radiance cube is {:?}, expected {:?}",
                radiance.dim(),
                self.rho_toa.dim()
            )));
        }
        self.rho_toa = radiance_to_reflectance_cube(&radiance, &self.sza, &self.detector, aux);
        self.radiance = Some(radiance);
        Ok(self)
    }

    pub fn validate(&self, aux: &MerisAuxData) -> ClassifResult<()> {
        let (bands, rows, cols) = self.rho_toa.dim();
        if bands != MERIS_NUM_BANDS {
            return Err(ClassifError::InvalidFormat(format!(
                "Expected {} MERIS bands, got {}",
                MERIS_NUM_BANDS, bands
            )));
        }
        let shape = (rows, cols);
        let rasters = [
            ("sza", self.sza.dim()),
            ("vza", self.vza.dim()),
            ("saa", self.saa.dim()),
            ("vaa", self.vaa.dim()),
            ("ecmwf pressure", self.ecmwf_pressure.dim()),
            ("ozone", self.ozone.dim()),
            ("wind u", self.wind_u.dim()),
            ("wind v", self.wind_v.dim()),
            ("altitude", self.altitude.dim()),
            ("detector", self.detector.dim()),
            ("l1 flags", self.l1_flags.dim()),
        ];
        for (name, dim) in rasters {
            if dim != shape {
                return Err(ClassifError::InvalidFormat(format!(
                    "{} raster is {:?}, reflectance is {:?}",
                    name, dim, shape
                )));
            }
        }
        if let Some(radiance) = &self.radiance {
            if radiance.dim() != self.rho_toa.dim() {
                return Err(ClassifError::InvalidFormat("Radiance and reflectance cubes differ".to_string()));
            }
        }
        if let Some(ctp) = &self.cloud_top_pressure {
            if ctp.dim() != shape {
                return Err(ClassifError::InvalidFormat(format!(
                    "cloud top pressure raster is {:?}, reflectance is {:?}",
                    ctp.dim(),
                    shape
                )));
            }
        }
        let detectors = aux.detector_count();
        if let Some(&max) = self.detector.iter().max() {
            if max as usize >= detectors {
                log::warn!(
                    "Detector index {} exceeds the {} calibrated detectors, clamping",
                    max,
                    detectors
                );
            }
        }
        Ok(())
    }

    /// Fresh pixel record for (x, y)
    pub fn pixel(&self, x: usize, y: usize) -> PixelRecord {
        let at = |r: &RealImage| r[[y, x]] as f64;
        PixelRecord {
            x,
            y,
            detector: self.detector[[y, x]] as usize,
            sza: at(&self.sza),
            vza: at(&self.vza),
            saa: at(&self.saa),
            vaa: at(&self.vaa),
            ecmwf_pressure: at(&self.ecmwf_pressure),
            ozone: at(&self.ozone),
            wind_u: at(&self.wind_u),
            wind_v: at(&self.wind_v),
            altitude: at(&self.altitude),
            radiance: match &self.radiance {
                Some(radiance) => std::array::from_fn(|b| radiance[[b, y, x]] as f64),
                None => [0.0; MERIS_NUM_BANDS],
            },
            rho_toa: std::array::from_fn(|b| self.rho_toa[[b, y, x]] as f64),
            l1_flags: self.l1_flags[[y, x]],
            ..Default::default()
        }
    }
}

/// TOA reflectance cube from radiance, per-detector irradiance and the
/// calibration's seasonal factor
pub fn radiance_to_reflectance_cube(
    radiance: &BandCube,
    sza: &RealImage,
    detector: &Array2<u16>,
    aux: &MerisAuxData,
) -> BandCube {
    let (bands, rows, cols) = radiance.dim();
    Array3::from_shape_fn((bands, rows, cols), |(b, y, x)| {
        let mus = (sza[[y, x]] as f64).to_radians().cos();
        let e0 = aux.solar_irradiance_at(b, detector[[y, x]] as usize);
        radiance_to_reflectance(radiance[[b, y, x]] as f64, mus, e0, aux.seasonal_factor) as f32
    })
}

/// Output rasters of a MERIS scene
#[derive(Debug, Clone)]
pub struct MerisOutput {
    /// Gas-corrected reflectance
    pub rho_ng: BandCube,
    /// Rayleigh-corrected reflectance
    pub brr: BandCube,
    /// Smile-corrected Rayleigh-corrected reflectance
    pub brr_smile: BandCube,
    pub cloud_flags: FlagImage,
    pub gas_flags: FlagImage,
    pub land_flags: FlagImage,
    pub rayleigh_flags: FlagImage,
    /// Retrieved surface pressure (hPa)
    pub surface_pressure: RealImage,
    pub cloud_top_pressure: Option<RealImage>,
    /// Total gas transmittance, when exported
    pub gas_transmittance: Option<BandCube>,
    /// Block Rayleigh reflectance, when exported
    pub rayleigh_reflectance: Option<BandCube>,
}

impl MerisOutput {
    fn new(rows: usize, cols: usize, params: &MerisParams, with_ctp: bool) -> Self {
        let cube = || Array3::from_elem((MERIS_NUM_BANDS, rows, cols), BAD_VALUE);
        Self {
            rho_ng: cube(),
            brr: cube(),
            brr_smile: cube(),
            cloud_flags: FlagImage::zeros((rows, cols)),
            gas_flags: FlagImage::zeros((rows, cols)),
            land_flags: FlagImage::zeros((rows, cols)),
            rayleigh_flags: FlagImage::zeros((rows, cols)),
            surface_pressure: RealImage::zeros((rows, cols)),
            cloud_top_pressure: with_ctp.then(|| RealImage::zeros((rows, cols))),
            gas_transmittance: params.gaseous.export_transmittance.then(cube),
            rayleigh_reflectance: params.rayleigh.export_terms.then(cube),
        }
    }
}

/// Everything one block produced, before it is written to the scene output
#[derive(Debug, Clone)]
pub struct BlockResult {
    pub rect: Rect,
    pub pixels: Vec<PixelRecord>,
    pub cloud: Vec<CloudResult>,
    pub gas: GasBlockResult,
    pub land: Vec<LandFlags>,
    pub rayleigh: RayleighBlockResult,
    pub smile: Vec<[f64; MERIS_NUM_BANDS]>,
}

pub struct MerisProcessor {
    aux: Arc<MerisAuxData>,
    params: MerisParams,
    cloud: CloudClassifier,
    gaseous: GaseousCorrection,
    land_water: LandWaterClassifier,
    rayleigh: RayleighCorrection,
    smile: SmileCorrection,
}

impl MerisProcessor {
    pub fn new(aux: Arc<MerisAuxData>) -> ClassifResult<Self> {
        Self::with_params(aux, MerisParams::default())
    }

    pub fn with_params(aux: Arc<MerisAuxData>, params: MerisParams) -> ClassifResult<Self> {
        aux.validate()?;
        if params.block_size == 0 {
            return Err(ClassifError::Config("Block size must be positive".to_string()));
        }
        log::debug!(
            "MERIS processor: {:?} resolution, block size {}",
            aux.resolution,
            params.block_size
        );
        Ok(Self {
            cloud: CloudClassifier::with_params(aux.clone(), params.cloud.clone())?,
            gaseous: GaseousCorrection::with_params(aux.clone(), params.gaseous.clone())?,
            land_water: LandWaterClassifier::new(aux.clone())?,
            rayleigh: RayleighCorrection::with_params(aux.clone(), params.rayleigh.clone())?,
            smile: SmileCorrection::new(aux.clone())?,
            aux,
            params,
        })
    }

    pub fn params(&self) -> &MerisParams {
        &self.params
    }

    pub fn aux(&self) -> &Arc<MerisAuxData> {
        &self.aux
    }

    /// Run the pipeline on one block. The block's top-left pixel supplies
    /// the shared geometry.
    pub fn compute_block(&self, scene: &MerisScene, rect: &Rect) -> BlockResult {
        let mut pixels = Vec::with_capacity(rect.area());
        let mut ctp = scene.cloud_top_pressure.as_ref().map(|_| Vec::with_capacity(rect.area()));
        for y in rect.y..rect.y_end() {
            for x in rect.x..rect.x_end() {
                pixels.push(scene.pixel(x, y));
                if let (Some(values), Some(raster)) = (ctp.as_mut(), scene.cloud_top_pressure.as_ref()) {
                    values.push(raster[[y, x]] as f64);
                }
            }
        }

        let cloud = self.cloud.classify_block(&mut pixels, ctp.as_deref());
        let gas = self.gaseous.correct_block(&mut pixels);
        let land = self.land_water.classify_block(&mut pixels);

        // Cloud-top over retrieved surface pressure of the corner
        let cloud_pressure = cloud
            .first()
            .and_then(|result| result.cloud_top_pressure.map(|ctp| (ctp, result.surface_pressure)));
        let rayleigh = self.rayleigh.correct_block(&mut pixels, cloud_pressure);

        let smile = if self.params.apply_smile {
            self.smile.correct_block(&pixels)
        } else {
            pixels.iter().map(|p| p.brr).collect()
        };

        BlockResult {
            rect: *rect,
            pixels,
            cloud,
            gas,
            land,
            rayleigh,
            smile,
        }
    }

    /// Copy a block's results into the scene output
    pub fn write_block(&self, block: &BlockResult, out: &mut MerisOutput) {
        for (i, pixel) in block.pixels.iter().enumerate() {
            let (x, y) = (pixel.x, pixel.y);
            for b in 0..MERIS_NUM_BANDS {
                out.rho_ng[[b, y, x]] = pixel.rho_ng[b] as f32;
                out.brr[[b, y, x]] = pixel.brr[b] as f32;
                out.brr_smile[[b, y, x]] = block.smile[i][b] as f32;
            }
            let cloud = &block.cloud[i];
            out.cloud_flags[[y, x]] = cloud.flags.bits();
            out.gas_flags[[y, x]] = block.gas.flags[i].bits();
            out.land_flags[[y, x]] = block.land[i].bits();
            out.rayleigh_flags[[y, x]] = block.rayleigh.flags[i].bits();
            out.surface_pressure[[y, x]] = cloud.surface_pressure as f32;
            if let (Some(raster), Some(ctp)) = (out.cloud_top_pressure.as_mut(), cloud.cloud_top_pressure) {
                raster[[y, x]] = ctp as f32;
            }
            if let (Some(cube), Some(t)) = (out.gas_transmittance.as_mut(), block.gas.transmittance.as_ref()) {
                for b in 0..MERIS_NUM_BANDS {
                    cube[[b, y, x]] = t[i][b] as f32;
                }
            }
            if let (Some(cube), Some(terms)) = (out.rayleigh_reflectance.as_mut(), block.rayleigh.terms.as_ref()) {
                for b in 0..MERIS_NUM_BANDS {
                    cube[[b, y, x]] = terms.reflectance[b] as f32;
                }
            }
        }
    }

    /// Compute one block and write it into `out`
    pub fn process_block(&self, scene: &MerisScene, rect: &Rect, out: &mut MerisOutput) {
        let block = self.compute_block(scene, rect);
        self.write_block(&block, out);
    }

    fn blocks(&self, scene: &MerisScene) -> Vec<Rect> {
        let size = self.params.block_size;
        Rect::of_shape(scene.dim()).blocks(size, size)
    }

    fn empty_output(&self, scene: &MerisScene) -> MerisOutput {
        let (rows, cols) = scene.dim();
        MerisOutput::new(rows, cols, &self.params, scene.cloud_top_pressure.is_some())
    }

    /// Process all blocks in row-major order
    pub fn process_scene(&self, scene: &MerisScene) -> ClassifResult<MerisOutput> {
        self.check_scene(scene)?;
        let (rows, cols) = scene.dim();
        let blocks = self.blocks(scene);
        log::info!("Processing MERIS scene {}x{} in {} blocks", rows, cols, blocks.len());
        let start = std::time::Instant::now();

        let mut out = self.empty_output(scene);
        for rect in &blocks {
            self.process_block(scene, rect, &mut out);
        }

        log::info!("MERIS processing finished in {:.2}s", start.elapsed().as_secs_f64());
        Ok(out)
    }

    /// Process blocks in parallel and stitch the disjoint results
    #[cfg(feature = "parallel")]
    pub fn process_scene_parallel(&self, scene: &MerisScene) -> ClassifResult<MerisOutput> {
        use rayon::prelude::*;

        self.check_scene(scene)?;
        let (rows, cols) = scene.dim();
        let blocks = self.blocks(scene);
        log::info!(
            "Processing MERIS scene {}x{} in {} blocks on {} threads",
            rows,
            cols,
            blocks.len(),
            rayon::current_num_threads()
        );
        let start = std::time::Instant::now();

        let results: Vec<BlockResult> = blocks
            .par_iter()
            .map(|rect| self.compute_block(scene, rect))
            .collect();

        let mut out = self.empty_output(scene);
        for block in &results {
            self.write_block(block, &mut out);
        }

        log::info!(
            "Parallel MERIS processing finished in {:.2}s",
            start.elapsed().as_secs_f64()
        );
        Ok(out)
    }

    #[cfg(not(feature = "parallel"))]
    pub fn process_scene_parallel(&self, scene: &MerisScene) -> ClassifResult<MerisOutput> {
        self.process_scene(scene)
    }

    fn check_scene(&self, scene: &MerisScene) -> ClassifResult<()> {
        scene.validate(&self.aux)
    }

    /// Dilate the cloud flag into the CLOUD_BUFFER bit of `out.cloud_flags`
    pub fn buffer_clouds(&self, out: &mut MerisOutput, params: PostProcessParams) -> ClassifResult<()> {
        let processor = PostProcessor::for_sensor(Sensor::Meris, params);
        out.cloud_flags = processor.post_process(&out.cloud_flags, None)?;
        Ok(())
    }
}
