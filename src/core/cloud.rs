//! MERIS pressure and spectral cloud classification.
//!
//! Runs on TOA reflectance before any correction. The brightness and slope
//! tests use ρAg = ρTOA − ρR, with the Rayleigh reflectance evaluated for
//! each pixel's own geometry and pressure.

use crate::core::auxdata::MerisAuxData;
use crate::core::decision::CloudTests;
use crate::core::flags::CloudFlags;
use crate::core::geometry::{correct_ecmwf_pressure, Geometry};
use crate::core::pressure::PressureRetrieval;
use crate::core::rayleigh::RayleighCorrection;
use crate::types::{meris_band::*, ClassifResult, PixelRecord, MERIS_NUM_BANDS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudParams {
    /// Run the decision-table cloud test
    pub cloud_detection: bool,
    /// Write the retrieved surface pressure and cloud-top pressure rasters
    pub compute_pressures: bool,
}

impl Default for CloudParams {
    fn default() -> Self {
        Self {
            cloud_detection: true,
            compute_pressures: true,
        }
    }
}

/// Classification of one pixel
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CloudResult {
    pub flags: CloudFlags,
    pub tests: CloudTests,
    /// Retrieved surface pressure, never negative
    pub surface_pressure: f64,
    /// Externally supplied cloud-top pressure, passed through
    pub cloud_top_pressure: Option<f64>,
}

pub struct CloudClassifier {
    aux: Arc<MerisAuxData>,
    params: CloudParams,
    pressure: PressureRetrieval,
    rayleigh: RayleighCorrection,
}

impl CloudClassifier {
    pub fn new(aux: Arc<MerisAuxData>) -> ClassifResult<Self> {
        Self::with_params(aux, CloudParams::default())
    }

    pub fn with_params(aux: Arc<MerisAuxData>, params: CloudParams) -> ClassifResult<Self> {
        let pressure = PressureRetrieval::new(aux.clone())?;
        let rayleigh = RayleighCorrection::new(aux.clone())?;
        Ok(Self {
            aux,
            params,
            pressure,
            rayleigh,
        })
    }

    pub fn params(&self) -> &CloudParams {
        &self.params
    }

    /// Reference pressure of a pixel. Only land pixels are reduced to
    /// their altitude.
    pub fn reference_pressure(&self, pixel: &PixelRecord) -> f64 {
        if pixel.is_l1_land() {
            correct_ecmwf_pressure(pixel.ecmwf_pressure, pixel.altitude, self.aux.pressure_scale_height)
        } else {
            pixel.ecmwf_pressure
        }
    }

    /// TOA reflectance minus the pixel's own Rayleigh reflectance
    pub fn rayleigh_subtracted(&self, pixel: &PixelRecord, geometry: &Geometry, pressure: f64) -> [f64; MERIS_NUM_BANDS] {
        let phase = self.rayleigh.phase(geometry.mus, geometry.muv, geometry.sins, geometry.sinv);
        let tau = self.rayleigh.optical_thickness(pressure);
        let rho_r = self.rayleigh.reflectance(geometry, &phase, &tau);
        let mut rho_ag = [0.0; MERIS_NUM_BANDS];
        for b in 0..MERIS_NUM_BANDS {
            rho_ag[b] = pixel.rho_toa[b] - rho_r[b];
        }
        rho_ag
    }

    /// Run every test on one pixel and look up the decision table.
    ///
    /// `cloud_top_pressure` feeds the NN low-pressure test and is passed
    /// through to the result.
    pub fn classify_pixel(&self, pixel: &PixelRecord, cloud_top_pressure: Option<f64>) -> CloudResult {
        if pixel.is_invalid() {
            return CloudResult::default();
        }
        let geometry = Geometry::new(pixel.sza, pixel.vza, pixel.saa, pixel.vaa);
        let land = pixel.is_l1_land();
        let reference = self.reference_pressure(pixel);

        let retrieved = self.pressure.compute_pressure(
            pixel.rho_toa[BB753],
            pixel.rho_toa[BB760],
            geometry.air_mass,
            pixel.detector,
        );
        let threshold = self.pressure.pressure_threshold(pixel.sza, pixel.vza, land);
        let pressure_tests = self
            .pressure
            .threshold_tests(reference, retrieved.value, cloud_top_pressure, threshold);

        let rho_ag = self.rayleigh_subtracted(pixel, &geometry, reference);
        let bright_threshold =
            self.pressure
                .rhorc_442_threshold(pixel.sza, pixel.vza, geometry.delta_azimuth, land);

        let tests = CloudTests {
            bright: self.pressure.is_bright(&rho_ag, bright_threshold, &pixel.radiance),
            low_p_nn: pressure_tests.low_p_nn,
            low_p_poly: pressure_tests.low_p_poly,
            delta_p: pressure_tests.delta_p,
            pcd_nn: true,
            pcd_poly: retrieved.error,
            slope_1: self.pressure.slope_1(&rho_ag, &pixel.radiance),
            slope_2: self.pressure.slope_2(&rho_ag, &pixel.radiance),
        };

        let mut flags = CloudFlags::empty();
        flags.set(CloudFlags::BRIGHT, tests.bright);
        flags.set(CloudFlags::LOW_NN_P, tests.low_p_nn);
        flags.set(CloudFlags::PCD_NN_P, tests.pcd_nn);
        flags.set(CloudFlags::LOW_POL_P, tests.low_p_poly);
        flags.set(CloudFlags::PCD_POL_P, tests.pcd_poly);
        flags.set(CloudFlags::CONFIDENCE_P, tests.delta_p);
        flags.set(CloudFlags::SLOPE_1, tests.slope_1);
        flags.set(CloudFlags::SLOPE_2, tests.slope_2);
        if self.params.cloud_detection {
            flags.set(CloudFlags::CLOUD, self.aux.decision_table(land).decide(&tests));
        }

        CloudResult {
            flags,
            tests,
            surface_pressure: retrieved.value.max(0.0),
            cloud_top_pressure,
        }
    }

    /// Classify every pixel of a block and store the flags in the records.
    ///
    /// `cloud_top_pressure` is indexed like `pixels`.
    pub fn classify_block(&self, pixels: &mut [PixelRecord], cloud_top_pressure: Option<&[f64]>) -> Vec<CloudResult> {
        pixels
            .iter_mut()
            .enumerate()
            .map(|(i, pixel)| {
                let ctp = cloud_top_pressure.and_then(|c| c.get(i).copied());
                let result = self.classify_pixel(pixel, ctp);
                pixel.cloud_flags = result.flags.bits();
                result
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::flags::MerisL1Flags;
    use crate::types::MerisResolution;

    fn classifier() -> CloudClassifier {
        let aux = MerisAuxData::synthetic(MerisResolution::Reduced).unwrap();
        CloudClassifier::new(Arc::new(aux)).unwrap()
    }

    fn pixel(rho: f64) -> PixelRecord {
        let mut rho_toa = [rho; MERIS_NUM_BANDS];
        rho_toa[BB760] = 0.6 * rho_toa[BB753];
        PixelRecord {
            sza: 30.0,
            vza: 10.0,
            saa: 120.0,
            vaa: 120.0,
            ecmwf_pressure: 1013.0,
            rho_toa,
            ..Default::default()
        }
    }

    #[test]
    fn test_dark_pixel_is_clear() {
        let result = classifier().classify_pixel(&pixel(0.05), None);
        assert!(!result.tests.bright);
        assert!(!result.flags.contains(CloudFlags::CLOUD));
        assert!(result.flags.contains(CloudFlags::PCD_NN_P));
        assert!(!result.tests.low_p_poly);
        assert!(!result.tests.delta_p);
        assert!(result.surface_pressure > 1000.0);
    }

    #[test]
    fn test_bright_flat_pixel_is_cloud() {
        let result = classifier().classify_pixel(&pixel(0.6), None);
        assert!(result.tests.bright);
        assert!(result.tests.slope_1);
        assert!(result.tests.slope_2);
        assert!(result.flags.contains(CloudFlags::CLOUD));
    }

    #[test]
    fn test_invalid_pixel_has_no_flags() {
        let mut p = pixel(0.6);
        p.l1_flags = 1 << MerisL1Flags::INVALID;
        let result = classifier().classify_pixel(&p, Some(500.0));
        assert_eq!(result.flags.bits(), 0);
    }

    #[test]
    fn test_cloud_top_pressure_drives_nn_test() {
        let c = classifier();
        let result = c.classify_pixel(&pixel(0.05), Some(400.0));
        assert!(result.tests.low_p_nn);
        assert_eq!(result.cloud_top_pressure, Some(400.0));
    }

    #[test]
    fn test_land_reference_pressure_uses_altitude() {
        let c = classifier();
        let mut p = pixel(0.05);
        p.altitude = 1000.0;
        assert_eq!(c.reference_pressure(&p), 1013.0);
        p.l1_flags = 1 << MerisL1Flags::LAND_OCEAN;
        assert!(c.reference_pressure(&p) < 900.0);
    }

    #[test]
    fn test_block_writes_flags_into_records() {
        let c = classifier();
        let mut pixels = vec![pixel(0.6), pixel(0.05)];
        let results = c.classify_block(&mut pixels, None);
        assert_eq!(results.len(), 2);
        assert!(pixels[0].is_cloud());
        assert!(!pixels[1].is_cloud());
    }
}
