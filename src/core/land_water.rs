//! Land / water / glint reclassification

use crate::core::auxdata::MerisAuxData;
use crate::core::flags::LandFlags;
use crate::core::geometry::{azimuth_difference, vector_azimuth};
use crate::types::{meris_band::*, ClassifResult, PixelRecord, BAD_VALUE};
use std::sync::Arc;

/// Glint is assumed when its reflectance reaches this fraction of ρ865
const GLINT_FRACTION: f64 = 0.2;
/// Minimum MERIS differential snow index for ice
const MDSI_ICE_THRESHOLD: f64 = 0.01;

/// Block-level quantities evaluated at the corner pixel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandWaterThresholds {
    pub glint_reflectance: f64,
    pub r7: f64,
    pub r13: f64,
}

pub struct LandWaterClassifier {
    aux: Arc<MerisAuxData>,
}

impl LandWaterClassifier {
    pub fn new(aux: Arc<MerisAuxData>) -> ClassifResult<Self> {
        aux.validate()?;
        Ok(Self { aux })
    }

    /// Sun glint reflectance for the geometry and wind vector
    pub fn glint_reflectance(&self, sza: f64, vza: f64, saa: f64, vaa: f64, wind_u: f64, wind_v: f64) -> f64 {
        let wind_speed = (wind_u * wind_u + wind_v * wind_v).sqrt();
        let wind_azimuth = vector_azimuth(wind_u, wind_v);
        let chi = (saa - wind_azimuth).to_radians().cos().clamp(-1.0, 1.0).acos().to_degrees();
        let delta_azimuth = azimuth_difference(vaa, saa);
        self.aux
            .glint_reflectance
            .interpolate(&[chi, vza, delta_azimuth, wind_speed, sza])
    }

    pub fn thresholds(&self, corner: &PixelRecord) -> LandWaterThresholds {
        let delta_azimuth = azimuth_difference(corner.vaa, corner.saa);
        let coords = [corner.sza, corner.vza, delta_azimuth];
        LandWaterThresholds {
            glint_reflectance: self.glint_reflectance(
                corner.sza,
                corner.vza,
                corner.saa,
                corner.vaa,
                corner.wind_u,
                corner.wind_v,
            ),
            r7: self.aux.r7_threshold.interpolate(&coords),
            r13: self.aux.r13_threshold.interpolate(&coords),
        }
    }

    /// Dark in the threshold band and red-over-NIR: inland water
    pub fn is_inland_water(&self, rho: &[f64], band: usize, alpha: f64, threshold: f64) -> bool {
        rho[band] <= alpha * threshold && self.aux.beta_land * rho[BB865] < rho[BB665]
    }

    /// Bright in the threshold band and NIR-over-red: land seen in water
    pub fn is_island(&self, rho: &[f64], band: usize, alpha: f64, threshold: f64) -> bool {
        rho[band] > alpha * threshold && self.aux.beta_water * rho[BB865] > rho[BB665]
    }

    /// MERIS differential snow index on TOA reflectance, combined with the
    /// L1 bright flag
    pub fn is_ice(&self, pixel: &PixelRecord) -> bool {
        let sum = pixel.rho_toa[BB865] + pixel.rho_toa[BB890];
        if sum == 0.0 {
            return false;
        }
        let mdsi = (pixel.rho_toa[BB865] - pixel.rho_toa[BB890]) / sum;
        mdsi > MDSI_ICE_THRESHOLD && pixel.is_l1_bright()
    }

    /// Reclassify one pixel from its gas-corrected reflectance
    pub fn classify_pixel(&self, pixel: &PixelRecord, thresholds: &LandWaterThresholds) -> LandFlags {
        let rho = &pixel.rho_ng;
        let [b0, b1] = self.aux.threshold_bands;
        let [a0, a1] = self.aux.alpha_threshold;
        let mut flags = LandFlags::empty();

        let is_water = self.is_inland_water(rho, b0, a0, thresholds.r7);
        flags.set(LandFlags::LOINLD, is_water);

        let glint = thresholds.glint_reflectance >= GLINT_FRACTION * rho[BB865];
        flags.set(LandFlags::MEGLINT, glint);
        let (band, alpha, threshold) = if glint {
            (b0, a0, thresholds.r7)
        } else {
            (b1, a1, thresholds.r13)
        };

        let ice = self.is_ice(pixel);
        flags.set(LandFlags::ICE, ice);
        let island = self.is_island(rho, band, alpha, threshold) || ice;
        flags.set(LandFlags::ISLAND, island);

        // The water test is the lenient one; under glint over L1 water the
        // stricter land test decides
        let land_consolidated = if glint && !pixel.is_l1_land() { island } else { !is_water };
        flags.set(LandFlags::LANDCONS, land_consolidated);
        flags
    }

    /// Reclassify the non-cloud pixels of a block and store the flags in
    /// the records. Cloudy, invalid and uncorrected pixels keep empty flags.
    pub fn classify_block(&self, pixels: &mut [PixelRecord]) -> Vec<LandFlags> {
        let thresholds = match pixels.first() {
            Some(corner) => self.thresholds(corner),
            None => return Vec::new(),
        };
        pixels
            .iter_mut()
            .map(|pixel| {
                let skip = pixel.is_invalid() || pixel.is_cloud() || pixel.rho_ng[BB412] == BAD_VALUE as f64;
                let flags = if skip {
                    LandFlags::empty()
                } else {
                    self.classify_pixel(pixel, &thresholds)
                };
                pixel.land_flags = flags.bits();
                flags
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::flags::MerisL1Flags;
    use crate::types::{MerisResolution, MERIS_NUM_BANDS};

    fn classifier() -> LandWaterClassifier {
        let aux = MerisAuxData::synthetic(MerisResolution::Reduced).unwrap();
        LandWaterClassifier::new(Arc::new(aux)).unwrap()
    }

    fn thresholds(glint: f64) -> LandWaterThresholds {
        LandWaterThresholds { glint_reflectance: glint, r7: 0.05, r13: 0.05 }
    }

    fn pixel_with(rho_665: f64, rho_865: f64) -> PixelRecord {
        let mut rho_ng = [0.05; MERIS_NUM_BANDS];
        rho_ng[BB665] = rho_665;
        rho_ng[BB865] = rho_865;
        PixelRecord { rho_ng, ..Default::default() }
    }

    #[test]
    fn test_dark_red_pixel_is_water() {
        let c = classifier();
        let flags = c.classify_pixel(&pixel_with(0.02, 0.005), &thresholds(0.0));
        assert!(flags.contains(LandFlags::LOINLD));
        assert!(!flags.contains(LandFlags::LANDCONS));
    }

    #[test]
    fn test_vegetation_is_land() {
        let c = classifier();
        let flags = c.classify_pixel(&pixel_with(0.04, 0.3), &thresholds(0.0));
        assert!(!flags.contains(LandFlags::LOINLD));
        assert!(flags.contains(LandFlags::LANDCONS));
        assert!(flags.contains(LandFlags::ISLAND));
    }

    #[test]
    fn test_glint_over_water_uses_island_test() {
        let c = classifier();
        // Neither water (665 too bright) nor island (865 below 665)
        let p = pixel_with(0.2, 0.1);
        let no_glint = c.classify_pixel(&p, &thresholds(0.0));
        assert!(!no_glint.contains(LandFlags::MEGLINT));
        assert!(no_glint.contains(LandFlags::LANDCONS));

        let glint = c.classify_pixel(&p, &thresholds(0.5));
        assert!(glint.contains(LandFlags::MEGLINT));
        assert!(!glint.contains(LandFlags::ISLAND));
        assert!(!glint.contains(LandFlags::LANDCONS));

        // L1 land disables the override
        let mut land = p.clone();
        land.l1_flags = 1 << MerisL1Flags::LAND_OCEAN;
        let glint_land = c.classify_pixel(&land, &thresholds(0.5));
        assert!(glint_land.contains(LandFlags::LANDCONS));
    }

    #[test]
    fn test_ice_counts_as_island() {
        let c = classifier();
        let mut p = pixel_with(0.2, 0.1);
        p.rho_toa[BB865] = 0.8;
        p.rho_toa[BB890] = 0.7;
        p.l1_flags = 1 << MerisL1Flags::BRIGHT;
        let flags = c.classify_pixel(&p, &thresholds(0.5));
        assert!(flags.contains(LandFlags::ICE));
        assert!(flags.contains(LandFlags::ISLAND));
        assert!(flags.contains(LandFlags::LANDCONS));
    }

    #[test]
    fn test_glint_reflectance_decreases_with_scattering_angle() {
        let c = classifier();
        // Wind blowing towards the sun azimuth gives a small angle
        let aligned = c.glint_reflectance(30.0, 10.0, 90.0, 90.0, 5.0, 0.0);
        let opposed = c.glint_reflectance(30.0, 10.0, 270.0, 270.0, 5.0, 0.0);
        assert!(aligned > opposed);
    }
}
