//! Rayleigh scattering correction.
//!
//! Phase function, optical thickness, reflectance, transmittances and
//! spherical albedo are evaluated once per block from the corner pixel and
//! then used to invert every eligible pixel of the block.

use crate::core::auxdata::{MerisAuxData, RAYSCATT_NUM_ORD, RAYSCATT_NUM_SER};
use crate::core::flags::RayleighFlags;
use crate::core::geometry::{correct_ecmwf_pressure, Geometry};
use crate::types::{meris_band::*, ClassifResult, PixelRecord, BAD_VALUE, MERIS_NUM_BANDS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Bands outside the Rayleigh-sensitive range (O2 760 nm and H2O 900 nm)
pub const BANDS_NOT_CORRECTED: [usize; 2] = [BB760, BB900];

pub fn is_corrected_band(band: usize) -> bool {
    !BANDS_NOT_CORRECTED.contains(&band)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RayleighParams {
    /// Correct water pixels too, not only consolidated land
    pub correct_water: bool,
    /// Keep the block terms (optical thickness, transmittances, albedo, reflectance)
    pub export_terms: bool,
}

impl Default for RayleighParams {
    fn default() -> Self {
        Self {
            correct_water: false,
            export_terms: false,
        }
    }
}

/// Rayleigh quantities of one geometry and pressure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayleighTerms {
    pub tau: [f64; MERIS_NUM_BANDS],
    pub reflectance: [f64; MERIS_NUM_BANDS],
    /// Downward transmittance (sun path)
    pub trans_sun: [f64; MERIS_NUM_BANDS],
    /// Upward transmittance (view path)
    pub trans_view: [f64; MERIS_NUM_BANDS],
    pub spherical_albedo: [f64; MERIS_NUM_BANDS],
}

#[derive(Debug, Clone)]
pub struct RayleighBlockResult {
    pub flags: Vec<RayleighFlags>,
    /// Block terms when exported and at least one pixel was corrected
    pub terms: Option<RayleighTerms>,
}

/// Rayleigh correction processor
pub struct RayleighCorrection {
    aux: Arc<MerisAuxData>,
    params: RayleighParams,
}

impl RayleighCorrection {
    pub fn new(aux: Arc<MerisAuxData>) -> ClassifResult<Self> {
        Self::with_params(aux, RayleighParams::default())
    }

    pub fn with_params(aux: Arc<MerisAuxData>, params: RayleighParams) -> ClassifResult<Self> {
        aux.validate()?;
        Ok(Self { aux, params })
    }

    pub fn params(&self) -> &RayleighParams {
        &self.params
    }

    /// Fourier components of the Rayleigh phase function
    pub fn phase(&self, mus: f64, muv: f64, sins: f64, sinv: f64) -> [f64; RAYSCATT_NUM_SER] {
        let [a0, a1] = self.aux.phase_coefficients;
        let sins2 = sins * sins;
        let sinv2 = sinv * sinv;
        [
            0.75 * a0 * (1.0 + mus * mus * muv * muv + 0.5 * sins2 * sinv2) + a1,
            -0.75 * a0 * mus * muv * sins * sinv,
            0.1875 * a0 * sins2 * sinv2,
        ]
    }

    /// Optical thickness scaled to `pressure` (hPa)
    pub fn optical_thickness(&self, pressure: f64) -> [f64; MERIS_NUM_BANDS] {
        let ratio = pressure / self.aux.standard_pressure;
        let mut tau = [0.0; MERIS_NUM_BANDS];
        for (b, t) in tau.iter_mut().enumerate() {
            if is_corrected_band(b) {
                *t = self.aux.rayleigh_optical_thickness[b] * ratio;
            }
        }
        tau
    }

    /// Rayleigh reflectance with multiple scattering correction
    pub fn reflectance(
        &self,
        geometry: &Geometry,
        phase: &[f64; RAYSCATT_NUM_SER],
        tau: &[f64; MERIS_NUM_BANDS],
    ) -> [f64; MERIS_NUM_BANDS] {
        let mut abcd = [0.0; RAYSCATT_NUM_SER * RAYSCATT_NUM_ORD];
        self.aux
            .rayleigh_scattering
            .interpolate_into(&[geometry.sza, geometry.vza], &mut abcd);

        let mud = geometry.delta_azimuth.to_radians().cos();
        let mu2d = 2.0 * mud * mud - 1.0;

        let mut refl = [0.0; MERIS_NUM_BANDS];
        for b in (0..MERIS_NUM_BANDS).filter(|&b| is_corrected_band(b)) {
            let const_term =
                (1.0 - (-tau[b] * geometry.air_mass).exp()) / (4.0 * (geometry.mus + geometry.muv));
            let mut rho = [0.0; RAYSCATT_NUM_SER];
            for (s, rho_s) in rho.iter_mut().enumerate() {
                let coefs = &abcd[s * RAYSCATT_NUM_ORD..(s + 1) * RAYSCATT_NUM_ORD];
                let multi = coefs.iter().rev().fold(0.0, |acc, &c| tau[b] * acc + c);
                *rho_s = phase[s] * const_term * multi;
            }
            refl[b] = rho[0] + 2.0 * mud * rho[1] + 2.0 * mu2d * rho[2];
        }
        refl
    }

    /// Diffuse transmittance along a path of cosine `mu`
    pub fn transmittance(&self, mu: f64, tau: &[f64; MERIS_NUM_BANDS]) -> [f64; MERIS_NUM_BANDS] {
        const TWO_THIRD: f64 = 2.0 / 3.0;
        const FOUR_THIRD: f64 = 4.0 / 3.0;
        let [c0, c1, c2] = self.aux.transmittance_coefficients;

        let mut trans = [1.0; MERIS_NUM_BANDS];
        for (b, t) in trans.iter_mut().enumerate() {
            if is_corrected_band(b) {
                let tr = (TWO_THIRD + mu + (TWO_THIRD - mu) * (-tau[b] / mu).exp()) / (FOUR_THIRD + tau[b]);
                *t = c0 + c1 * tr + c2 * tr * tr;
            }
        }
        trans
    }

    pub fn spherical_albedo(&self, tau: &[f64; MERIS_NUM_BANDS]) -> [f64; MERIS_NUM_BANDS] {
        let mut albedo = [0.0; MERIS_NUM_BANDS];
        for (b, s) in albedo.iter_mut().enumerate() {
            if is_corrected_band(b) {
                *s = self.aux.rayleigh_albedo.interpolate(&[tau[b]]);
            }
        }
        albedo
    }

    /// All Rayleigh terms for a geometry and pressure
    pub fn terms(&self, geometry: &Geometry, pressure: f64) -> RayleighTerms {
        let phase = self.phase(geometry.mus, geometry.muv, geometry.sins, geometry.sinv);
        let tau = self.optical_thickness(pressure);
        RayleighTerms {
            reflectance: self.reflectance(geometry, &phase, &tau),
            trans_sun: self.transmittance(geometry.mus, &tau),
            trans_view: self.transmittance(geometry.muv, &tau),
            spherical_albedo: self.spherical_albedo(&tau),
            tau,
        }
    }

    /// Invert one pixel. Uncorrected bands pass through; non-positive
    /// results raise the band's negative-reflectance bit.
    pub fn correct(
        &self,
        terms: &RayleighTerms,
        rho_ng: &[f64; MERIS_NUM_BANDS],
        brr: &mut [f64; MERIS_NUM_BANDS],
    ) -> RayleighFlags {
        let mut flags = RayleighFlags::empty();
        for b in 0..MERIS_NUM_BANDS {
            if !is_corrected_band(b) {
                brr[b] = rho_ng[b];
                continue;
            }
            let q = (rho_ng[b] - terms.reflectance[b]) / (terms.trans_sun[b] * terms.trans_view[b]);
            brr[b] = q / (1.0 + terms.spherical_albedo[b] * q);
            if brr[b] <= 0.0 {
                flags.set(RayleighFlags::bit_for_band(b), true);
            }
        }
        flags
    }

    /// Surface pressure of a pixel from ECMWF pressure and altitude
    pub fn surface_pressure(&self, pixel: &PixelRecord) -> f64 {
        correct_ecmwf_pressure(pixel.ecmwf_pressure, pixel.altitude, self.aux.pressure_scale_height)
    }

    fn is_eligible(&self, pixel: &PixelRecord) -> bool {
        pixel.rho_ng[BB412] != BAD_VALUE as f64
            && (self.params.correct_water || pixel.is_land_consolidated())
    }

    /// Correct every pixel of a block in place.
    ///
    /// `cloud_pressure` carries the corner pixel's cloud-top and retrieved
    /// surface pressures; when the corner is cloudy the block pressure is scaled by
    /// their ratio.
    pub fn correct_block(
        &self,
        pixels: &mut [PixelRecord],
        cloud_pressure: Option<(f64, f64)>,
    ) -> RayleighBlockResult {
        let mut flags = vec![RayleighFlags::empty(); pixels.len()];
        let eligible: Vec<bool> = pixels.iter().map(|p| self.is_eligible(p)).collect();

        for (pixel, &ok) in pixels.iter_mut().zip(&eligible) {
            if !ok {
                pixel.brr = [BAD_VALUE as f64; MERIS_NUM_BANDS];
            }
        }

        let corner = match pixels.first() {
            Some(corner) if eligible.iter().any(|&e| e) => corner,
            _ => return RayleighBlockResult { flags, terms: None },
        };

        let geometry = Geometry::new(corner.sza, corner.vza, corner.saa, corner.vaa);
        let mut pressure = self.surface_pressure(corner);
        if corner.is_cloud() {
            if let Some((ctp, surface)) = cloud_pressure {
                if surface > 0.0 {
                    pressure *= ctp / surface;
                }
            }
        }
        let terms = self.terms(&geometry, pressure);

        for (i, pixel) in pixels.iter_mut().enumerate() {
            if eligible[i] {
                let rho_ng = pixel.rho_ng;
                flags[i] = self.correct(&terms, &rho_ng, &mut pixel.brr);
            }
        }

        RayleighBlockResult {
            flags,
            terms: self.params.export_terms.then_some(terms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::flags::LandFlags;
    use crate::types::MerisResolution;

    fn correction() -> RayleighCorrection {
        let aux = Arc::new(MerisAuxData::synthetic(MerisResolution::Reduced).unwrap());
        RayleighCorrection::new(aux).unwrap()
    }

    #[test]
    fn test_phase_at_nadir() {
        let ray = correction();
        let phase = ray.phase(1.0, 1.0, 0.0, 0.0);
        assert!((phase[0] - (0.75 * 0.9587 * 2.0 + 0.0413)).abs() < 1e-12);
        assert_eq!(phase[1], 0.0);
        assert_eq!(phase[2], 0.0);
    }

    #[test]
    fn test_uncorrected_bands() {
        let ray = correction();
        let g = Geometry::new(30.0, 10.0, 100.0, 100.0);
        let terms = ray.terms(&g, 1013.25);
        for b in BANDS_NOT_CORRECTED {
            assert_eq!(terms.tau[b], 0.0);
            assert_eq!(terms.reflectance[b], 0.0);
            assert_eq!(terms.trans_sun[b], 1.0);
            assert_eq!(terms.spherical_albedo[b], 0.0);
        }
        assert!(terms.tau[BB412] > terms.tau[BB865]);
        assert!(terms.reflectance[BB412] > terms.reflectance[BB865]);
        assert!(terms.trans_sun[BB412] < 1.0);
    }

    #[test]
    fn test_zero_pressure_is_identity() {
        let ray = correction();
        let g = Geometry::new(30.0, 10.0, 0.0, 0.0);
        let terms = ray.terms(&g, 0.0);
        let rho_ng: [f64; MERIS_NUM_BANDS] = std::array::from_fn(|b| 0.02 + 0.01 * b as f64);
        let mut brr = [0.0; MERIS_NUM_BANDS];
        let flags = ray.correct(&terms, &rho_ng, &mut brr);
        for b in 0..MERIS_NUM_BANDS {
            assert!((brr[b] - rho_ng[b]).abs() < 1e-12);
        }
        assert_eq!(flags.bits(), 0);
    }

    #[test]
    fn test_negative_reflectance_flag() {
        let ray = correction();
        let g = Geometry::new(30.0, 10.0, 0.0, 0.0);
        let terms = ray.terms(&g, 1013.25);
        let rho_ng = [0.001; MERIS_NUM_BANDS];
        let mut brr = [0.0; MERIS_NUM_BANDS];
        let flags = ray.correct(&terms, &rho_ng, &mut brr);
        assert!(brr[BB412] < 0.0);
        assert!(flags.contains(RayleighFlags::NEGATIVE_412));
        // 760 nm passes through and has no bit of its own
        assert_eq!(brr[BB760], 0.001);
    }

    #[test]
    fn test_block_corrects_only_consolidated_land() {
        let ray = correction();
        let land = PixelRecord {
            sza: 30.0,
            vza: 10.0,
            ecmwf_pressure: 1013.0,
            rho_ng: [0.2; MERIS_NUM_BANDS],
            land_flags: 1 << LandFlags::LANDCONS,
            ..Default::default()
        };
        let mut water = land.clone();
        water.land_flags = 0;
        let mut pixels = vec![land, water];
        ray.correct_block(&mut pixels, None);
        assert!(pixels[0].brr[BB560] > 0.0 && pixels[0].brr[BB560] < 0.2);
        assert!(pixels[1].brr.iter().all(|&v| v == BAD_VALUE as f64));
    }

    #[test]
    fn test_cloud_pressure_scaling() {
        let aux = Arc::new(MerisAuxData::synthetic(MerisResolution::Reduced).unwrap());
        let params = RayleighParams { correct_water: true, export_terms: true };
        let ray = RayleighCorrection::with_params(aux, params).unwrap();
        let base = PixelRecord {
            sza: 30.0,
            vza: 10.0,
            ecmwf_pressure: 1000.0,
            rho_ng: [0.2; MERIS_NUM_BANDS],
            cloud_flags: 1,
            ..Default::default()
        };
        let mut pixels = vec![base.clone()];
        let clear = ray.correct_block(&mut pixels, None).terms.unwrap();
        let mut pixels = vec![base];
        let cloudy = ray.correct_block(&mut pixels, Some((500.0, 1000.0))).terms.unwrap();
        assert!((cloudy.tau[BB412] - 0.5 * clear.tau[BB412]).abs() < 1e-12);
    }
}
