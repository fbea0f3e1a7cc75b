//! Ozone, oxygen and water vapour absorption correction.
//!
//! Works on one processing block at a time. Ozone transmittance and the
//! water band ratios are shared by the block and derived from its corner
//! pixel and its non-cloud water pixels respectively; land pixels use
//! their own band ratios.

use crate::core::auxdata::{MerisAuxData, GAS_POLY_ORDER};
use crate::core::flags::{CloudFlags, GasFlags};
use crate::core::geometry::air_mass;
use crate::core::lut::interp_coord;
use crate::types::{meris_band::*, ClassifResult, PixelRecord, BAD_VALUE, MERIS_NUM_BANDS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Transmittances outside (MIN_TRANSMITTANCE, 1] leave the TOA value untouched
const MIN_TRANSMITTANCE: f64 = 1.0e-6;

/// Pixels below this altitude (m) are treated as open water
const MIN_LAND_ALTITUDE: f64 = -50.0;

/// Gaseous correction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GaseousParams {
    /// Also correct water pixels below the land altitude limit
    pub correct_water: bool,
    /// Keep the total transmittance of every corrected pixel
    pub export_transmittance: bool,
}

impl Default for GaseousParams {
    fn default() -> Self {
        Self {
            correct_water: false,
            export_transmittance: false,
        }
    }
}

/// Band ratios driving the O2 and H2O transmittance polynomials
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandRatios {
    /// 760 / 753 nm
    pub eta: f64,
    /// 900 / 890 nm
    pub x2: f64,
    /// A numerator or denominator was not positive; a neutral ratio was used
    pub input_error: bool,
}

impl BandRatios {
    /// Ratios from reflectances or reflectance sums
    pub fn from_bands(rho: &[f64; MERIS_NUM_BANDS]) -> Self {
        let mut input_error = false;
        let mut ratio = |num: f64, den: f64| {
            if num > 0.0 && den > 0.0 {
                num / den
            } else {
                input_error = true;
                1.0
            }
        };
        let eta = ratio(rho[BB760], rho[BB753]);
        let x2 = ratio(rho[BB900], rho[BB890]);
        Self { eta, x2, input_error }
    }
}

/// Gas correction of one block
#[derive(Debug, Clone)]
pub struct GasBlockResult {
    pub flags: Vec<GasFlags>,
    /// Total transmittance per pixel, only when exported
    pub transmittance: Option<Vec<[f64; MERIS_NUM_BANDS]>>,
}

/// Gaseous absorption correction processor
pub struct GaseousCorrection {
    aux: Arc<MerisAuxData>,
    params: GaseousParams,
}

impl GaseousCorrection {
    pub fn new(aux: Arc<MerisAuxData>) -> ClassifResult<Self> {
        Self::with_params(aux, GaseousParams::default())
    }

    pub fn with_params(aux: Arc<MerisAuxData>, params: GaseousParams) -> ClassifResult<Self> {
        aux.validate()?;
        Ok(Self { aux, params })
    }

    pub fn params(&self) -> &GaseousParams {
        &self.params
    }

    /// Ozone transmittance for every band. `ozone` is in Dobson units.
    pub fn ozone_transmittance(&self, air_mass: f64, ozone: f64) -> [f64; MERIS_NUM_BANDS] {
        let mut t = [1.0; MERIS_NUM_BANDS];
        for (b, t_b) in t.iter_mut().enumerate() {
            *t_b = (-ozone / 1000.0 * air_mass * self.aux.ozone_optical_thickness[b]).exp();
        }
        t
    }

    /// O2 polynomial for the detector's 760 nm wavelength, interpolated
    /// between the bracketing spectral shift bins
    pub fn o2_coefficients(&self, detector: usize) -> [f64; GAS_POLY_ORDER] {
        let wavelength = self.aux.central_wavelength_at(BB760, detector);
        shift_interpolated(
            wavelength,
            &self.aux.spectral_shift_wavelengths,
            &self.aux.o2_coefficients,
        )
    }

    /// H2O polynomial of a band. The 900 nm band depends on the detector.
    pub fn h2o_coefficients(&self, band: usize, detector: usize) -> [f64; GAS_POLY_ORDER] {
        if band == BB900 {
            let wavelength = self.aux.central_wavelength_at(BB900, detector);
            return shift_interpolated(
                wavelength,
                &self.aux.h2o_shift_wavelengths,
                &self.aux.h2o_shift_coefficients,
            );
        }
        let mut coefs = [0.0; GAS_POLY_ORDER];
        for (k, c) in coefs.iter_mut().enumerate() {
            *c = self.aux.h2o_coefficients[[band, k]];
        }
        coefs
    }

    /// Total gaseous transmittance per band.
    ///
    /// With `pcd_poly` set the O2 transmittance is not trusted and kept at 1.
    pub fn transmittance(
        &self,
        t_o3: &[f64; MERIS_NUM_BANDS],
        ratios: &BandRatios,
        detector: usize,
        pcd_poly: bool,
    ) -> [f64; MERIS_NUM_BANDS] {
        let mut t = *t_o3;

        if !pcd_poly {
            t[BB760] *= polynomial(&self.o2_coefficients(detector), ratios.eta);
        }

        for (band, t_b) in t.iter_mut().enumerate() {
            let coefs = self.h2o_coefficients(band, detector);
            if coefs.iter().any(|&c| c != 0.0) {
                *t_b *= polynomial(&coefs, ratios.x2);
            }
        }
        t
    }

    /// Correct one pixel, writing `rho_ng`. Returns the transmittance and
    /// whether any band fell back to its TOA value.
    pub fn correct_pixel(
        &self,
        rho_toa: &[f64; MERIS_NUM_BANDS],
        t_o3: &[f64; MERIS_NUM_BANDS],
        ratios: &BandRatios,
        detector: usize,
        pcd_poly: bool,
        rho_ng: &mut [f64; MERIS_NUM_BANDS],
    ) -> ([f64; MERIS_NUM_BANDS], bool) {
        let t = self.transmittance(t_o3, ratios, detector, pcd_poly);
        let mut output_error = false;
        for b in 0..MERIS_NUM_BANDS {
            if t[b] > MIN_TRANSMITTANCE && t[b] <= 1.0 {
                rho_ng[b] = rho_toa[b] / t[b];
            } else {
                rho_ng[b] = rho_toa[b];
                output_error = true;
            }
        }
        (t, output_error)
    }

    fn is_eligible(&self, pixel: &PixelRecord) -> bool {
        !pixel.is_invalid()
            && !pixel.is_cloud()
            && (self.params.correct_water || pixel.altitude >= MIN_LAND_ALTITUDE || pixel.is_l1_land())
    }

    /// Correct every pixel of a block in place.
    ///
    /// `pixels` is in row-major order; the first entry is the block corner
    /// that supplies air mass and ozone. Skipped pixels get `BAD_VALUE` on
    /// every band.
    pub fn correct_block(&self, pixels: &mut [PixelRecord]) -> GasBlockResult {
        let mut flags = vec![GasFlags::empty(); pixels.len()];
        let mut transmittance = if self.params.export_transmittance {
            Some(vec![[BAD_VALUE as f64; MERIS_NUM_BANDS]; pixels.len()])
        } else {
            None
        };

        let mut water_sums = [0.0; MERIS_NUM_BANDS];
        let mut any_water = false;
        for (pixel, flag) in pixels.iter_mut().zip(flags.iter_mut()) {
            if self.is_eligible(pixel) {
                flag.set(GasFlags::DO_CORRECT, true);
                if !pixel.is_l1_land() {
                    any_water = true;
                    for b in BB753..=BB900 {
                        water_sums[b] += pixel.rho_toa[b];
                    }
                }
            } else {
                pixel.rho_ng = [BAD_VALUE as f64; MERIS_NUM_BANDS];
            }
        }

        let corner = match pixels.first() {
            Some(corner) if flags.iter().any(|f| f.contains(GasFlags::DO_CORRECT)) => corner,
            _ => return GasBlockResult { flags, transmittance },
        };
        let t_o3 = self.ozone_transmittance(air_mass(corner.sza, corner.vza), corner.ozone);
        let water_ratios = if any_water {
            BandRatios::from_bands(&water_sums)
        } else {
            BandRatios { eta: 0.0, x2: 0.0, input_error: false }
        };

        for (i, pixel) in pixels.iter_mut().enumerate() {
            let flag = &mut flags[i];
            if !flag.contains(GasFlags::DO_CORRECT) {
                continue;
            }
            if pixel.sza > self.aux.sun_zenith_limit {
                flag.set(GasFlags::SUN70, true);
            }

            let ratios = if pixel.is_l1_land() {
                BandRatios::from_bands(&pixel.rho_toa)
            } else {
                water_ratios
            };
            flag.set(GasFlags::ORINP0, ratios.input_error);

            let pcd_poly = CloudFlags(pixel.cloud_flags).contains(CloudFlags::PCD_POL_P);
            let rho_toa = pixel.rho_toa;
            let (t, output_error) =
                self.correct_pixel(&rho_toa, &t_o3, &ratios, pixel.detector, pcd_poly, &mut pixel.rho_ng);
            flag.set(GasFlags::OROUT0, output_error);

            if let Some(tg) = transmittance.as_mut() {
                tg[i] = t;
            }
        }

        GasBlockResult { flags, transmittance }
    }
}

/// Evaluate `c[0] + c[1] x + c[2] x^2 + ...`
pub fn polynomial(coefs: &[f64], x: f64) -> f64 {
    coefs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

fn shift_interpolated(
    wavelength: f64,
    shift_wavelengths: &[f64],
    rows: &ndarray::Array2<f64>,
) -> [f64; GAS_POLY_ORDER] {
    let mut coefs = [0.0; GAS_POLY_ORDER];
    if rows.nrows() == 1 {
        for (k, c) in coefs.iter_mut().enumerate() {
            *c = rows[[0, k]];
        }
        return coefs;
    }
    let (fi, _) = interp_coord(wavelength, shift_wavelengths);
    for (k, c) in coefs.iter_mut().enumerate() {
        *c = rows[[fi.index, k]] * (1.0 - fi.fraction) + rows[[fi.index + 1, k]] * fi.fraction;
    }
    coefs
}
