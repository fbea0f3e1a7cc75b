//! Surface pressure retrieval and the pressure, brightness and slope tests.
//!
//! The retrieval uses the O2 A-band ratio 760/753 nm. Its polynomial is
//! selected by the spectral shift of the detector's 760 nm channel, and the
//! results of the two bracketing shift bins are blended.

use crate::core::auxdata::{MerisAuxData, SlopeTest};
use crate::core::gaseous::polynomial;
use crate::core::lut::interp_coord;
use crate::types::{meris_band::*, ClassifResult, MERIS_NUM_BANDS};
use std::sync::Arc;

/// Largest decimal exponent representable in an f64
const MAX_LOG10: f64 = 308.0;

/// Retrieved pressure (hPa) with its retrieval error flag
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pressure {
    pub value: f64,
    pub error: bool,
}

/// Outcome of the three pressure threshold tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PressureTests {
    pub low_p_nn: bool,
    pub low_p_poly: bool,
    pub delta_p: bool,
}

pub struct PressureRetrieval {
    aux: Arc<MerisAuxData>,
}

impl PressureRetrieval {
    pub fn new(aux: Arc<MerisAuxData>) -> ClassifResult<Self> {
        aux.validate()?;
        Ok(Self { aux })
    }

    /// Surface pressure from TOA reflectances at 753 and 760 nm
    pub fn compute_pressure(&self, rho_753: f64, rho_760: f64, air_mass: f64, detector: usize) -> Pressure {
        let mut error = false;

        let shift = interp_coord(
            self.aux.central_wavelength_at(BB760, detector),
            &self.aux.spectral_shift_wavelengths,
        )
        .0;
        // Outside the shift table the edge bin is used with no weight on its neighbour
        let fraction = shift.fraction.clamp(0.0, 1.0);

        let eta = if rho_753 > 0.0 {
            rho_760 / rho_753
        } else {
            error = true;
            0.0
        };

        let c = self.aux.eta_correction.interpolate(&[air_mass, rho_753]);
        let eta_c = eta * c;

        let p1 = self.pressure_for_shift(eta_c, air_mass, shift.index);
        let p2 = self.pressure_for_shift(eta_c, air_mass, shift.index + 1);
        let value = if p1.error {
            p2.value
        } else if p2.error {
            p1.value
        } else {
            (1.0 - fraction) * p1.value + fraction * p2.value
        };

        Pressure {
            value,
            error: error || p1.error || p2.error,
        }
    }

    /// Pressure from the polynomial of one spectral shift bin.
    ///
    /// The polynomial yields log10(air mass * P^2).
    pub fn pressure_for_shift(&self, eta_c: f64, air_mass: f64, shift: usize) -> Pressure {
        let rows = self.aux.pressure_polynomials.nrows();
        let row = self.aux.pressure_polynomials.row(shift.min(rows - 1));
        let coefs: Vec<f64> = row.iter().copied().collect();
        let log_mp2 = polynomial(&coefs, eta_c);

        if log_mp2.abs() > MAX_LOG10 {
            return Pressure { value: 0.0, error: true };
        }
        let value = (10f64.powf(log_mp2) / air_mass).sqrt();
        if value > self.aux.max_pressure {
            Pressure { value: self.aux.max_pressure, error: true }
        } else {
            Pressure { value, error: false }
        }
    }

    /// Pressure difference threshold for the geometry
    pub fn pressure_threshold(&self, sza: f64, vza: f64, land: bool) -> f64 {
        let lut = if land {
            &self.aux.dp_threshold_land
        } else {
            &self.aux.dp_threshold_ocean
        };
        lut.interpolate(&[sza, vza])
    }

    /// Compare retrieved and external pressures with the reference pressure.
    ///
    /// Without an external (cloud-top or NN) pressure the NN test is false.
    pub fn threshold_tests(
        &self,
        reference: f64,
        retrieved: f64,
        external: Option<f64>,
        threshold: f64,
    ) -> PressureTests {
        PressureTests {
            low_p_nn: external.map_or(false, |p| p < reference - threshold),
            low_p_poly: retrieved < reference - threshold,
            delta_p: (reference - retrieved).abs() > self.aux.pressure_confidence,
        }
    }

    /// Brightness threshold on Rayleigh-subtracted reflectance at 442 nm
    pub fn rhorc_442_threshold(&self, sza: f64, vza: f64, delta_azimuth: f64, land: bool) -> f64 {
        let lut = if land {
            &self.aux.rhorc_442_land
        } else {
            &self.aux.rhorc_442_ocean
        };
        lut.interpolate(&[sza, vza, delta_azimuth])
    }

    pub fn is_saturated(&self, radiance: f64, band: usize) -> bool {
        radiance > self.aux.saturation_radiance[band]
    }

    pub fn is_bright(&self, rho_ag: &[f64; MERIS_NUM_BANDS], threshold: f64, radiance: &[f64; MERIS_NUM_BANDS]) -> bool {
        let band = self.aux.bright_band;
        rho_ag[band] >= threshold || self.is_saturated(radiance[band], band)
    }

    /// Spectral slope test. A non-positive denominator fails the test.
    pub fn is_slope(&self, test: &SlopeTest, rho_ag: &[f64; MERIS_NUM_BANDS], radiance: &[f64; MERIS_NUM_BANDS]) -> bool {
        if rho_ag[test.denominator] <= 0.0 {
            return false;
        }
        let slope = rho_ag[test.numerator] / rho_ag[test.denominator];
        (slope >= test.low && slope <= test.high) || self.is_saturated(radiance[test.numerator], test.numerator)
    }

    pub fn slope_1(&self, rho_ag: &[f64; MERIS_NUM_BANDS], radiance: &[f64; MERIS_NUM_BANDS]) -> bool {
        self.is_slope(&self.aux.slope_1, rho_ag, radiance)
    }

    pub fn slope_2(&self, rho_ag: &[f64; MERIS_NUM_BANDS], radiance: &[f64; MERIS_NUM_BANDS]) -> bool {
        self.is_slope(&self.aux.slope_2, rho_ag, radiance)
    }
}
