//! Per-detector spectral smile correction

use crate::core::auxdata::{MerisAuxData, SmileParams};
use crate::types::{ClassifResult, PixelRecord, BAD_VALUE, MERIS_NUM_BANDS};
use std::sync::Arc;

pub struct SmileCorrection {
    aux: Arc<MerisAuxData>,
}

impl SmileCorrection {
    pub fn new(aux: Arc<MerisAuxData>) -> ClassifResult<Self> {
        aux.validate()?;
        Ok(Self { aux })
    }

    /// Shift each enabled band from the detector's wavelength to the
    /// nominal one using the slope between its two derivative bands
    pub fn correct(
        &self,
        rho: &[f64; MERIS_NUM_BANDS],
        detector: usize,
        params: &SmileParams,
    ) -> [f64; MERIS_NUM_BANDS] {
        let mut corrected = *rho;
        for band in 0..MERIS_NUM_BANDS {
            if !params.enabled[band] {
                continue;
            }
            let (lo, hi) = params.derivative_bands[band];
            let dw = self.aux.central_wavelength_at(hi, detector) - self.aux.central_wavelength_at(lo, detector);
            if dw == 0.0 {
                continue;
            }
            let derivative = (rho[hi] - rho[lo]) / dw;
            corrected[band] = rho[band]
                + derivative * (self.aux.theoretical_wavelength[band] - self.aux.central_wavelength_at(band, detector));
        }
        corrected
    }

    /// Smile-corrected Rayleigh reflectance for every pixel of a block.
    ///
    /// Must run after land/water reclassification: the consolidated land
    /// flag selects the parameter set. Uncorrected pixels stay `BAD_VALUE`.
    pub fn correct_block(&self, pixels: &[PixelRecord]) -> Vec<[f64; MERIS_NUM_BANDS]> {
        pixels
            .iter()
            .map(|pixel| {
                if pixel.brr[0] == BAD_VALUE as f64 {
                    return [BAD_VALUE as f64; MERIS_NUM_BANDS];
                }
                let params = self.aux.smile_params(pixel.is_land_consolidated());
                self.correct(&pixel.brr, pixel.detector, params)
            })
            .collect()
    }
}
