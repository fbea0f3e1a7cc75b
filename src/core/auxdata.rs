//! MERIS calibration context.
//!
//! Holds every lookup table and constant consumed by the correction and
//! classification stages. A context is built once per scene, validated,
//! and then shared read-only (usually behind an `Arc`) by all blocks and
//! worker threads.

use crate::core::decision::DecisionTable;
use crate::core::lut::{Axis, Lut};
use crate::types::{meris_band::*, ClassifError, ClassifResult, MerisResolution, MERIS_NUM_BANDS};
use ndarray::Array2;

/// Order of the pressure retrieval polynomial
pub const PRESSURE_POLY_ORDER: usize = 12;
/// Number of coefficients of the O2 and H2O transmittance polynomials
pub const GAS_POLY_ORDER: usize = 4;
/// Fourier series terms of the Rayleigh multiple-scattering correction
pub const RAYSCATT_NUM_SER: usize = 3;
/// Polynomial order of the Rayleigh multiple-scattering correction
pub const RAYSCATT_NUM_ORD: usize = 4;

/// Per-band smile correction switches
#[derive(Debug, Clone, PartialEq)]
pub struct SmileParams {
    pub enabled: [bool; MERIS_NUM_BANDS],
    /// Lower and upper band bracketing each band's spectral derivative
    pub derivative_bands: [(usize, usize); MERIS_NUM_BANDS],
}

impl SmileParams {
    /// All bands disabled
    pub fn disabled() -> Self {
        Self {
            enabled: [false; MERIS_NUM_BANDS],
            derivative_bands: [(0, 0); MERIS_NUM_BANDS],
        }
    }

    /// Enable every band except the O2 and H2O absorption bands, using
    /// the nearest usable neighbours for the derivative
    pub fn neighbouring() -> Self {
        let usable: Vec<usize> = (0..MERIS_NUM_BANDS)
            .filter(|&b| b != BB760 && b != BB900)
            .collect();
        let last = usable.len() - 1;

        let mut params = Self::disabled();
        for (i, &band) in usable.iter().enumerate() {
            let (lo, hi) = match i {
                0 => (usable[0], usable[1]),
                i if i == last => (usable[last - 1], usable[last]),
                i => (usable[i - 1], usable[i + 1]),
            };
            params.enabled[band] = true;
            params.derivative_bands[band] = (lo, hi);
        }
        params
    }
}

/// Band ratio test used by the spectral slope flags
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlopeTest {
    pub numerator: usize,
    pub denominator: usize,
    pub low: f64,
    pub high: f64,
}

/// Complete MERIS calibration context
#[derive(Debug, Clone)]
pub struct MerisAuxData {
    pub resolution: MerisResolution,

    // Pressure and cloud tests
    pub max_pressure: f64,
    pub pressure_scale_height: f64,
    pub pressure_confidence: f64,
    pub land_decision: DecisionTable,
    pub water_decision: DecisionTable,
    pub bright_band: usize,
    pub slope_1: SlopeTest,
    pub slope_2: SlopeTest,
    /// Radiance above which a band counts as saturated
    pub saturation_radiance: [f64; MERIS_NUM_BANDS],
    /// Pressure polynomial coefficients (spectral shift x order)
    pub pressure_polynomials: Array2<f64>,
    /// Eta correction factor, axes (air mass, rho 753)
    pub eta_correction: Lut,
    /// Pressure difference thresholds, axes (sza, vza)
    pub dp_threshold_land: Lut,
    pub dp_threshold_ocean: Lut,
    /// Brightness thresholds, axes (sza, vza, delta azimuth)
    pub rhorc_442_land: Lut,
    pub rhorc_442_ocean: Lut,

    // Per detector tables (band x detector)
    pub solar_irradiance: Array2<f64>,
    pub central_wavelength: Array2<f64>,
    pub theoretical_wavelength: [f64; MERIS_NUM_BANDS],
    pub land_smile: SmileParams,
    pub water_smile: SmileParams,

    // Gaseous absorption
    pub ozone_optical_thickness: [f64; MERIS_NUM_BANDS],
    /// Sun zenith limit of the gas calibration, degrees
    pub sun_zenith_limit: f64,
    /// Wavelengths of the spectral-shift bins around 760 nm
    pub spectral_shift_wavelengths: Vec<f64>,
    /// O2 transmittance polynomials (spectral shift x order)
    pub o2_coefficients: Array2<f64>,
    /// H2O transmittance polynomials (band x order)
    pub h2o_coefficients: Array2<f64>,
    /// Wavelengths of the spectral-shift bins around 900 nm
    pub h2o_shift_wavelengths: Vec<f64>,
    /// H2O polynomials for the 900 nm band (spectral shift x order)
    pub h2o_shift_coefficients: Array2<f64>,

    // Rayleigh
    pub standard_pressure: f64,
    pub rayleigh_optical_thickness: [f64; MERIS_NUM_BANDS],
    pub phase_coefficients: [f64; 2],
    pub transmittance_coefficients: [f64; 3],
    /// Multiple scattering coefficients, axes (sza, vza), vector of
    /// `RAYSCATT_NUM_SER * RAYSCATT_NUM_ORD` values ordered series-major
    pub rayleigh_scattering: Lut,
    /// Spherical albedo, axis (optical thickness)
    pub rayleigh_albedo: Lut,

    // Land / water reclassification
    /// Thresholds for the glint branch, axes (sza, vza, delta azimuth)
    pub r7_threshold: Lut,
    /// Thresholds for the non-glint branch, same axes
    pub r13_threshold: Lut,
    pub alpha_threshold: [f64; 2],
    pub threshold_bands: [usize; 2],
    pub beta_land: f64,
    pub beta_water: f64,
    /// Glint reflectance, axes (scattering angle, vza, delta azimuth, wind speed, sza)
    pub glint_reflectance: Lut,

    pub seasonal_factor: f64,
    pub sun_earth_distance_square: f64,
}

impl MerisAuxData {
    pub fn detector_count(&self) -> usize {
        self.central_wavelength.ncols()
    }

    /// Central wavelength of a band as seen by one detector. Detector
    /// indices beyond the table use the last detector.
    pub fn central_wavelength_at(&self, band: usize, detector: usize) -> f64 {
        let det = detector.min(self.central_wavelength.ncols().saturating_sub(1));
        self.central_wavelength[[band, det]]
    }

    pub fn solar_irradiance_at(&self, band: usize, detector: usize) -> f64 {
        let det = detector.min(self.solar_irradiance.ncols().saturating_sub(1));
        self.solar_irradiance[[band, det]]
    }

    pub fn smile_params(&self, land: bool) -> &SmileParams {
        if land {
            &self.land_smile
        } else {
            &self.water_smile
        }
    }

    pub fn decision_table(&self, land: bool) -> &DecisionTable {
        if land {
            &self.land_decision
        } else {
            &self.water_decision
        }
    }

    /// Check every table for consistent shapes and valid indices.
    ///
    /// Called by every processor constructor so that a broken calibration
    /// aborts the scene before any pixel is touched.
    pub fn validate(&self) -> ClassifResult<()> {
        let detectors = self.resolution.detector_count();
        check_shape("solar_irradiance", &self.solar_irradiance, MERIS_NUM_BANDS, detectors)?;
        check_shape("central_wavelength", &self.central_wavelength, MERIS_NUM_BANDS, detectors)?;

        let shifts = self.spectral_shift_wavelengths.len();
        check_increasing("spectral_shift_wavelengths", &self.spectral_shift_wavelengths)?;
        check_shape("o2_coefficients", &self.o2_coefficients, shifts, GAS_POLY_ORDER)?;
        check_shape(
            "pressure_polynomials",
            &self.pressure_polynomials,
            shifts,
            PRESSURE_POLY_ORDER,
        )?;
        check_shape("h2o_coefficients", &self.h2o_coefficients, MERIS_NUM_BANDS, GAS_POLY_ORDER)?;
        check_increasing("h2o_shift_wavelengths", &self.h2o_shift_wavelengths)?;
        check_shape(
            "h2o_shift_coefficients",
            &self.h2o_shift_coefficients,
            self.h2o_shift_wavelengths.len(),
            GAS_POLY_ORDER,
        )?;

        check_lut(&self.eta_correction, 2, 1)?;
        check_lut(&self.dp_threshold_land, 2, 1)?;
        check_lut(&self.dp_threshold_ocean, 2, 1)?;
        check_lut(&self.rhorc_442_land, 3, 1)?;
        check_lut(&self.rhorc_442_ocean, 3, 1)?;
        check_lut(&self.rayleigh_scattering, 2, RAYSCATT_NUM_SER * RAYSCATT_NUM_ORD)?;
        check_lut(&self.rayleigh_albedo, 1, 1)?;
        check_lut(&self.r7_threshold, 3, 1)?;
        check_lut(&self.r13_threshold, 3, 1)?;
        check_lut(&self.glint_reflectance, 5, 1)?;

        let bands = [
            ("bright_band", self.bright_band),
            ("slope_1.numerator", self.slope_1.numerator),
            ("slope_1.denominator", self.slope_1.denominator),
            ("slope_2.numerator", self.slope_2.numerator),
            ("slope_2.denominator", self.slope_2.denominator),
            ("threshold_bands[0]", self.threshold_bands[0]),
            ("threshold_bands[1]", self.threshold_bands[1]),
        ];
        for (name, band) in bands {
            if band >= MERIS_NUM_BANDS {
                return Err(ClassifError::AuxData(format!(
                    "{} refers to band {} of {}",
                    name, band, MERIS_NUM_BANDS
                )));
            }
        }
        for params in [&self.land_smile, &self.water_smile] {
            for (band, &(lo, hi)) in params.derivative_bands.iter().enumerate() {
                if params.enabled[band] && (lo >= MERIS_NUM_BANDS || hi >= MERIS_NUM_BANDS || lo == hi) {
                    return Err(ClassifError::AuxData(format!(
                        "Smile derivative bands ({}, {}) for band {} are invalid",
                        lo, hi, band
                    )));
                }
            }
        }

        let positives = [
            ("standard_pressure", self.standard_pressure),
            ("pressure_scale_height", self.pressure_scale_height),
            ("max_pressure", self.max_pressure),
            ("seasonal_factor", self.seasonal_factor),
        ];
        for (name, value) in positives {
            if !(value > 0.0 && value.is_finite()) {
                return Err(ClassifError::AuxData(format!("{} must be positive, got {}", name, value)));
            }
        }
        if self.solar_irradiance.iter().any(|&e| !(e > 0.0)) {
            return Err(ClassifError::AuxData(
                "solar_irradiance must be positive for every detector".to_string(),
            ));
        }

        log::debug!(
            "Calibration context valid: {:?}, {} detectors, {} spectral shifts",
            self.resolution,
            detectors,
            shifts
        );
        Ok(())
    }

    /// Physically plausible calibration context built from closed-form
    /// approximations.
    ///
    /// Every detector sees the nominal wavelength, gas polynomials are
    /// neutral and the pressure polynomial maps a 760/753 ratio of 0.6 to
    /// standard pressure. Useful for demos and for exercising the pipeline
    /// without the operational calibration files.
    pub fn synthetic(resolution: MerisResolution) -> ClassifResult<Self> {
        let detectors = resolution.detector_count();
        let standard_pressure = 1013.25;

        let central_wavelength =
            Array2::from_shape_fn((MERIS_NUM_BANDS, detectors), |(b, _)| WAVELENGTHS[b]);
        let solar_irradiance =
            Array2::from_shape_fn((MERIS_NUM_BANDS, detectors), |(b, _)| solar_irradiance_approx(WAVELENGTHS[b]));

        let mut rayleigh_optical_thickness = [0.0; MERIS_NUM_BANDS];
        for (b, tau) in rayleigh_optical_thickness.iter_mut().enumerate() {
            *tau = rayleigh_tau_approx(WAVELENGTHS[b]);
        }

        let ozone_optical_thickness = [
            0.0004, 0.0030, 0.0213, 0.0405, 0.1042, 0.1090, 0.0508, 0.0394, 0.0200, 0.0095, 0.0087,
            0.0072, 0.0021, 0.0015, 0.0010,
        ];

        // Spectral shift bins every 0.2 nm around the 760 nm band
        let spectral_shift_wavelengths: Vec<f64> =
            (0..21).map(|i| WAVELENGTHS[BB760] - 2.0 + 0.2 * i as f64).collect();
        let h2o_shift_wavelengths: Vec<f64> =
            (0..11).map(|i| WAVELENGTHS[BB900] - 2.0 + 0.4 * i as f64).collect();

        let neutral_poly = |rows: usize| {
            Array2::from_shape_fn((rows, GAS_POLY_ORDER), |(_, k)| if k == 0 { 1.0 } else { 0.0 })
        };

        // log10(m * P^2) as a linear function of the corrected ratio, anchored
        // at ratio 0.6 -> standard pressure and 0.9 -> 300 hPa for air mass 2.17
        let reference_air_mass = 2.17;
        let p_at = |p: f64| (reference_air_mass * p * p).log10();
        let slope = (p_at(300.0) - p_at(standard_pressure)) / 0.3;
        let intercept = p_at(standard_pressure) - slope * 0.6;
        let pressure_polynomials = Array2::from_shape_fn(
            (spectral_shift_wavelengths.len(), PRESSURE_POLY_ORDER),
            |(_, i)| match i {
                0 => intercept,
                1 => slope,
                _ => 0.0,
            },
        );

        let sza_axis = || Axis::linspace(0.0, 10.0, 9);
        let vza_axis = || Axis::linspace(0.0, 10.0, 7);
        let dphi_axis = || Axis::linspace(0.0, 45.0, 5);

        let eta_correction = Lut::constant(
            "eta_correction",
            vec![Axis::linspace(2.0, 1.0, 8)?, Axis::linspace(0.0, 0.1, 11)?],
            1.0,
        )?;

        let mut scattering = Vec::new();
        let n_sza = sza_axis()?.len();
        let n_vza = vza_axis()?.len();
        for _ in 0..(n_sza * n_vza) {
            for _series in 0..RAYSCATT_NUM_SER {
                scattering.extend_from_slice(&[1.0, 0.0, 0.0, 0.0]);
            }
        }
        let rayleigh_scattering = Lut::from_vec(
            "rayleigh_scattering",
            vec![sza_axis()?, vza_axis()?],
            RAYSCATT_NUM_SER * RAYSCATT_NUM_ORD,
            scattering,
        )?;

        let rayleigh_albedo = Lut::from_fn(
            "rayleigh_albedo",
            vec![Axis::linspace(0.0, 0.05, 17)?],
            |c| spherical_albedo_approx(c[0]),
        )?;

        let glint_reflectance = Lut::from_fn(
            "glint_reflectance",
            vec![
                Axis::linspace(0.0, 30.0, 7)?,
                Axis::linspace(0.0, 15.0, 5)?,
                dphi_axis()?,
                Axis::linspace(0.0, 5.0, 5)?,
                Axis::linspace(0.0, 20.0, 5)?,
            ],
            |c| {
                let chi = c[0];
                let wind = c[3];
                0.05 * (-chi / 20.0).exp() * (1.0 + 0.05 * wind)
            },
        )?;

        Ok(Self {
            resolution,
            max_pressure: 1100.0,
            pressure_scale_height: 8000.0,
            pressure_confidence: 40.0,
            land_decision: DecisionTable::default_land(),
            water_decision: DecisionTable::default_water(),
            bright_band: BB442,
            slope_1: SlopeTest { numerator: BB490, denominator: BB442, low: 0.8, high: 1.2 },
            slope_2: SlopeTest { numerator: BB865, denominator: BB665, low: 0.8, high: 1.2 },
            saturation_radiance: [1.0e4; MERIS_NUM_BANDS],
            pressure_polynomials,
            eta_correction,
            dp_threshold_land: Lut::constant("dp_threshold_land", vec![sza_axis()?, vza_axis()?], 50.0)?,
            dp_threshold_ocean: Lut::constant("dp_threshold_ocean", vec![sza_axis()?, vza_axis()?], 50.0)?,
            rhorc_442_land: Lut::constant("rhorc_442_land", vec![sza_axis()?, vza_axis()?, dphi_axis()?], 0.3)?,
            rhorc_442_ocean: Lut::constant("rhorc_442_ocean", vec![sza_axis()?, vza_axis()?, dphi_axis()?], 0.2)?,
            solar_irradiance,
            central_wavelength,
            theoretical_wavelength: WAVELENGTHS,
            land_smile: SmileParams::neighbouring(),
            water_smile: SmileParams::neighbouring(),
            ozone_optical_thickness,
            sun_zenith_limit: 70.0,
            o2_coefficients: neutral_poly(spectral_shift_wavelengths.len()),
            spectral_shift_wavelengths,
            h2o_coefficients: neutral_poly(MERIS_NUM_BANDS),
            h2o_shift_coefficients: neutral_poly(h2o_shift_wavelengths.len()),
            h2o_shift_wavelengths,
            standard_pressure,
            rayleigh_optical_thickness,
            phase_coefficients: [0.9587, 0.0413],
            transmittance_coefficients: [0.0, 1.0, 0.0],
            rayleigh_scattering,
            rayleigh_albedo,
            r7_threshold: Lut::constant("r7_threshold", vec![sza_axis()?, vza_axis()?, dphi_axis()?], 0.05)?,
            r13_threshold: Lut::constant("r13_threshold", vec![sza_axis()?, vza_axis()?, dphi_axis()?], 0.05)?,
            alpha_threshold: [1.0, 1.0],
            threshold_bands: [BB665, BB865],
            beta_land: 1.5,
            beta_water: 1.0,
            glint_reflectance,
            seasonal_factor: 1.0,
            sun_earth_distance_square: 149_597_870.0e3_f64.powi(2),
        })
    }
}

/// Rayleigh optical thickness at sea level (wavelength in nm)
fn rayleigh_tau_approx(wavelength_nm: f64) -> f64 {
    let l = wavelength_nm / 1000.0;
    0.008569 * l.powi(-4) * (1.0 + 0.0113 * l.powi(-2) + 0.00013 * l.powi(-4))
}

/// Rayleigh spherical albedo as a function of optical thickness
fn spherical_albedo_approx(tau: f64) -> f64 {
    tau * (0.92 - 0.33 * tau)
}

/// Smooth approximation of the extraterrestrial solar irradiance (mW/m2/nm)
fn solar_irradiance_approx(wavelength_nm: f64) -> f64 {
    let peak = 1850.0;
    let x = (wavelength_nm - 480.0) / 450.0;
    peak * (-x * x).exp().max(0.3)
}

fn check_shape(name: &str, array: &Array2<f64>, rows: usize, cols: usize) -> ClassifResult<()> {
    if array.dim() != (rows, cols) {
        return Err(ClassifError::AuxData(format!(
            "{} has shape {:?}, expected ({}, {})",
            name,
            array.dim(),
            rows,
            cols
        )));
    }
    Ok(())
}

fn check_increasing(name: &str, values: &[f64]) -> ClassifResult<()> {
    if values.len() < 2 || values.windows(2).any(|w| w[1] <= w[0]) {
        return Err(ClassifError::AuxData(format!(
            "{} must hold at least two strictly increasing values",
            name
        )));
    }
    Ok(())
}

fn check_lut(lut: &Lut, ndim: usize, vector_len: usize) -> ClassifResult<()> {
    if lut.ndim() != ndim || lut.vector_len() != vector_len {
        return Err(ClassifError::AuxData(format!(
            "{} has {} axes x {} values, expected {} x {}",
            lut.name(),
            lut.ndim(),
            lut.vector_len(),
            ndim,
            vector_len
        )));
    }
    Ok(())
}
