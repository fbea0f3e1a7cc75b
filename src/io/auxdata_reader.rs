//! Calibration context loader.
//!
//! A calibration directory holds one small XML document per table, plain
//! (`<name>.xml`) or gzip compressed (`<name>.xml.gz`). Numbers are stored
//! as whitespace-separated text:
//!
//! ```xml
//! <lut>
//!   <axis>0 10 20 30</axis>
//!   <axis>0 15 30</axis>
//!   <vectorLength>1</vectorLength>
//!   <values>...</values>
//! </lut>
//! ```
//!
//! Matrices use `<rows>`, `<cols>` and `<values>`; vectors only `<values>`.
//! Scalars live in `constants.xml`, the two cloud decision tables in
//! `decision_tables.xml`. Any table that is absent keeps the value of
//! [`MerisAuxData::synthetic`].

use crate::core::auxdata::{MerisAuxData, SlopeTest, SmileParams};
use crate::core::decision::DecisionTable;
use crate::core::geometry::seasonal_factor;
use crate::core::lut::{Axis, Lut};
use crate::types::{ClassifError, ClassifResult, MerisResolution, MERIS_NUM_BANDS};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use std::path::{Path, PathBuf};

/// Environment variable naming the calibration directory
pub const AUXDATA_ENV_VAR: &str = "CIRRUS_AUXDATA";

/// Reader for a calibration directory
#[derive(Debug, Clone)]
pub struct AuxDataReader {
    dir: PathBuf,
}

impl AuxDataReader {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Directory from `CIRRUS_AUXDATA`, else the platform data directory
    pub fn from_env() -> ClassifResult<Self> {
        if let Some(dir) = std::env::var_os(AUXDATA_ENV_VAR) {
            return Ok(Self::new(dir));
        }
        Self::default_dir().map(Self::new).ok_or_else(|| {
            ClassifError::Config(format!(
                "No calibration directory: set {} or provide a platform data directory",
                AUXDATA_ENV_VAR
            ))
        })
    }

    /// `<data dir>/cirrus/auxdata`
    pub fn default_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("cirrus").join("auxdata"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Text of `<name>.xml` or `<name>.xml.gz`, `None` when neither exists
    pub fn read_document(&self, name: &str) -> ClassifResult<Option<String>> {
        let plain = self.dir.join(format!("{}.xml", name));
        if plain.is_file() {
            return Ok(Some(std::fs::read_to_string(&plain)?));
        }
        let compressed = self.dir.join(format!("{}.xml.gz", name));
        if compressed.is_file() {
            let bytes = std::fs::read(&compressed)?;
            return decompress(&bytes).map(Some);
        }
        Ok(None)
    }

    /// Build and validate the calibration context for one resolution
    pub fn load(&self, resolution: MerisResolution) -> ClassifResult<MerisAuxData> {
        if !self.dir.is_dir() {
            return Err(ClassifError::AuxData(format!(
                "Calibration directory {} does not exist",
                self.dir.display()
            )));
        }
        log::info!("Loading {:?} calibration from {}", resolution, self.dir.display());
        let start = std::time::Instant::now();

        let mut aux = MerisAuxData::synthetic(resolution)?;
        let mut loaded = 0usize;
        let mut missing = Vec::new();

        match self.read_document("constants")? {
            Some(xml) => {
                apply_constants(&mut aux, &xml)?;
                loaded += 1;
            }
            None => missing.push("constants"),
        }

        match self.read_document("decision_tables")? {
            Some(xml) => {
                if let Some(text) = extract_element(&xml, "land") {
                    aux.land_decision = DecisionTable::parse(&text)?;
                }
                if let Some(text) = extract_element(&xml, "water") {
                    aux.water_decision = DecisionTable::parse(&text)?;
                }
                loaded += 1;
            }
            None => missing.push("decision_tables"),
        }

        for (name, smile) in [("smile_land", &mut aux.land_smile), ("smile_water", &mut aux.water_smile)] {
            match self.read_document(name)? {
                Some(xml) => {
                    *smile = parse_smile(name, &xml)?;
                    loaded += 1;
                }
                None => missing.push(name),
            }
        }

        let luts = [
            ("eta_correction", &mut aux.eta_correction),
            ("dp_threshold_land", &mut aux.dp_threshold_land),
            ("dp_threshold_ocean", &mut aux.dp_threshold_ocean),
            ("rhorc_442_land", &mut aux.rhorc_442_land),
            ("rhorc_442_ocean", &mut aux.rhorc_442_ocean),
            ("rayleigh_scattering", &mut aux.rayleigh_scattering),
            ("rayleigh_albedo", &mut aux.rayleigh_albedo),
            ("r7_threshold", &mut aux.r7_threshold),
            ("r13_threshold", &mut aux.r13_threshold),
            ("glint_reflectance", &mut aux.glint_reflectance),
        ];
        for (name, lut) in luts {
            match self.read_document(name)? {
                Some(xml) => {
                    *lut = parse_lut(name, &xml)?;
                    loaded += 1;
                }
                None => missing.push(name),
            }
        }

        let matrices = [
            ("solar_irradiance", &mut aux.solar_irradiance),
            ("central_wavelength", &mut aux.central_wavelength),
            ("pressure_polynomials", &mut aux.pressure_polynomials),
            ("o2_coefficients", &mut aux.o2_coefficients),
            ("h2o_coefficients", &mut aux.h2o_coefficients),
            ("h2o_shift_coefficients", &mut aux.h2o_shift_coefficients),
        ];
        for (name, matrix) in matrices {
            match self.read_document(name)? {
                Some(xml) => {
                    *matrix = parse_matrix(name, &xml)?;
                    loaded += 1;
                }
                None => missing.push(name),
            }
        }

        let vectors = [
            ("spectral_shift_wavelengths", &mut aux.spectral_shift_wavelengths),
            ("h2o_shift_wavelengths", &mut aux.h2o_shift_wavelengths),
        ];
        for (name, vector) in vectors {
            match self.read_document(name)? {
                Some(xml) => {
                    *vector = parse_vector(name, &xml)?;
                    loaded += 1;
                }
                None => missing.push(name),
            }
        }

        let band_vectors = [
            ("rayleigh_optical_thickness", &mut aux.rayleigh_optical_thickness),
            ("ozone_optical_thickness", &mut aux.ozone_optical_thickness),
            ("saturation_radiance", &mut aux.saturation_radiance),
            ("theoretical_wavelength", &mut aux.theoretical_wavelength),
        ];
        for (name, bands) in band_vectors {
            match self.read_document(name)? {
                Some(xml) => {
                    *bands = fixed::<MERIS_NUM_BANDS>(name, &parse_vector(name, &xml)?)?;
                    loaded += 1;
                }
                None => missing.push(name),
            }
        }

        for name in &missing {
            log::warn!("Calibration table '{}' not found, using the built-in approximation", name);
        }

        aux.validate()?;
        log::info!(
            "Calibration loaded in {:.2?}: {} tables read, {} approximated",
            start.elapsed(),
            loaded,
            missing.len()
        );
        Ok(aux)
    }

    /// Load and set the seasonal factor for an acquisition window
    pub fn load_for_acquisition(
        &self,
        resolution: MerisResolution,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> ClassifResult<MerisAuxData> {
        let mut aux = self.load(resolution)?;
        aux.seasonal_factor = seasonal_factor(start, stop, aux.sun_earth_distance_square);
        log::debug!("Seasonal factor for {} .. {}: {:.6}", start, stop, aux.seasonal_factor);
        aux.validate()?;
        Ok(aux)
    }
}

fn decompress(bytes: &[u8]) -> ClassifResult<String> {
    use flate2::read::GzDecoder;
    use std::io::Read;

    let mut decoder = GzDecoder::new(bytes);
    let mut text = String::new();
    decoder
        .read_to_string(&mut text)
        .map_err(|e| ClassifError::AuxData(format!("Failed to decompress gzip data: {}", e)))?;
    Ok(text)
}

/// Content of the first `<tag>` element
pub fn extract_element(xml: &str, tag: &str) -> Option<String> {
    let pattern = format!(r"(?s)<{}>(.*?)</{}>", tag, tag);
    let regex = regex::Regex::new(&pattern).ok()?;
    regex
        .captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Content of every `<tag>` element, in document order
pub fn extract_all(xml: &str, tag: &str) -> Vec<String> {
    let pattern = format!(r"(?s)<{}>(.*?)</{}>", tag, tag);
    match regex::Regex::new(&pattern) {
        Ok(regex) => regex
            .captures_iter(xml)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Whitespace-separated numbers
pub fn parse_numbers(name: &str, text: &str) -> ClassifResult<Vec<f64>> {
    text.split_whitespace()
        .map(|token| {
            token.parse::<f64>().map_err(|_| {
                ClassifError::InvalidFormat(format!("{}: '{}' is not a number", name, token))
            })
        })
        .collect()
}

fn required(name: &str, xml: &str, tag: &str) -> ClassifResult<String> {
    extract_element(xml, tag)
        .ok_or_else(|| ClassifError::InvalidFormat(format!("{}: missing <{}> element", name, tag)))
}

fn fixed<const N: usize>(name: &str, values: &[f64]) -> ClassifResult<[f64; N]> {
    values.try_into().map_err(|_| {
        ClassifError::InvalidFormat(format!("{}: expected {} values, found {}", name, N, values.len()))
    })
}

fn parse_count(name: &str, xml: &str, tag: &str) -> ClassifResult<usize> {
    let text = required(name, xml, tag)?;
    text.parse::<usize>()
        .map_err(|_| ClassifError::InvalidFormat(format!("{}: <{}> is not a count: '{}'", name, tag, text)))
}

fn parse_band(name: &str, value: f64) -> ClassifResult<usize> {
    if value >= 0.0 && value.fract() == 0.0 && (value as usize) < MERIS_NUM_BANDS {
        Ok(value as usize)
    } else {
        Err(ClassifError::InvalidFormat(format!("{}: {} is not a band index", name, value)))
    }
}

/// Lookup table with one `<axis>` element per dimension
pub fn parse_lut(name: &str, xml: &str) -> ClassifResult<Lut> {
    let axes = extract_all(xml, "axis")
        .iter()
        .map(|text| Axis::new(parse_numbers(name, text)?))
        .collect::<ClassifResult<Vec<_>>>()?;
    let vector_len = match extract_element(xml, "vectorLength") {
        Some(_) => parse_count(name, xml, "vectorLength")?,
        None => 1,
    };
    let values = parse_numbers(name, &required(name, xml, "values")?)?;
    Lut::from_vec(name, axes, vector_len, values)
}

pub fn parse_matrix(name: &str, xml: &str) -> ClassifResult<Array2<f64>> {
    let rows = parse_count(name, xml, "rows")?;
    let cols = parse_count(name, xml, "cols")?;
    let values = parse_numbers(name, &required(name, xml, "values")?)?;
    let found = values.len();
    Array2::from_shape_vec((rows, cols), values).map_err(|_| {
        ClassifError::InvalidFormat(format!(
            "{}: {}x{} matrix needs {} values, found {}",
            name,
            rows,
            cols,
            rows * cols,
            found
        ))
    })
}

pub fn parse_vector(name: &str, xml: &str) -> ClassifResult<Vec<f64>> {
    parse_numbers(name, &required(name, xml, "values")?)
}

/// Smile switches: per-band `<enabled>` 0/1 flags plus the `<lowerBand>`
/// and `<upperBand>` indices bracketing each derivative
pub fn parse_smile(name: &str, xml: &str) -> ClassifResult<SmileParams> {
    let enabled = fixed::<MERIS_NUM_BANDS>(name, &parse_numbers(name, &required(name, xml, "enabled")?)?)?;
    let lower = fixed::<MERIS_NUM_BANDS>(name, &parse_numbers(name, &required(name, xml, "lowerBand")?)?)?;
    let upper = fixed::<MERIS_NUM_BANDS>(name, &parse_numbers(name, &required(name, xml, "upperBand")?)?)?;

    let mut params = SmileParams::disabled();
    for band in 0..MERIS_NUM_BANDS {
        params.enabled[band] = enabled[band] != 0.0;
        params.derivative_bands[band] = (parse_band(name, lower[band])?, parse_band(name, upper[band])?);
    }
    Ok(params)
}

fn parse_slope(name: &str, text: &str) -> ClassifResult<SlopeTest> {
    let [numerator, denominator, low, high] = fixed::<4>(name, &parse_numbers(name, text)?)?;
    Ok(SlopeTest {
        numerator: parse_band(name, numerator)?,
        denominator: parse_band(name, denominator)?,
        low,
        high,
    })
}

/// Override the scalar constants present in `constants.xml`
fn apply_constants(aux: &mut MerisAuxData, xml: &str) -> ClassifResult<()> {
    let scalars = [
        ("maxPressure", &mut aux.max_pressure),
        ("pressureScaleHeight", &mut aux.pressure_scale_height),
        ("pressureConfidence", &mut aux.pressure_confidence),
        ("sunZenithLimit", &mut aux.sun_zenith_limit),
        ("standardPressure", &mut aux.standard_pressure),
        ("betaLand", &mut aux.beta_land),
        ("betaWater", &mut aux.beta_water),
        ("seasonalFactor", &mut aux.seasonal_factor),
        ("sunEarthDistanceSquare", &mut aux.sun_earth_distance_square),
    ];
    for (tag, field) in scalars {
        if let Some(text) = extract_element(xml, tag) {
            *field = fixed::<1>(tag, &parse_numbers(tag, &text)?)?[0];
        }
    }

    if let Some(text) = extract_element(xml, "alphaThreshold") {
        aux.alpha_threshold = fixed::<2>("alphaThreshold", &parse_numbers("alphaThreshold", &text)?)?;
    }
    if let Some(text) = extract_element(xml, "phaseCoefficients") {
        aux.phase_coefficients = fixed::<2>("phaseCoefficients", &parse_numbers("phaseCoefficients", &text)?)?;
    }
    if let Some(text) = extract_element(xml, "transmittanceCoefficients") {
        aux.transmittance_coefficients =
            fixed::<3>("transmittanceCoefficients", &parse_numbers("transmittanceCoefficients", &text)?)?;
    }
    if let Some(text) = extract_element(xml, "thresholdBands") {
        let [b0, b1] = fixed::<2>("thresholdBands", &parse_numbers("thresholdBands", &text)?)?;
        aux.threshold_bands = [parse_band("thresholdBands", b0)?, parse_band("thresholdBands", b1)?];
    }
    if let Some(text) = extract_element(xml, "brightBand") {
        let [band] = fixed::<1>("brightBand", &parse_numbers("brightBand", &text)?)?;
        aux.bright_band = parse_band("brightBand", band)?;
    }
    if let Some(text) = extract_element(xml, "slope1") {
        aux.slope_1 = parse_slope("slope1", &text)?;
    }
    if let Some(text) = extract_element(xml, "slope2") {
        aux.slope_2 = parse_slope("slope2", &text)?;
    }
    Ok(())
}
