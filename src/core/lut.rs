//! N-dimensional multilinear interpolation over calibration tables.
//!
//! A [`Lut`] holds one strictly increasing sample vector per axis and a
//! dense row-major value array. Queries outside an axis range are never an
//! error: the edge cell is used and the fraction extrapolates linearly from
//! the two outermost samples. Each table counts such queries so callers can
//! inspect how often geometry fell outside the calibrated range.

use crate::types::{ClassifError, ClassifResult};
use ndarray::{ArrayD, IxDyn};
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum number of axes supported by a single table
pub const MAX_AXES: usize = 5;

/// Integer cell plus fractional offset along one axis
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FractIndex {
    pub index: usize,
    pub fraction: f64,
}

/// Sample positions along one table axis
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    samples: Vec<f64>,
}

impl Axis {
    pub fn new(samples: Vec<f64>) -> ClassifResult<Self> {
        if samples.is_empty() {
            return Err(ClassifError::InvalidLut("Axis has no samples".to_string()));
        }
        if samples.iter().any(|v| !v.is_finite()) {
            return Err(ClassifError::InvalidLut("Axis contains non-finite samples".to_string()));
        }
        if samples.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ClassifError::InvalidLut(
                "Axis samples must be strictly increasing".to_string(),
            ));
        }
        Ok(Self { samples })
    }

    /// Evenly spaced axis from `start` with `count` samples
    pub fn linspace(start: f64, step: f64, count: usize) -> ClassifResult<Self> {
        Self::new((0..count).map(|i| start + step * i as f64).collect())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Locate `x` on the axis. The second value is `true` when `x` lies
    /// outside the sampled range.
    pub fn fract_index(&self, x: f64) -> (FractIndex, bool) {
        interp_coord(x, &self.samples)
    }
}

/// Fractional index of `x` on an increasing sample vector.
///
/// The cell index is clamped to `[0, len - 2]`; the fraction is not, so
/// values beyond either end extrapolate from the edge cell.
pub fn interp_coord(x: f64, samples: &[f64]) -> (FractIndex, bool) {
    let n = samples.len();
    if n < 2 {
        return (FractIndex::default(), n == 1 && x != samples[0]);
    }
    let out_of_range = x < samples[0] || x > samples[n - 1];

    // First sample strictly greater than x, then step back one cell
    let upper = samples.partition_point(|&s| s <= x);
    let index = upper.saturating_sub(1).min(n - 2);
    let span = samples[index + 1] - samples[index];
    let fraction = (x - samples[index]) / span;

    (FractIndex { index, fraction }, out_of_range)
}

/// Linear interpolation over a single sample vector
pub fn interpolate_1d(x: f64, samples: &[f64], values: &[f64]) -> ClassifResult<f64> {
    if values.len() != samples.len() {
        return Err(ClassifError::InvalidLut(format!(
            "{} samples but {} values",
            samples.len(),
            values.len()
        )));
    }
    match values {
        [] => Err(ClassifError::InvalidLut("No samples to interpolate".to_string())),
        [only] => Ok(*only),
        _ => {
            let (fi, _) = interp_coord(x, samples);
            Ok(values[fi.index] * (1.0 - fi.fraction) + values[fi.index + 1] * fi.fraction)
        }
    }
}

/// Dense calibration table with 1 to 5 axes and optional vector-valued samples
#[derive(Debug)]
pub struct Lut {
    name: String,
    axes: Vec<Axis>,
    values: Vec<f64>,
    strides: Vec<usize>,
    vector_len: usize,
    out_of_range: AtomicU64,
}

impl Clone for Lut {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            axes: self.axes.clone(),
            values: self.values.clone(),
            strides: self.strides.clone(),
            vector_len: self.vector_len,
            out_of_range: AtomicU64::new(self.out_of_range.load(Ordering::Relaxed)),
        }
    }
}

impl Lut {
    /// Build a table from axes and a flat row-major value vector.
    ///
    /// `vector_len` is the number of values stored per grid point (1 for
    /// scalar tables); it is the fastest-varying dimension.
    pub fn from_vec(
        name: &str,
        axes: Vec<Axis>,
        vector_len: usize,
        values: Vec<f64>,
    ) -> ClassifResult<Self> {
        if axes.is_empty() || axes.len() > MAX_AXES {
            return Err(ClassifError::InvalidLut(format!(
                "{}: {} axes given, expected 1 to {}",
                name,
                axes.len(),
                MAX_AXES
            )));
        }
        if vector_len == 0 {
            return Err(ClassifError::InvalidLut(format!("{}: zero vector length", name)));
        }

        let grid_points: usize = axes.iter().map(|a| a.len()).product();
        if values.len() != grid_points * vector_len {
            return Err(ClassifError::InvalidLut(format!(
                "{}: expected {} values, found {}",
                name,
                grid_points * vector_len,
                values.len()
            )));
        }

        let mut strides = vec![0usize; axes.len()];
        let mut stride = vector_len;
        for (d, axis) in axes.iter().enumerate().rev() {
            strides[d] = stride;
            stride *= axis.len();
        }

        Ok(Self {
            name: name.to_string(),
            axes,
            values,
            strides,
            vector_len,
            out_of_range: AtomicU64::new(0),
        })
    }

    /// Build a table from an n-dimensional array.
    ///
    /// The array has one dimension per axis, plus a trailing vector dimension
    /// when `vector_valued` is set.
    pub fn from_array(
        name: &str,
        axes: Vec<Axis>,
        values: ArrayD<f64>,
        vector_valued: bool,
    ) -> ClassifResult<Self> {
        let expected_ndim = axes.len() + usize::from(vector_valued);
        if values.ndim() != expected_ndim {
            return Err(ClassifError::InvalidLut(format!(
                "{}: array has {} dimensions, expected {}",
                name,
                values.ndim(),
                expected_ndim
            )));
        }
        for (d, axis) in axes.iter().enumerate() {
            if values.shape()[d] != axis.len() {
                return Err(ClassifError::InvalidLut(format!(
                    "{}: dimension {} has {} entries but axis has {} samples",
                    name,
                    d,
                    values.shape()[d],
                    axis.len()
                )));
            }
        }
        let vector_len = if vector_valued { values.shape()[axes.len()] } else { 1 };
        let flat: Vec<f64> = values.as_standard_layout().iter().copied().collect();
        Self::from_vec(name, axes, vector_len, flat)
    }

    /// Table holding the same scalar at every grid point
    pub fn constant(name: &str, axes: Vec<Axis>, value: f64) -> ClassifResult<Self> {
        let n: usize = axes.iter().map(|a| a.len()).product();
        Self::from_vec(name, axes, 1, vec![value; n])
    }

    /// Table sampled from a function of the grid coordinates
    pub fn from_fn<F>(name: &str, axes: Vec<Axis>, f: F) -> ClassifResult<Self>
    where
        F: Fn(&[f64]) -> f64,
    {
        let shape: Vec<usize> = axes.iter().map(|a| a.len()).collect();
        let mut coords = vec![0.0; axes.len()];
        let values = ArrayD::from_shape_fn(IxDyn(&shape), |idx| {
            for (d, axis) in axes.iter().enumerate() {
                coords[d] = axis.samples()[idx[d]];
            }
            f(&coords)
        });
        Self::from_array(name, axes, values, false)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ndim(&self) -> usize {
        self.axes.len()
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn axis(&self, d: usize) -> Option<&Axis> {
        self.axes.get(d)
    }

    pub fn vector_len(&self) -> usize {
        self.vector_len
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of queries that fell outside an axis range since construction
    pub fn out_of_range_count(&self) -> u64 {
        self.out_of_range.load(Ordering::Relaxed)
    }

    /// Fractional indices for a coordinate vector, recording out-of-range hits
    pub fn fract_indices(&self, coords: &[f64]) -> [FractIndex; MAX_AXES] {
        let mut indices = [FractIndex::default(); MAX_AXES];
        let mut outside = false;
        for (d, axis) in self.axes.iter().enumerate() {
            let x = coords.get(d).copied().unwrap_or(0.0);
            let (fi, oor) = axis.fract_index(x);
            indices[d] = fi;
            outside |= oor;
        }
        if outside {
            self.out_of_range.fetch_add(1, Ordering::Relaxed);
        }
        indices
    }

    /// Interpolate a scalar table at `coords`
    pub fn interpolate(&self, coords: &[f64]) -> f64 {
        let indices = self.fract_indices(coords);
        let mut out = [0.0];
        self.interpolate_indices(&indices[..self.ndim()], &mut out);
        out[0]
    }

    /// Interpolate a vector-valued table at `coords` into `out`
    pub fn interpolate_into(&self, coords: &[f64], out: &mut [f64]) {
        let indices = self.fract_indices(coords);
        self.interpolate_indices(&indices[..self.ndim()], out);
    }

    /// Interpolate with precomputed fractional indices.
    ///
    /// Writes `min(out.len(), vector_len)` values; all `2^D` corner cells
    /// are combined with multilinear weights.
    pub fn interpolate_indices(&self, indices: &[FractIndex], out: &mut [f64]) {
        let d = self.ndim().min(indices.len());
        let n_out = out.len().min(self.vector_len);
        out[..n_out].iter_mut().for_each(|v| *v = 0.0);

        for corner in 0..(1usize << d) {
            let mut weight = 1.0;
            let mut offset = 0usize;
            let mut degenerate = false;

            for (axis_idx, fi) in indices.iter().enumerate().take(d) {
                let upper = (corner >> axis_idx) & 1 == 1;
                if self.axes[axis_idx].len() == 1 {
                    // Single-sample axis: only the lower corner exists
                    if upper {
                        degenerate = true;
                        break;
                    }
                    continue;
                }
                let (cell, w) = if upper {
                    (fi.index + 1, fi.fraction)
                } else {
                    (fi.index, 1.0 - fi.fraction)
                };
                weight *= w;
                offset += cell * self.strides[axis_idx];
            }

            if degenerate || weight == 0.0 {
                continue;
            }
            for (k, v) in out[..n_out].iter_mut().enumerate() {
                *v += weight * self.values[offset + k];
            }
        }
    }
}
