//! Python bindings

use crate::core::auxdata::MerisAuxData;
use crate::core::landsat8::{CloudNet, CloudNetFactory, Landsat8Classifier, Landsat8Params, Landsat8Scene};
use crate::core::meris::{MerisParams, MerisProcessor, MerisScene};
use crate::core::postprocess::{PostProcessParams, PostProcessor};
use crate::io::{read_params, AuxDataReader};
use crate::types::{ClassifError, MerisResolution, Sensor};
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2, PyReadonlyArray3};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::sync::Arc;

fn runtime_error(e: ClassifError) -> PyErr {
    PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e))
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyMerisProcessor>()?;
    m.add_function(wrap_pyfunction!(classify_landsat8, m)?)?;
    m.add_function(wrap_pyfunction!(post_process_landsat8, m)?)?;
    Ok(())
}

/// Python wrapper for MerisProcessor
#[pyclass(name = "MerisProcessor")]
struct PyMerisProcessor {
    inner: MerisProcessor,
}

#[pymethods]
impl PyMerisProcessor {
    /// Without `auxdata_dir` the built-in approximate calibration is used
    #[new]
    #[pyo3(signature = (resolution = "RR", auxdata_dir = None, params_file = None))]
    fn new(resolution: &str, auxdata_dir: Option<String>, params_file: Option<String>) -> PyResult<Self> {
        let resolution = MerisResolution::from_product_type(resolution).map_err(runtime_error)?;
        let aux = match auxdata_dir {
            Some(dir) => AuxDataReader::new(dir).load(resolution),
            None => MerisAuxData::synthetic(resolution),
        }
        .map_err(runtime_error)?;
        let params = match params_file {
            Some(path) => read_params::<MerisParams, _>(path).map_err(runtime_error)?,
            None => MerisParams::default(),
        };
        let inner = MerisProcessor::with_params(Arc::new(aux), params).map_err(runtime_error)?;
        Ok(PyMerisProcessor { inner })
    }

    /// Process a scene and return a dict of output rasters.
    ///
    /// `buffer_width` adds the cloud buffer pass.
    #[pyo3(signature = (
        rho_toa, sza, vza, saa, vaa, detector, l1_flags,
        ecmwf_pressure = None, ozone = None, wind_u = None, wind_v = None,
        altitude = None, buffer_width = None
    ))]
    #[allow(clippy::too_many_arguments)]
    fn process<'py>(
        &self,
        py: Python<'py>,
        rho_toa: PyReadonlyArray3<f32>,
        sza: PyReadonlyArray2<f32>,
        vza: PyReadonlyArray2<f32>,
        saa: PyReadonlyArray2<f32>,
        vaa: PyReadonlyArray2<f32>,
        detector: PyReadonlyArray2<u16>,
        l1_flags: PyReadonlyArray2<u32>,
        ecmwf_pressure: Option<PyReadonlyArray2<f32>>,
        ozone: Option<PyReadonlyArray2<f32>>,
        wind_u: Option<PyReadonlyArray2<f32>>,
        wind_v: Option<PyReadonlyArray2<f32>>,
        altitude: Option<PyReadonlyArray2<f32>>,
        buffer_width: Option<usize>,
    ) -> PyResult<&'py PyDict> {
        let (_, rows, cols) = rho_toa.as_array().dim();
        let mut scene = MerisScene::new(rows, cols);
        scene.rho_toa = rho_toa.as_array().to_owned();
        scene.sza = sza.as_array().to_owned();
        scene.vza = vza.as_array().to_owned();
        scene.saa = saa.as_array().to_owned();
        scene.vaa = vaa.as_array().to_owned();
        scene.detector = detector.as_array().to_owned();
        scene.l1_flags = l1_flags.as_array().to_owned();
        let optional = [
            (ecmwf_pressure, &mut scene.ecmwf_pressure),
            (ozone, &mut scene.ozone),
            (wind_u, &mut scene.wind_u),
            (wind_v, &mut scene.wind_v),
            (altitude, &mut scene.altitude),
        ];
        for (array, field) in optional {
            if let Some(array) = array {
                *field = array.as_array().to_owned();
            }
        }

        let processor = &self.inner;
        let out = py
            .allow_threads(|| {
                let mut out = processor.process_scene_parallel(&scene)?;
                if let Some(width) = buffer_width {
                    let params = PostProcessParams {
                        cloud_buffer_width: width,
                        ..Default::default()
                    };
                    processor.buffer_clouds(&mut out, params)?;
                }
                Ok::<_, ClassifError>(out)
            })
            .map_err(runtime_error)?;

        let dict = PyDict::new(py);
        dict.set_item("rho_ng", out.rho_ng.into_pyarray(py))?;
        dict.set_item("brr", out.brr.into_pyarray(py))?;
        dict.set_item("brr_smile", out.brr_smile.into_pyarray(py))?;
        dict.set_item("cloud_flags", out.cloud_flags.into_pyarray(py))?;
        dict.set_item("gas_flags", out.gas_flags.into_pyarray(py))?;
        dict.set_item("land_flags", out.land_flags.into_pyarray(py))?;
        dict.set_item("rayleigh_flags", out.rayleigh_flags.into_pyarray(py))?;
        dict.set_item("surface_pressure", out.surface_pressure.into_pyarray(py))?;
        if let Some(ctp) = out.cloud_top_pressure {
            dict.set_item("cloud_top_pressure", ctp.into_pyarray(py))?;
        }
        if let Some(t) = out.gas_transmittance {
            dict.set_item("gas_transmittance", t.into_pyarray(py))?;
        }
        if let Some(r) = out.rayleigh_reflectance {
            dict.set_item("rayleigh_reflectance", r.into_pyarray(py))?;
        }
        Ok(dict)
    }
}

/// Cloud network backed by a Python callable taking a list of floats
struct PyCloudNet {
    callable: PyObject,
    failed: bool,
}

impl CloudNet for PyCloudNet {
    fn score(&mut self, input: &[f64]) -> f64 {
        let result = Python::with_gil(|py| {
            self.callable
                .call1(py, (input.to_vec(),))
                .and_then(|r| r.extract::<f64>(py))
        });
        match result {
            Ok(score) => score,
            Err(e) => {
                // Failed calls score as clear
                if !self.failed {
                    log::warn!("Cloud network call failed: {}", e);
                    self.failed = true;
                }
                0.0
            }
        }
    }
}

/// Classify a Landsat-8 scene; returns (flags, nn_score)
#[pyfunction]
#[pyo3(signature = (reflectance, quality, net, water_fraction = None, clost = None, otsu = None, params_file = None))]
#[allow(clippy::too_many_arguments)]
fn classify_landsat8<'py>(
    py: Python<'py>,
    reflectance: PyReadonlyArray3<f32>,
    quality: PyReadonlyArray2<u32>,
    net: PyObject,
    water_fraction: Option<PyReadonlyArray2<u8>>,
    clost: Option<PyReadonlyArray2<f32>>,
    otsu: Option<PyReadonlyArray2<f32>>,
    params_file: Option<String>,
) -> PyResult<(&'py PyArray2<u32>, &'py PyArray2<f32>)> {
    let params = match params_file {
        Some(path) => read_params::<Landsat8Params, _>(path).map_err(runtime_error)?,
        None => Landsat8Params::default(),
    };
    let factory: CloudNetFactory = Arc::new(move || {
        Box::new(PyCloudNet {
            callable: net.clone(),
            failed: false,
        }) as Box<dyn CloudNet>
    });
    let classifier = Landsat8Classifier::with_params(factory, params).map_err(runtime_error)?;

    let scene = Landsat8Scene {
        reflectance: reflectance.as_array().to_owned(),
        quality: quality.as_array().to_owned(),
        water_fraction: water_fraction.map(|w| w.as_array().to_owned()),
        clost: clost.map(|c| c.as_array().to_owned()),
        otsu: otsu.map(|o| o.as_array().to_owned()),
    };
    let out = classifier.classify_scene(&scene).map_err(runtime_error)?;
    Ok((out.flags.into_pyarray(py), out.nn_score.into_pyarray(py)))
}

/// Coastline refinement and cloud buffers on Landsat-8 flags
#[pyfunction]
#[pyo3(signature = (flags, water_fraction = None, params_file = None))]
fn post_process_landsat8<'py>(
    py: Python<'py>,
    flags: PyReadonlyArray2<u32>,
    water_fraction: Option<PyReadonlyArray2<u8>>,
    params_file: Option<String>,
) -> PyResult<&'py PyArray2<u32>> {
    let params = match params_file {
        Some(path) => read_params::<PostProcessParams, _>(path).map_err(runtime_error)?,
        None => PostProcessParams::default(),
    };
    let source = flags.as_array().to_owned();
    let water_fraction = water_fraction.map(|w| w.as_array().to_owned());
    let processor = PostProcessor::for_sensor(Sensor::Landsat8, params);
    let out = py
        .allow_threads(|| processor.post_process_parallel(&source, water_fraction.as_ref()))
        .map_err(runtime_error)?;
    Ok(out.into_pyarray(py))
}
