//! Cirrus: per-pixel atmospheric correction and cloud screening for MERIS
//! and Landsat-8.
//!
//! The MERIS chain corrects TOA reflectance for gaseous absorption,
//! Rayleigh scattering and the spectral smile, and flags clouds, land,
//! water and sun glint along the way. Landsat-8 scenes are classified with
//! spectral tests and a pluggable cloud network. Both can be followed by a
//! spatial pass that refines coastlines and grows cloud buffers.

pub mod types;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    BandCube, ClassifError, ClassifResult, FlagImage, MerisResolution, PixelRecord, RealImage, Rect, Sensor,
    BAD_VALUE,
};

pub use crate::core::{
    Landsat8Classifier, Landsat8Params, Landsat8Scene, MerisAuxData, MerisParams, MerisProcessor, MerisScene,
    PostProcessParams, PostProcessor,
};
pub use io::AuxDataReader;
