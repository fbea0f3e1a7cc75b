//! Core correction and classification modules

pub mod flags;
pub mod lut;
pub mod geometry;
pub mod decision;
pub mod auxdata;
pub mod gaseous;
pub mod rayleigh;
pub mod smile;
pub mod pressure;
pub mod cloud;
pub mod land_water;
pub mod meris;
pub mod landsat8;
pub mod postprocess;

// Re-export main types
pub use flags::{CloudFlags, GasFlags, LandFlags, Landsat8Flags, Landsat8QualityFlags, MerisL1Flags, RayleighFlags};
pub use lut::{Axis, FractIndex, Lut};
pub use geometry::Geometry;
pub use decision::{CloudTests, DecisionTable};
pub use auxdata::{MerisAuxData, SlopeTest, SmileParams};
pub use gaseous::{GaseousCorrection, GaseousParams};
pub use rayleigh::{RayleighCorrection, RayleighParams};
pub use smile::SmileCorrection;
pub use pressure::PressureRetrieval;
pub use cloud::{CloudClassifier, CloudParams, CloudResult};
pub use land_water::LandWaterClassifier;
pub use meris::{MerisOutput, MerisParams, MerisProcessor, MerisScene};
pub use landsat8::{CloudNet, CloudNetFactory, Landsat8Classifier, Landsat8Output, Landsat8Params, Landsat8Scene, NnCategory, NnSelector};
pub use postprocess::{GeoCodingKind, PostProcessParams, PostProcessor};
