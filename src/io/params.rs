//! Processing parameter files.
//!
//! Parameters are stored as XML whose elements mirror the parameter struct
//! fields; nested structs are nested elements. Elements left out keep their
//! defaults, so a file only needs to list what it changes:
//!
//! ```xml
//! <merisParams>
//!   <block_size>8</block_size>
//!   <rayleigh><correct_water>true</correct_water></rayleigh>
//! </merisParams>
//! ```

use crate::core::landsat8::Landsat8Params;
use crate::core::meris::MerisParams;
use crate::core::postprocess::PostProcessParams;
use crate::types::{ClassifError, ClassifResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Parameter set with an XML file representation
pub trait ParamsFile: Serialize + DeserializeOwned + Default {
    /// Root element written by [`ParamsFile::to_xml`]
    const ROOT: &'static str;

    fn from_xml(xml: &str) -> ClassifResult<Self> {
        quick_xml::de::from_str(xml)
            .map_err(|e| ClassifError::XmlParsing(format!("Failed to parse <{}>: {}", Self::ROOT, e)))
    }

    fn to_xml(&self) -> ClassifResult<String> {
        quick_xml::se::to_string_with_root(Self::ROOT, self)
            .map_err(|e| ClassifError::XmlParsing(format!("Failed to write <{}>: {}", Self::ROOT, e)))
    }
}

impl ParamsFile for MerisParams {
    const ROOT: &'static str = "merisParams";
}

impl ParamsFile for Landsat8Params {
    const ROOT: &'static str = "landsat8Params";
}

impl ParamsFile for PostProcessParams {
    const ROOT: &'static str = "postProcessParams";
}

/// Read a parameter file
pub fn read_params<T: ParamsFile, P: AsRef<Path>>(path: P) -> ClassifResult<T> {
    let path = path.as_ref();
    log::debug!("Reading <{}> parameters from {}", T::ROOT, path.display());
    let xml = std::fs::read_to_string(path)?;
    T::from_xml(&xml)
}

/// Write a parameter file holding every field
pub fn write_params<T: ParamsFile, P: AsRef<Path>>(params: &T, path: P) -> ClassifResult<()> {
    std::fs::write(path, params.to_xml()?)?;
    Ok(())
}
