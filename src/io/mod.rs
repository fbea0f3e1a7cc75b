//! I/O modules for calibration tables and processing parameters

pub mod auxdata_reader;
pub mod params;

pub use auxdata_reader::{AuxDataReader, AUXDATA_ENV_VAR};
pub use params::{read_params, ParamsFile};
