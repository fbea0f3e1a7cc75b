//! Table-driven cloud decision.
//!
//! The eight boolean cloud tests are packed into an 8-bit index and the
//! final cloud flag is read from a 256-entry table, one table for land and
//! one for water. The tables are plain data: they can be replaced from
//! calibration files without touching the classification code.

use crate::types::{ClassifError, ClassifResult};
use serde::{Deserialize, Serialize};

/// Bit positions of the tests inside the decision index
pub const CC_BRIGHT: u8 = 0;
pub const CC_LOW_P_NN: u8 = 1;
pub const CC_LOW_P_PO: u8 = 2;
pub const CC_DELTA_P: u8 = 3;
pub const CC_PCD_NN: u8 = 4;
pub const CC_PCD_PO: u8 = 5;
pub const CC_SLOPE_1: u8 = 6;
pub const CC_SLOPE_2: u8 = 7;

pub const TABLE_SIZE: usize = 256;

/// Outcome of the individual cloud tests for one pixel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudTests {
    pub bright: bool,
    pub low_p_nn: bool,
    pub low_p_poly: bool,
    pub delta_p: bool,
    pub pcd_nn: bool,
    pub pcd_poly: bool,
    pub slope_1: bool,
    pub slope_2: bool,
}

impl CloudTests {
    /// Pack into the 8-bit decision index
    pub fn index(&self) -> u8 {
        let mut index = 0u8;
        let mut set = |bit: u8, value: bool| {
            if value {
                index |= 1 << bit;
            }
        };
        set(CC_BRIGHT, self.bright);
        set(CC_LOW_P_NN, self.low_p_nn);
        set(CC_LOW_P_PO, self.low_p_poly);
        set(CC_DELTA_P, self.delta_p);
        set(CC_PCD_NN, self.pcd_nn);
        set(CC_PCD_PO, self.pcd_poly);
        set(CC_SLOPE_1, self.slope_1);
        set(CC_SLOPE_2, self.slope_2);
        index
    }

    /// Unpack a decision index
    pub fn from_index(index: u8) -> Self {
        let bit = |b: u8| index & (1 << b) != 0;
        Self {
            bright: bit(CC_BRIGHT),
            low_p_nn: bit(CC_LOW_P_NN),
            low_p_poly: bit(CC_LOW_P_PO),
            delta_p: bit(CC_DELTA_P),
            pcd_nn: bit(CC_PCD_NN),
            pcd_poly: bit(CC_PCD_PO),
            slope_1: bit(CC_SLOPE_1),
            slope_2: bit(CC_SLOPE_2),
        }
    }
}

/// 256-entry boolean decision table. Every index has a defined value.
#[derive(Clone, PartialEq, Eq)]
pub struct DecisionTable {
    entries: [bool; TABLE_SIZE],
}

impl std::fmt::Debug for DecisionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionTable")
            .field("cloudy_entries", &self.cloudy_count())
            .finish()
    }
}

impl DecisionTable {
    pub const fn from_entries(entries: [bool; TABLE_SIZE]) -> Self {
        Self { entries }
    }

    /// Parse a table from 256 `0`/`1` characters. Whitespace is ignored.
    pub fn parse(text: &str) -> ClassifResult<Self> {
        let mut entries = [false; TABLE_SIZE];
        let mut count = 0usize;
        for c in text.chars().filter(|c| !c.is_whitespace()) {
            if count >= TABLE_SIZE {
                return Err(ClassifError::AuxData(
                    "Decision table has more than 256 entries".to_string(),
                ));
            }
            entries[count] = match c {
                '0' => false,
                '1' => true,
                other => {
                    return Err(ClassifError::AuxData(format!(
                        "Invalid decision table entry '{}' at position {}",
                        other, count
                    )))
                }
            };
            count += 1;
        }
        if count != TABLE_SIZE {
            return Err(ClassifError::AuxData(format!(
                "Decision table has {} entries, expected {}",
                count, TABLE_SIZE
            )));
        }
        Ok(Self { entries })
    }

    /// Serialise back to the 0/1 text form
    pub fn to_text(&self) -> String {
        self.entries.iter().map(|&e| if e { '1' } else { '0' }).collect()
    }

    pub fn lookup(&self, index: u8) -> bool {
        self.entries[index as usize]
    }

    pub fn decide(&self, tests: &CloudTests) -> bool {
        self.lookup(tests.index())
    }

    pub fn cloudy_count(&self) -> usize {
        self.entries.iter().filter(|&&e| e).count()
    }

    /// Default land table: bright and at least one of low polynomial
    /// pressure or both spectral slopes.
    pub const fn default_land() -> Self {
        Self::from_entries(generate_land_entries())
    }

    /// Default water table: bright and at least one of low polynomial
    /// pressure or either spectral slope.
    pub const fn default_water() -> Self {
        Self::from_entries(generate_water_entries())
    }
}

const fn bit_set(index: usize, bit: u8) -> bool {
    index & (1 << bit) != 0
}

const fn generate_land_entries() -> [bool; TABLE_SIZE] {
    let mut entries = [false; TABLE_SIZE];
    let mut i = 0;
    while i < TABLE_SIZE {
        let bright = bit_set(i, CC_BRIGHT);
        let low_p = bit_set(i, CC_LOW_P_PO) && !bit_set(i, CC_PCD_PO);
        let slopes = bit_set(i, CC_SLOPE_1) && bit_set(i, CC_SLOPE_2);
        entries[i] = bright && (low_p || slopes);
        i += 1;
    }
    entries
}

const fn generate_water_entries() -> [bool; TABLE_SIZE] {
    let mut entries = [false; TABLE_SIZE];
    let mut i = 0;
    while i < TABLE_SIZE {
        let bright = bit_set(i, CC_BRIGHT);
        let low_p = bit_set(i, CC_LOW_P_PO) && !bit_set(i, CC_PCD_PO);
        let slopes = bit_set(i, CC_SLOPE_1) || bit_set(i, CC_SLOPE_2);
        entries[i] = bright && (low_p || slopes);
        i += 1;
    }
    entries
}
