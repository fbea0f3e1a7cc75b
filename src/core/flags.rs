//! Flag words for every sensor-specific bit layout.
//!
//! Each layout is a `u32` newtype with named bit positions. Bit positions
//! are fixed so that downstream consumers of the packed rasters keep
//! decoding them the same way.

use serde::{Deserialize, Serialize};

macro_rules! flag_word {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$fmeta:meta])* $flag:ident = $bit:expr, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            $( $(#[$fmeta])* pub const $flag: u32 = $bit; )*

            /// All named flags with their bit positions
            pub const NAMES: &'static [(&'static str, u32)] = &[ $( (stringify!($flag), $bit), )* ];

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn bits(self) -> u32 {
                self.0
            }

            pub fn contains(self, bit: u32) -> bool {
                self.0 & (1 << bit) != 0
            }

            pub fn set(&mut self, bit: u32, value: bool) {
                if value {
                    self.0 |= 1 << bit;
                } else {
                    self.0 &= !(1 << bit);
                }
            }

            pub fn with(mut self, bit: u32) -> Self {
                self.set(bit, true);
                self
            }

            /// Names of all flags currently raised
            pub fn raised(self) -> Vec<&'static str> {
                Self::NAMES
                    .iter()
                    .filter(|(_, bit)| self.contains(*bit))
                    .map(|(name, _)| *name)
                    .collect()
            }
        }

        impl From<u32> for $name {
            fn from(bits: u32) -> Self {
                Self(bits)
            }
        }

        impl From<$name> for u32 {
            fn from(flags: $name) -> u32 {
                flags.0
            }
        }
    };
}

flag_word! {
    /// MERIS Level-1b quality flags (input)
    MerisL1Flags {
        COSMETIC = 0,
        DUPLICATED = 1,
        GLINT_RISK = 2,
        SUSPECT = 3,
        LAND_OCEAN = 4,
        BRIGHT = 5,
        COASTLINE = 6,
        INVALID = 7,
    }
}

flag_word! {
    /// MERIS pressure/decision-table cloud classification
    CloudFlags {
        CLOUD = 0,
        BRIGHT = 1,
        LOW_NN_P = 2,
        PCD_NN_P = 3,
        LOW_POL_P = 4,
        PCD_POL_P = 5,
        CONFIDENCE_P = 6,
        SLOPE_1 = 7,
        SLOPE_2 = 8,
        /// Written by post-processing
        CLOUD_BUFFER = 9,
    }
}

flag_word! {
    /// MERIS gaseous absorption correction status
    GasFlags {
        DO_CORRECT = 0,
        /// Sun zenith above the calibration limit
        SUN70 = 1,
        /// Band ratio input out of range, neutral ratio substituted
        ORINP0 = 2,
        /// Transmittance out of range, TOA value kept
        OROUT0 = 3,
    }
}

flag_word! {
    /// MERIS land/water/glint reclassification
    LandFlags {
        MEGLINT = 0,
        LOINLD = 1,
        ISLAND = 2,
        LANDCONS = 3,
        ICE = 4,
    }
}

flag_word! {
    /// Negative Rayleigh-corrected reflectance, one bit per corrected band
    RayleighFlags {
        NEGATIVE_412 = 0,
        NEGATIVE_442 = 1,
        NEGATIVE_490 = 2,
        NEGATIVE_510 = 3,
        NEGATIVE_560 = 4,
        NEGATIVE_620 = 5,
        NEGATIVE_665 = 6,
        NEGATIVE_681 = 7,
        NEGATIVE_705 = 8,
        NEGATIVE_753 = 9,
        NEGATIVE_775 = 10,
        NEGATIVE_865 = 11,
        NEGATIVE_890 = 12,
    }
}

impl RayleighFlags {
    /// Bit used for a MERIS band index. The 760 nm band is skipped.
    pub fn bit_for_band(band: usize) -> u32 {
        if band <= crate::types::meris_band::BB760 {
            band as u32
        } else {
            band as u32 - 1
        }
    }
}

flag_word! {
    /// Landsat-8 pixel classification
    Landsat8Flags {
        INVALID = 0,
        CLOUD_SHIMEZ = 1,
        CLOUD_SHIMEZ_BUFFER = 2,
        CLOUD_HOT = 3,
        CLOUD_HOT_BUFFER = 4,
        CLOUD_OTSU = 5,
        CLOUD_OTSU_BUFFER = 6,
        CLOUD_CLOST = 7,
        CLOUD_CLOST_BUFFER = 8,
        CLOUD_AMBIGUOUS = 9,
        CLOUD_SURE = 10,
        CLOUD_BUFFER = 11,
        CLOUD_SHADOW = 12,
        SNOW_ICE = 13,
        BRIGHT = 14,
        WHITE = 15,
        COASTLINE = 16,
        LAND = 17,
        GLINT_RISK = 18,
    }
}

flag_word! {
    /// Landsat-8 Level-1 quality band bits consumed by the classifier
    Landsat8QualityFlags {
        DESIGNATED_FILL = 0,
        WATER_CONFIDENCE_HIGH = 5,
    }
}
