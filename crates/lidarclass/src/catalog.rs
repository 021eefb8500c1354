//! Fixed label catalog: ID, display name and visualization colour.
//!
//! IDs follow ASPRS LAS 1.4 where a standard class exists. Sidewalk, fence,
//! pole and sign have no standard code and take 23..=26, which is reserved
//! by the standard but still fits the 5-bit classification field of legacy
//! point formats 0-5.

use serde::{Deserialize, Serialize};

/// Every label the crate knows by name.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Class {
    NeverClassified = 0,
    Unclassified = 1,
    Ground = 2,
    LowVegetation = 3,
    MediumVegetation = 4,
    HighVegetation = 5,
    Building = 6,
    Noise = 7,
    Water = 9,
    Rail = 10,
    Road = 11,
    Bridge = 17,
    Sidewalk = 23,
    Fence = 24,
    Pole = 25,
    Sign = 26,
}

impl Class {
    pub const ALL: [Class; 16] = [
        Class::NeverClassified,
        Class::Unclassified,
        Class::Ground,
        Class::LowVegetation,
        Class::MediumVegetation,
        Class::HighVegetation,
        Class::Building,
        Class::Noise,
        Class::Water,
        Class::Rail,
        Class::Road,
        Class::Bridge,
        Class::Sidewalk,
        Class::Fence,
        Class::Pole,
        Class::Sign,
    ];

    #[inline]
    pub const fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Class> {
        Class::ALL.iter().copied().find(|c| c.id() == id)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Class::NeverClassified => "Never Classified",
            Class::Unclassified => "Unclassified",
            Class::Ground => "Ground",
            Class::LowVegetation => "Low Vegetation",
            Class::MediumVegetation => "Medium Vegetation",
            Class::HighVegetation => "High Vegetation",
            Class::Building => "Building",
            Class::Noise => "Noise",
            Class::Water => "Water",
            Class::Rail => "Rail",
            Class::Road => "Road",
            Class::Bridge => "Bridge",
            Class::Sidewalk => "Sidewalk",
            Class::Fence => "Fence",
            Class::Pole => "Pole",
            Class::Sign => "Sign",
        }
    }

    pub const fn rgb(self) -> [u8; 3] {
        match self {
            Class::NeverClassified => [128, 128, 128],
            Class::Unclassified => [200, 200, 200],
            Class::Ground => [139, 69, 19],
            Class::LowVegetation => [144, 238, 144],
            Class::MediumVegetation => [34, 139, 34],
            Class::HighVegetation => [0, 100, 0],
            Class::Building => [70, 130, 180],
            Class::Noise => [255, 0, 255],
            Class::Water => [0, 0, 255],
            Class::Rail => [255, 140, 0],
            Class::Road => [64, 64, 64],
            Class::Bridge => [128, 0, 128],
            Class::Sidewalk => [192, 192, 192],
            Class::Fence => [255, 255, 0],
            Class::Pole => [255, 0, 0],
            Class::Sign => [255, 192, 203],
        }
    }
}

impl std::fmt::Display for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Name reported for IDs outside the catalog.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Colour rendered for IDs outside the catalog.
pub const UNKNOWN_RGB: [u8; 3] = [128, 128, 128];

#[inline]
pub fn name_of(id: u8) -> &'static str {
    Class::from_id(id).map(Class::name).unwrap_or(UNKNOWN_NAME)
}

/// Direct-indexed label -> RGB lookup with the fallback colour pre-filled.
#[derive(Clone)]
pub struct ColorTable {
    rgb: [[u8; 3]; 256],
}

impl ColorTable {
    pub fn new() -> Self {
        let mut rgb = [UNKNOWN_RGB; 256];
        for class in Class::ALL {
            rgb[class.id() as usize] = class.rgb();
        }

        Self { rgb }
    }

    #[inline(always)]
    pub fn get(&self, label: u8) -> [u8; 3] {
        self.rgb[label as usize]
    }
}

impl Default for ColorTable {
    fn default() -> Self {
        Self::new()
    }
}
