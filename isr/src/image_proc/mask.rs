//! Mask bit planes.
//!
//! The planes every stage knows about are a fixed enum with fixed bit indices.
//! Planes that only appear conditionally (interpolation being the usual one)
//! are assigned on demand through a [`MaskRegistry`] that the caller owns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{IsrError, Result};

/// Per-pixel mask word.
pub type MaskPixel = u32;

/// Name of the plane recording that a pixel value was interpolated.
pub const INTRP_PLANE: &str = "INTRP";

const MAX_PLANES: u8 = MaskPixel::BITS as u8;

/// Mask planes with a fixed bit index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaskPlane {
    /// Known bad pixel (defect catalog or detected)
    Bad,
    /// Saturated pixel
    Sat,
    /// Pixel whose value is usable but questionable
    Suspect,
    /// Cosmic ray hit
    Cr,
    /// Too close to the detector edge for reliable processing
    Edge,
    /// No data was recorded
    NoData,
}

impl MaskPlane {
    pub const ALL: [MaskPlane; 6] = [
        MaskPlane::Bad,
        MaskPlane::Sat,
        MaskPlane::Suspect,
        MaskPlane::Cr,
        MaskPlane::Edge,
        MaskPlane::NoData,
    ];

    pub fn bit_index(self) -> u8 {
        match self {
            MaskPlane::Bad => 0,
            MaskPlane::Sat => 1,
            MaskPlane::Suspect => 2,
            MaskPlane::Cr => 3,
            MaskPlane::Edge => 4,
            MaskPlane::NoData => 5,
        }
    }

    pub fn bitmask(self) -> MaskPixel {
        1 << self.bit_index()
    }

    pub fn name(self) -> &'static str {
        match self {
            MaskPlane::Bad => "BAD",
            MaskPlane::Sat => "SAT",
            MaskPlane::Suspect => "SUSPECT",
            MaskPlane::Cr => "CR",
            MaskPlane::Edge => "EDGE",
            MaskPlane::NoData => "NO_DATA",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|plane| plane.name() == name)
    }
}

/// Name to bit-index mapping for the planes of one mask.
///
/// Always contains the fixed [`MaskPlane`] set; further names are appended
/// with the lowest free bit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskRegistry {
    planes: BTreeMap<String, u8>,
}

impl Default for MaskRegistry {
    fn default() -> Self {
        let planes = MaskPlane::ALL
            .into_iter()
            .map(|plane| (plane.name().to_string(), plane.bit_index()))
            .collect();
        Self { planes }
    }
}

impl MaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bitmask for `name`, if registered.
    pub fn bitmask(&self, name: &str) -> Option<MaskPixel> {
        self.planes.get(name).map(|&bit| 1 << bit)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.planes.contains_key(name)
    }

    /// Look up `name`, registering it at the lowest free bit if absent.
    pub fn get_or_register(&mut self, name: &str) -> Result<MaskPixel> {
        if let Some(mask) = self.bitmask(name) {
            return Ok(mask);
        }

        let free = (0..MAX_PLANES)
            .find(|bit| !self.planes.values().any(|used| used == bit))
            .ok_or_else(|| IsrError::MaskPlanesExhausted(name.to_string()))?;
        self.planes.insert(name.to_string(), free);
        Ok(1 << free)
    }

    /// Registered plane names with their bit index, ordered by name.
    pub fn planes(&self) -> impl Iterator<Item = (&str, u8)> {
        self.planes.iter().map(|(name, &bit)| (name.as_str(), bit))
    }

    /// Combined bitmask of every name in `names` that is registered.
    pub fn union_of(&self, names: &[&str]) -> MaskPixel {
        names
            .iter()
            .filter_map(|name| self.bitmask(name))
            .fold(0, |acc, mask| acc | mask)
    }
}
