//! Amplifier exposures: a pixel plane plus its header metadata.
//!
//! Section keywords (`DATASEC`, `BIASSEC`, `TRIMSEC`, ...) hold bracketed,
//! 1-based sections relative to the exposure's own pixel grid; they are
//! converted to parent-frame boxes by adding the plane origin.

use std::collections::BTreeMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IsrError, Result};
use crate::image_proc::bbox::BoundingBox;
use crate::image_proc::plane::PixelPlane;

/// Primary gain keyword.
pub const GAIN_KEYWORD: &str = "GAIN";
/// Filter identifier keyword.
pub const FILTER_KEYWORD: &str = "FILTER";

/// A single header value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Int(v) => Some(*v as f64),
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Text(s) => s.trim().parse().ok(),
            MetadataValue::Bool(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

/// Ordered header keyword map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata {
    entries: BTreeMap<String, MetadataValue>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<MetadataValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<MetadataValue>) {
        self.entries.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<MetadataValue> {
        self.entries.remove(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(MetadataValue::as_f64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MetadataValue::as_str)
    }

    /// Text value of `key`, failing with `MissingMetadata` when absent.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key)
            .ok_or_else(|| IsrError::MissingMetadata(key.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Where to find the gain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainLookup {
    /// Keyword consulted when `GAIN` is absent
    pub keyword: String,
    /// Used when neither keyword is present
    pub default_gain: f64,
}

impl Default for GainLookup {
    fn default() -> Self {
        Self {
            keyword: "CCDGAIN".to_string(),
            default_gain: 1.0,
        }
    }
}

impl GainLookup {
    /// Gain from `GAIN`, then the fallback keyword, then the default.
    pub fn resolve(&self, metadata: &Metadata) -> Result<f64> {
        let gain = match metadata
            .get_f64(GAIN_KEYWORD)
            .or_else(|| metadata.get_f64(&self.keyword))
        {
            Some(gain) => gain,
            None => {
                debug!(
                    "No {} or {} keyword, using default gain {}",
                    GAIN_KEYWORD, self.keyword, self.default_gain
                );
                self.default_gain
            }
        };

        if !(gain.is_finite() && gain > 0.0) {
            return Err(IsrError::InvalidParameter(format!(
                "gain must be positive, got {gain}"
            )));
        }
        Ok(gain)
    }
}

/// One amplifier's pixels and header.
#[derive(Debug, Clone, PartialEq)]
pub struct Exposure {
    pub plane: PixelPlane,
    pub metadata: Metadata,
}

impl Exposure {
    pub fn new(plane: PixelPlane, metadata: Metadata) -> Self {
        Self { plane, metadata }
    }

    /// Wrap raw pixels: empty mask, variance `image / gain`, placed at
    /// `origin` in the parent frame.
    pub fn from_raw(
        image: Array2<f32>,
        metadata: Metadata,
        origin: (usize, usize),
        gain: &GainLookup,
    ) -> Result<Self> {
        let gain = gain.resolve(&metadata)?;
        let variance = image.mapv(|v| (v as f64 / gain) as f32);
        let mask = Array2::zeros(image.dim());
        let plane = PixelPlane::from_parts(image, mask, variance)?.with_origin(origin.0, origin.1);
        Ok(Self { plane, metadata })
    }

    /// Filter identifier, passed through unmodified.
    pub fn filter(&self) -> Option<&str> {
        self.metadata.get_str(FILTER_KEYWORD)
    }

    /// Parent-frame box for a local section string.
    pub fn section_bbox(&self, section: &str) -> Result<BoundingBox> {
        let local = BoundingBox::from_section(section)?;
        let (x0, y0) = self.plane.origin();
        Ok(local.moved_to(local.min_x + x0, local.min_y + y0))
    }

    /// Parent-frame box for the section stored under `keyword`.
    pub fn section(&self, keyword: &str) -> Result<BoundingBox> {
        self.section_bbox(self.metadata.require_str(keyword)?)
    }

    /// Deep copy of the local section `trimsec`, re-origined at the minimum
    /// of `amp_bbox`. The two must have the same dimensions.
    pub fn trim_to_section(&self, amp_bbox: &BoundingBox, trimsec: &str) -> Result<Exposure> {
        let trim_bbox = self.section_bbox(trimsec)?;
        if trim_bbox.dimensions() != amp_bbox.dimensions() {
            return Err(IsrError::dimension_mismatch(
                format!("trim section matching amplifier {amp_bbox}"),
                trim_bbox,
            ));
        }

        let mut plane = self.plane.extract(&trim_bbox)?;
        plane.set_origin(amp_bbox.min_x, amp_bbox.min_y);

        Ok(Exposure {
            plane,
            metadata: self.metadata.clone(),
        })
    }

    /// Trim to the section stored under `keyword`, dropping that keyword
    /// from the copy's metadata.
    pub fn trim(&self, amp_bbox: &BoundingBox, keyword: &str) -> Result<Exposure> {
        let trimsec = self.metadata.require_str(keyword)?;
        let mut trimmed = self.trim_to_section(amp_bbox, trimsec)?;
        trimmed.metadata.remove(keyword);
        Ok(trimmed)
    }
}
