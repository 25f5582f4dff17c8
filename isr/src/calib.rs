//! Calibration products and their JSON persistence.
//!
//! Every product is one variant of [`Calibration`]; the serialized form
//! carries a `calib_type` tag that selects the variant on load.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::algo::lookup_table::LinearityTable;
use crate::calibrate::CalibrationFrame;
use crate::defects::Defect;
use crate::error::{IsrError, Result};
use crate::exposure::{Metadata, MetadataValue};
use crate::image_proc::bbox::BoundingBox;

/// Fields shared by every calibration product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibHeader {
    /// Detector name
    pub detector_name: Option<String>,
    /// Detector serial number
    pub detector_serial: Option<String>,
    pub detector_id: Option<i64>,
    /// Schema version of the product
    pub version: u32,
    /// Creation time (Unix epoch seconds)
    pub calib_date: Option<u64>,
    /// Free-form header keywords
    pub metadata: Metadata,
}

impl CalibHeader {
    pub fn for_detector(name: &str, serial: &str) -> Self {
        Self {
            detector_name: Some(name.to_string()),
            detector_serial: Some(serial.to_string()),
            ..Self::default()
        }
    }

    /// Stamp the creation time with the current clock.
    pub fn stamp_date(&mut self) {
        self.calib_date = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs());
    }
}

/// A dataset identifier: dimension name to value.
pub type DataId = BTreeMap<String, MetadataValue>;

/// Which input data went into a calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub instrument: String,
    pub calib_type: String,
    /// Union of the keys of every data id
    pub dimensions: BTreeSet<String>,
    pub data_ids: Vec<DataId>,
}

impl Default for Provenance {
    fn default() -> Self {
        Self {
            instrument: "unknown".to_string(),
            calib_type: "unknown".to_string(),
            dimensions: BTreeSet::new(),
            data_ids: Vec::new(),
        }
    }
}

impl Provenance {
    pub fn new(instrument: &str, calib_type: &str) -> Self {
        Self {
            instrument: instrument.to_string(),
            calib_type: calib_type.to_string(),
            ..Self::default()
        }
    }

    /// Append data ids, extending the dimension set with any new keys.
    pub fn extend_from_data_ids<I>(&mut self, data_ids: I)
    where
        I: IntoIterator<Item = DataId>,
    {
        for data_id in data_ids {
            self.dimensions.extend(data_id.keys().cloned());
            self.data_ids.push(data_id);
        }
    }
}

/// Closed set of calibration products.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "calib_type")]
pub enum Calibration {
    Bias {
        header: CalibHeader,
        frame: CalibrationFrame,
    },
    Dark {
        header: CalibHeader,
        frame: CalibrationFrame,
    },
    Flat {
        header: CalibHeader,
        frame: CalibrationFrame,
    },
    Illumination {
        header: CalibHeader,
        frame: CalibrationFrame,
    },
    Linearizer {
        header: CalibHeader,
        table: LinearityTable,
    },
    Defects {
        header: CalibHeader,
        defects: Vec<Defect>,
    },
    Provenance {
        header: CalibHeader,
        provenance: Provenance,
    },
}

impl Calibration {
    /// Tag name of the variant.
    pub fn calib_type(&self) -> &'static str {
        match self {
            Calibration::Bias { .. } => "Bias",
            Calibration::Dark { .. } => "Dark",
            Calibration::Flat { .. } => "Flat",
            Calibration::Illumination { .. } => "Illumination",
            Calibration::Linearizer { .. } => "Linearizer",
            Calibration::Defects { .. } => "Defects",
            Calibration::Provenance { .. } => "Provenance",
        }
    }

    pub fn header(&self) -> &CalibHeader {
        match self {
            Calibration::Bias { header, .. }
            | Calibration::Dark { header, .. }
            | Calibration::Flat { header, .. }
            | Calibration::Illumination { header, .. }
            | Calibration::Linearizer { header, .. }
            | Calibration::Defects { header, .. }
            | Calibration::Provenance { header, .. } => header,
        }
    }

    pub fn header_mut(&mut self) -> &mut CalibHeader {
        match self {
            Calibration::Bias { header, .. }
            | Calibration::Dark { header, .. }
            | Calibration::Flat { header, .. }
            | Calibration::Illumination { header, .. }
            | Calibration::Linearizer { header, .. }
            | Calibration::Defects { header, .. }
            | Calibration::Provenance { header, .. } => header,
        }
    }

    /// The pixel frame of a bias, dark, flat or illumination product.
    pub fn frame(&self) -> Option<&CalibrationFrame> {
        match self {
            Calibration::Bias { frame, .. }
            | Calibration::Dark { frame, .. }
            | Calibration::Flat { frame, .. }
            | Calibration::Illumination { frame, .. } => Some(frame),
            _ => None,
        }
    }

    pub fn linearity_table(&self) -> Option<&LinearityTable> {
        match self {
            Calibration::Linearizer { table, .. } => Some(table),
            _ => None,
        }
    }

    pub fn defects(&self) -> Option<&[Defect]> {
        match self {
            Calibration::Defects { defects, .. } => Some(defects),
            _ => None,
        }
    }

    pub fn provenance(&self) -> Option<&Provenance> {
        match self {
            Calibration::Provenance { provenance, .. } => Some(provenance),
            _ => None,
        }
    }

    /// Re-check invariants that deserialization cannot enforce.
    pub fn validate(&self) -> Result<()> {
        match self {
            Calibration::Bias { frame, .. }
            | Calibration::Dark { frame, .. }
            | Calibration::Flat { frame, .. }
            | Calibration::Illumination { frame, .. } => {
                if frame.image().is_empty() {
                    return Err(IsrError::MalformedRegion(format!(
                        "{} frame has no pixels",
                        self.calib_type()
                    )));
                }
                if let Some(variance) = frame.variance() {
                    if variance.dim() != frame.image().dim() {
                        return Err(IsrError::dimension_mismatch(
                            format!("variance of shape {:?}", frame.image().dim()),
                            format!("{:?}", variance.dim()),
                        ));
                    }
                }
            }
            Calibration::Linearizer { table, .. } => {
                LinearityTable::new(table.kind(), table.values().to_vec())?;
            }
            Calibration::Defects { defects, .. } => {
                for defect in defects {
                    let b = defect.bbox;
                    BoundingBox::new(b.min_x, b.min_y, b.max_x, b.max_y)?;
                }
            }
            Calibration::Provenance { .. } => {}
        }
        Ok(())
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from JSON file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let calib: Self = serde_json::from_str(&json)?;
        calib.validate()?;
        Ok(calib)
    }
}
