//! Linearity lookup tables.
//!
//! A table is indexed by the raw pixel value scaled by the gain and rounded
//! to the nearest integer (half away from zero). Indices below zero or past
//! the end clamp to the nearest entry; callers are told how many pixels were
//! clamped so they can report it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{IsrError, Result};

/// How a table entry combines with the pixel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinearityKind {
    /// output = table[index]
    Replace,
    /// output = pixel * table[index]
    Multiplicative,
}

impl FromStr for LinearityKind {
    type Err = IsrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "REPLACE" => Ok(LinearityKind::Replace),
            "MULTIPLICATIVE" => Ok(LinearityKind::Multiplicative),
            other => Err(IsrError::InvalidParameter(format!(
                "unknown linearity table kind {other:?}"
            ))),
        }
    }
}

impl fmt::Display for LinearityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinearityKind::Replace => write!(f, "REPLACE"),
            LinearityKind::Multiplicative => write!(f, "MULTIPLICATIVE"),
        }
    }
}

/// Where a pixel landed in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableIndex {
    pub index: usize,
    /// The rounded value fell outside the table and was clamped
    pub clamped: bool,
}

/// A linearity correction lookup table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearityTable {
    kind: LinearityKind,
    values: Vec<f64>,
}

impl LinearityTable {
    /// Build a table; empty tables and non-finite entries are rejected.
    pub fn new(kind: LinearityKind, values: Vec<f64>) -> Result<Self> {
        if values.is_empty() {
            return Err(IsrError::InvalidParameter(
                "linearity table has no entries".to_string(),
            ));
        }
        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(IsrError::InvalidParameter(format!(
                "linearity table entry {pos} is not finite"
            )));
        }
        Ok(Self { kind, values })
    }

    pub fn kind(&self) -> LinearityKind {
        self.kind
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Table index for a finite pixel value.
    pub fn index_for(&self, pixel: f64, gain: f64) -> TableIndex {
        let rounded = (pixel * gain).round();
        let last = self.values.len() - 1;
        if rounded < 0.0 {
            TableIndex {
                index: 0,
                clamped: true,
            }
        } else if rounded > last as f64 {
            TableIndex {
                index: last,
                clamped: true,
            }
        } else {
            TableIndex {
                index: rounded as usize,
                clamped: false,
            }
        }
    }

    /// Corrected value for `pixel`, along with the factor applied to its
    /// standard deviation and whether the index was clamped.
    ///
    /// Non-finite pixels pass through untouched.
    pub fn correct(&self, pixel: f64, gain: f64) -> (f64, Option<f64>, bool) {
        if !pixel.is_finite() {
            return (pixel, None, false);
        }
        let TableIndex { index, clamped } = self.index_for(pixel, gain);
        let entry = self.values[index];
        match self.kind {
            LinearityKind::Replace => (entry, None, clamped),
            LinearityKind::Multiplicative => (pixel * entry, Some(entry), clamped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounding_half_away_from_zero() {
        let table = LinearityTable::new(LinearityKind::Replace, (0..10).map(|i| i as f64).collect())
            .unwrap();
        assert_eq!(table.index_for(2.5, 1.0).index, 3);
        assert_eq!(table.index_for(2.49, 1.0).index, 2);
        assert_eq!(table.index_for(1.5, 2.0).index, 3);
    }

    #[test]
    fn test_clamping() {
        let table = LinearityTable::new(LinearityKind::Replace, vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(
            table.index_for(-4.0, 1.0),
            TableIndex {
                index: 0,
                clamped: true
            }
        );
        assert_eq!(
            table.index_for(100.0, 1.0),
            TableIndex {
                index: 2,
                clamped: true
            }
        );
        assert!(!table.index_for(2.0, 1.0).clamped);
    }

    #[test]
    fn test_replace_and_multiplicative() {
        let values = vec![10.0, 20.0, 30.0, 40.0];
        let replace = LinearityTable::new(LinearityKind::Replace, values.clone()).unwrap();
        let scale = LinearityTable::new(LinearityKind::Multiplicative, values).unwrap();

        assert_eq!(replace.correct(2.0, 1.0), (30.0, None, false));
        assert_eq!(scale.correct(2.0, 1.0), (60.0, Some(30.0), false));
    }

    #[test]
    fn test_non_finite_passthrough() {
        let table = LinearityTable::new(LinearityKind::Replace, vec![1.0]).unwrap();
        let (value, _, clamped) = table.correct(f64::NAN, 1.0);
        assert!(value.is_nan());
        assert!(!clamped);
    }

    #[test]
    fn test_rejects_bad_tables() {
        assert!(LinearityTable::new(LinearityKind::Replace, vec![]).is_err());
        assert!(LinearityTable::new(LinearityKind::Replace, vec![1.0, f64::NAN]).is_err());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("replace".parse::<LinearityKind>().unwrap(), LinearityKind::Replace);
        assert_eq!(
            "MULTIPLICATIVE".parse::<LinearityKind>().unwrap(),
            LinearityKind::Multiplicative
        );
        assert!("additive".parse::<LinearityKind>().is_err());
    }
}
