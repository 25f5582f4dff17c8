use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::algo::stats::StatisticsControl;
use crate::calibrate::FlatScalingMode;
use crate::error::{IsrError, Result};
use crate::exposure::GainLookup;
use crate::image_proc::mask::{MaskPixel, MaskRegistry};
use crate::overscan::{OverscanFitType, OverscanOrientation};

/// Overscan fitting parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverscanConfig {
    /// Fit family name, e.g. "MEDIAN" or "AKIMA_SPLINE"
    pub fit_type: String,
    /// Polynomial degree, or number of spline control points
    pub order: usize,
    /// Whether the model varies along rows or columns
    pub orientation: OverscanOrientation,
    /// Clipping passes for the per-row/per-column statistics
    pub n_iter: usize,
    /// Clipping threshold in standard deviations
    pub n_sigma: f64,
    /// Mask planes whose pixels are ignored when fitting
    pub bad_mask_planes: Vec<String>,
}

impl Default for OverscanConfig {
    fn default() -> Self {
        Self {
            fit_type: OverscanFitType::Median.to_string(),
            order: 1,
            orientation: OverscanOrientation::PerRow,
            n_iter: 3,
            n_sigma: 3.0,
            bad_mask_planes: vec!["SAT".to_string()],
        }
    }
}

/// Flat-field normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlatConfig {
    /// "MEAN", "MEDIAN" or "USER"
    pub scaling_mode: String,
    /// Normalization used in USER mode
    pub user_scale: f64,
}

impl Default for FlatConfig {
    fn default() -> Self {
        Self {
            scaling_mode: FlatScalingMode::Mean.to_string(),
            user_scale: 1.0,
        }
    }
}

/// Saturation handling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaturationConfig {
    /// Pixel value above which a pixel is saturated (DN)
    pub level: f64,
    /// Radius in pixels by which saturated regions are grown
    pub grow_radius: usize,
    /// Interpolate over saturated regions
    pub interpolate: bool,
}

impl Default for SaturationConfig {
    fn default() -> Self {
        Self {
            level: 65_535.0,
            grow_radius: 1,
            interpolate: true,
        }
    }
}

/// Defect masking and interpolation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefectConfig {
    /// Interpolate over catalog defects after masking them BAD
    pub interpolate: bool,
}

impl Default for DefectConfig {
    fn default() -> Self {
        Self { interpolate: true }
    }
}

/// Header keywords holding section strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionKeywords {
    pub data: String,
    pub bias: String,
    pub trim: String,
}

impl Default for SectionKeywords {
    fn default() -> Self {
        Self {
            data: "DATASEC".to_string(),
            bias: "BIASSEC".to_string(),
            trim: "TRIMSEC".to_string(),
        }
    }
}

/// Configuration for single-amplifier instrument signature removal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsrConfig {
    pub overscan: OverscanConfig,
    pub flat: FlatConfig,
    pub saturation: SaturationConfig,
    pub defects: DefectConfig,
    /// PSF FWHM in pixels for every interpolation
    pub fwhm: f64,
    /// Gain lookup for variance construction
    pub gain: GainLookup,
    pub sections: SectionKeywords,
    /// Keyword holding the science exposure time, used to scale darks
    pub exposure_time_keyword: String,
    /// Write amplifier and CCD quality metrics into the exposure metadata
    pub record_quality: bool,
}

impl Default for IsrConfig {
    fn default() -> Self {
        Self {
            overscan: OverscanConfig::default(),
            flat: FlatConfig::default(),
            saturation: SaturationConfig::default(),
            defects: DefectConfig::default(),
            fwhm: 1.0,
            gain: GainLookup::default(),
            sections: SectionKeywords::default(),
            exposure_time_keyword: "EXPTIME".to_string(),
            record_quality: true,
        }
    }
}

impl IsrConfig {
    pub fn overscan_fit_type(&self) -> Result<OverscanFitType> {
        self.overscan.fit_type.parse()
    }

    pub fn flat_scaling_mode(&self) -> Result<FlatScalingMode> {
        self.flat.scaling_mode.parse()
    }

    /// Clipping control for overscan statistics, rejecting the configured
    /// mask planes as registered in `registry`.
    pub fn overscan_statistics(&self, registry: &MaskRegistry) -> StatisticsControl {
        let names: Vec<&str> = self
            .overscan
            .bad_mask_planes
            .iter()
            .map(String::as_str)
            .collect();
        let and_mask: MaskPixel = registry.union_of(&names);
        StatisticsControl {
            n_iter: self.overscan.n_iter,
            n_sigma: self.overscan.n_sigma,
            and_mask,
        }
    }

    /// Check names and numeric ranges.
    pub fn validate(&self) -> Result<()> {
        let fit_type = self.overscan_fit_type()?;
        let mode = self.flat_scaling_mode()?;

        let is_spline = matches!(
            fit_type,
            OverscanFitType::NaturalSpline
                | OverscanFitType::CubicSpline
                | OverscanFitType::AkimaSpline
        );
        if is_spline && self.overscan.order < 2 {
            return Err(IsrError::InvalidParameter(format!(
                "{fit_type} needs order >= 2, got {}",
                self.overscan.order
            )));
        }
        if !(self.overscan.n_sigma.is_finite() && self.overscan.n_sigma > 0.0) {
            return Err(IsrError::InvalidParameter(format!(
                "overscan n_sigma must be positive, got {}",
                self.overscan.n_sigma
            )));
        }
        if mode == FlatScalingMode::User
            && !(self.flat.user_scale.is_finite() && self.flat.user_scale != 0.0)
        {
            return Err(IsrError::InvalidParameter(format!(
                "flat user_scale must be finite and non-zero, got {}",
                self.flat.user_scale
            )));
        }
        if !(self.fwhm.is_finite() && self.fwhm > 0.0) {
            return Err(IsrError::InvalidParameter(format!(
                "fwhm must be positive, got {}",
                self.fwhm
            )));
        }
        if self.saturation.level.is_nan() {
            return Err(IsrError::InvalidParameter("saturation level is NaN".to_string()));
        }
        if !(self.gain.default_gain.is_finite() && self.gain.default_gain > 0.0) {
            return Err(IsrError::InvalidParameter(format!(
                "default gain must be positive, got {}",
                self.gain.default_gain
            )));
        }
        Ok(())
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from JSON file and validate
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_proc::mask::MaskPlane;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_is_valid() {
        let config = IsrConfig::default();
        config.validate().unwrap();
        assert_eq!(config.overscan_fit_type().unwrap(), OverscanFitType::Median);
        assert_eq!(config.flat_scaling_mode().unwrap(), FlatScalingMode::Mean);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: IsrConfig = serde_json::from_str(
            r#"{"overscan": {"fit_type": "CHEB", "order": 3}, "fwhm": 2.5}"#,
        )
        .unwrap();
        assert_eq!(config.overscan_fit_type().unwrap(), OverscanFitType::Cheb);
        assert_eq!(config.overscan.order, 3);
        assert_eq!(config.overscan.n_iter, 3);
        assert_eq!(config.fwhm, 2.5);
        assert_eq!(config.sections.trim, "TRIMSEC");
    }

    #[test]
    fn test_unknown_names_rejected() {
        let mut config = IsrConfig::default();
        config.overscan.fit_type = "SPLINE".to_string();
        assert!(matches!(config.validate(), Err(IsrError::UnknownFitType(_))));

        let mut config = IsrConfig::default();
        config.flat.scaling_mode = "MODE".to_string();
        assert!(matches!(config.validate(), Err(IsrError::UnknownScalingMode(_))));
    }

    #[test]
    fn test_ranges_checked() {
        let mut config = IsrConfig::default();
        config.overscan.fit_type = "AKIMA_SPLINE".to_string();
        config.overscan.order = 1;
        assert!(matches!(config.validate(), Err(IsrError::InvalidParameter(_))));

        let mut config = IsrConfig::default();
        config.fwhm = 0.0;
        assert!(config.validate().is_err());

        let mut config = IsrConfig::default();
        config.flat.scaling_mode = "USER".to_string();
        config.flat.user_scale = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overscan_statistics_mask() {
        let config = IsrConfig::default();
        let ctrl = config.overscan_statistics(&MaskRegistry::new());
        assert_eq!(ctrl.and_mask, MaskPlane::Sat.bitmask());
        assert_eq!(ctrl.n_sigma, 3.0);
    }

    #[test]
    fn test_file_round_trip() {
        let file = NamedTempFile::new().unwrap();
        let mut config = IsrConfig::default();
        config.saturation.level = 40_000.0;
        config.overscan.orientation = OverscanOrientation::PerColumn;

        config.save_to_file(file.path()).unwrap();
        let loaded = IsrConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }
}
