//! Calibration frame arithmetic with variance propagation.
//!
//! Every operation mutates the science plane in place and keeps the image and
//! variance planes consistent:
//!
//! - bias: `I -= B`, `V += V_B`
//! - dark: `I -= s D`, `V += s^2 V_D` with `s = exposure_scaling / dark_scaling`
//! - flat and illumination: `I' = k I / F`, propagated to first order as
//!   `V' = (k / F)^2 V + (k I / F^2)^2 V_F`
//!
//! Frames without a variance plane contribute no variance. The mask plane is
//! never touched.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::algo::lookup_table::LinearityTable;
use crate::algo::stats::{clipped_statistic_of, collect_pixels, Statistic, StatisticsControl};
use crate::error::{IsrError, Result};
use crate::image_proc::bbox::BoundingBox;
use crate::image_proc::plane::PixelPlane;

/// A bias, dark, flat or illumination frame, read-only to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFrame {
    image: Array2<f32>,
    variance: Option<Array2<f32>>,
    origin: (usize, usize),
    /// Exposure time for darks, normalization for flats and illumination
    pub scaling: f64,
}

impl CalibrationFrame {
    pub fn new(image: Array2<f32>) -> Self {
        Self {
            image,
            variance: None,
            origin: (0, 0),
            scaling: 1.0,
        }
    }

    /// Image and variance copied out of a plane, keeping its origin.
    pub fn from_plane(plane: &PixelPlane) -> Self {
        Self {
            image: plane.image().clone(),
            variance: Some(plane.variance().clone()),
            origin: plane.origin(),
            scaling: 1.0,
        }
    }

    pub fn with_variance(mut self, variance: Array2<f32>) -> Result<Self> {
        if variance.dim() != self.image.dim() {
            return Err(IsrError::dimension_mismatch(
                format!("variance of shape {:?}", self.image.dim()),
                format!("{:?}", variance.dim()),
            ));
        }
        self.variance = Some(variance);
        Ok(self)
    }

    pub fn with_origin(mut self, x0: usize, y0: usize) -> Self {
        self.origin = (x0, y0);
        self
    }

    pub fn with_scaling(mut self, scaling: f64) -> Self {
        self.scaling = scaling;
        self
    }

    pub fn image(&self) -> &Array2<f32> {
        &self.image
    }

    pub fn variance(&self) -> Option<&Array2<f32>> {
        self.variance.as_ref()
    }

    pub fn origin(&self) -> (usize, usize) {
        self.origin
    }

    pub fn bbox(&self) -> BoundingBox {
        let (rows, cols) = self.image.dim();
        BoundingBox {
            min_x: self.origin.0,
            min_y: self.origin.1,
            max_x: self.origin.0 + cols.max(1) - 1,
            max_y: self.origin.1 + rows.max(1) - 1,
        }
    }

    fn check_grid(&self, science: &PixelPlane) -> Result<()> {
        if self.image.dim() != science.image().dim() || self.origin != science.origin() {
            return Err(IsrError::dimension_mismatch(science.bbox(), self.bbox()));
        }
        Ok(())
    }
}

fn check_scale(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value == 0.0 {
        return Err(IsrError::InvalidParameter(format!(
            "{name} must be finite and non-zero, got {value}"
        )));
    }
    Ok(())
}

/// Subtract a bias frame.
pub fn apply_bias(science: &mut PixelPlane, bias: &CalibrationFrame) -> Result<()> {
    scaled_subtract(science, bias, 1.0)
}

/// Subtract a dark frame scaled by `exposure_scaling / dark_scaling`.
pub fn apply_dark(
    science: &mut PixelPlane,
    dark: &CalibrationFrame,
    exposure_scaling: f64,
    dark_scaling: f64,
) -> Result<()> {
    check_scale("dark scaling", dark_scaling)?;
    let scale = exposure_scaling / dark_scaling;
    debug!("Applying dark with scale {:.4}", scale);
    scaled_subtract(science, dark, scale)
}

fn scaled_subtract(science: &mut PixelPlane, frame: &CalibrationFrame, scale: f64) -> Result<()> {
    frame.check_grid(science)?;

    Zip::from(science.image_mut())
        .and(&frame.image)
        .for_each(|s, &c| *s = (*s as f64 - scale * c as f64) as f32);

    if let Some(frame_var) = &frame.variance {
        let scale2 = scale * scale;
        Zip::from(science.variance_mut())
            .and(frame_var)
            .for_each(|v, &c| *v = (*v as f64 + scale2 * c as f64) as f32);
    }
    Ok(())
}

/// How the flat normalization is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlatScalingMode {
    /// Clipped mean of the flat
    #[default]
    Mean,
    /// Clipped median of the flat
    Median,
    /// Caller-supplied value
    User,
}

impl FromStr for FlatScalingMode {
    type Err = IsrError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MEAN" => Ok(FlatScalingMode::Mean),
            "MEDIAN" => Ok(FlatScalingMode::Median),
            "USER" => Ok(FlatScalingMode::User),
            other => Err(IsrError::UnknownScalingMode(other.to_string())),
        }
    }
}

impl fmt::Display for FlatScalingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlatScalingMode::Mean => write!(f, "MEAN"),
            FlatScalingMode::Median => write!(f, "MEDIAN"),
            FlatScalingMode::User => write!(f, "USER"),
        }
    }
}

/// Normalization of a flat for the given mode.
pub fn flat_scaling(
    flat: &CalibrationFrame,
    mode: FlatScalingMode,
    user_scale: f64,
    ctrl: &StatisticsControl,
) -> Result<f64> {
    let statistic = match mode {
        FlatScalingMode::User => return Ok(user_scale),
        FlatScalingMode::Mean => Statistic::Mean,
        FlatScalingMode::Median => Statistic::Median,
    };
    let pixels = collect_pixels(&flat.image.view(), None, 0);
    clipped_statistic_of(&pixels, statistic, ctrl)
}

/// Divide by a flat normalized by its mean, median or a user value.
///
/// # Arguments
/// * `science` - Plane to correct in place
/// * `flat` - Flat frame on the same pixel grid
/// * `mode` - How the flat normalization is chosen
/// * `user_scale` - Normalization used in USER mode
/// * `ctrl` - Clipping control for the MEAN and MEDIAN statistics
///
/// # Returns
/// The normalization used
pub fn apply_flat(
    science: &mut PixelPlane,
    flat: &CalibrationFrame,
    mode: FlatScalingMode,
    user_scale: f64,
    ctrl: &StatisticsControl,
) -> Result<f64> {
    flat.check_grid(science)?;
    let scaling = flat_scaling(flat, mode, user_scale, ctrl)?;
    check_scale("flat scaling", scaling)?;
    debug!("Applying flat with {} scaling {:.4}", mode, scaling);
    scaled_divide(science, flat, scaling)?;
    Ok(scaling)
}

/// Divide by an illumination correction normalized by `illumination_scaling`.
pub fn apply_illumination(
    science: &mut PixelPlane,
    illumination: &CalibrationFrame,
    illumination_scaling: f64,
) -> Result<()> {
    check_scale("illumination scaling", illumination_scaling)?;
    scaled_divide(science, illumination, illumination_scaling)
}

/// `I' = scaling * I / F` with first-order variance propagation.
fn scaled_divide(science: &mut PixelPlane, frame: &CalibrationFrame, scaling: f64) -> Result<()> {
    frame.check_grid(science)?;

    let original = science.image().clone();
    Zip::from(science.image_mut())
        .and(&frame.image)
        .for_each(|s, &f| *s = (scaling * *s as f64 / f as f64) as f32);

    match &frame.variance {
        Some(frame_var) => {
            Zip::from(science.variance_mut())
                .and(&original)
                .and(&frame.image)
                .and(frame_var)
                .for_each(|v, &i, &f, &vf| {
                    let (i, f, vf) = (i as f64, f as f64, vf as f64);
                    let ratio = scaling / f;
                    let term = scaling * i / (f * f);
                    *v = (ratio * ratio * *v as f64 + term * term * vf) as f32;
                });
        }
        None => {
            Zip::from(science.variance_mut())
                .and(&frame.image)
                .for_each(|v, &f| {
                    let ratio = scaling / f as f64;
                    *v = (ratio * ratio * *v as f64) as f32;
                });
        }
    }
    Ok(())
}

/// Correct non-linearity through a lookup table.
///
/// The table index is `round(pixel * gain)`. Multiplicative tables scale the
/// variance by the square of the applied factor; replacement tables leave it
/// alone. Returns the number of pixels whose index had to be clamped.
pub fn linearize(science: &mut PixelPlane, table: &LinearityTable, gain: f64) -> Result<usize> {
    if !(gain.is_finite() && gain > 0.0) {
        return Err(IsrError::InvalidParameter(format!(
            "gain must be positive, got {gain}"
        )));
    }

    let mut clamped = 0;
    let mut factors = Array2::<f64>::ones(science.image().dim());

    Zip::from(science.image_mut())
        .and(&mut factors)
        .for_each(|pixel, factor| {
            let (value, scale, was_clamped) = table.correct(*pixel as f64, gain);
            *pixel = value as f32;
            if let Some(scale) = scale {
                *factor = scale;
            }
            if was_clamped {
                clamped += 1;
            }
        });

    Zip::from(science.variance_mut())
        .and(&factors)
        .for_each(|v, &t| *v = (*v as f64 * t * t) as f32);

    if clamped > 0 {
        warn!(
            "{} pixels fell outside the {}-entry {} linearity table and were clamped",
            clamped,
            table.len(),
            table.kind()
        );
    }
    Ok(clamped)
}

/// Re-derive the variance as `image / gain`.
///
/// Only meaningful once the image is in electron-equivalent counts, i.e.
/// after every multiplicative correction.
pub fn update_variance_from_gain(science: &mut PixelPlane, gain: f64) -> Result<()> {
    if !(gain.is_finite() && gain > 0.0) {
        return Err(IsrError::InvalidParameter(format!(
            "gain must be positive, got {gain}"
        )));
    }
    let image = science.image().clone();
    Zip::from(science.variance_mut())
        .and(&image)
        .for_each(|v, &i| *v = (i as f64 / gain) as f32);
    Ok(())
}

/// Fringe correction.
pub fn fringe_correction(_science: &mut PixelPlane, _fringe: &CalibrationFrame) -> Result<()> {
    Err(IsrError::UnsupportedOperation("fringe correction".to_string()))
}

/// Pupil-ghost correction.
pub fn pupil_correction(_science: &mut PixelPlane, _pupil: &CalibrationFrame) -> Result<()> {
    Err(IsrError::UnsupportedOperation("pupil correction".to_string()))
}
