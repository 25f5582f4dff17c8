//! Overscan bias-level modeling and subtraction.
//!
//! The overscan region is collapsed either to one scalar or to one value per
//! row (or column); the latter may then be smoothed by a polynomial or
//! spline fit. The resulting [`OverscanModel`] is subtracted from the image
//! plane of the data region (and of the overscan region itself), leaving the
//! mask and variance planes alone.
//!
//! Orientation is always explicit: [`OverscanOrientation::PerRow`] is an
//! overscan beside the data region, sharing its rows;
//! [`OverscanOrientation::PerColumn`] is one above or below it, sharing its
//! columns.

use std::fmt;
use std::str::FromStr;

use ndarray::{ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::algo::poly::{PolynomialBasis, PolynomialFit};
use crate::algo::spline::{CubicSpline, SplineKind};
use crate::algo::stats::{
    clipped_statistic_of, clipped_statistic_view, Statistic, StatisticsControl,
};
use crate::error::{IsrError, Result};
use crate::image_proc::bbox::BoundingBox;
use crate::image_proc::mask::MaskPixel;
use crate::image_proc::plane::{PixelPlane, PlaneView};

/// Overscan fit family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OverscanFitType {
    Mean,
    Median,
    MedianPerRow,
    Poly,
    Cheb,
    Leg,
    NaturalSpline,
    CubicSpline,
    AkimaSpline,
}

impl OverscanFitType {
    pub const ALL: [OverscanFitType; 9] = [
        OverscanFitType::Mean,
        OverscanFitType::Median,
        OverscanFitType::MedianPerRow,
        OverscanFitType::Poly,
        OverscanFitType::Cheb,
        OverscanFitType::Leg,
        OverscanFitType::NaturalSpline,
        OverscanFitType::CubicSpline,
        OverscanFitType::AkimaSpline,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OverscanFitType::Mean => "MEAN",
            OverscanFitType::Median => "MEDIAN",
            OverscanFitType::MedianPerRow => "MEDIAN_PER_ROW",
            OverscanFitType::Poly => "POLY",
            OverscanFitType::Cheb => "CHEB",
            OverscanFitType::Leg => "LEG",
            OverscanFitType::NaturalSpline => "NATURAL_SPLINE",
            OverscanFitType::CubicSpline => "CUBIC_SPLINE",
            OverscanFitType::AkimaSpline => "AKIMA_SPLINE",
        }
    }
}

impl FromStr for OverscanFitType {
    type Err = IsrError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|fit| fit.name() == s)
            .ok_or_else(|| IsrError::UnknownFitType(s.to_string()))
    }
}

impl TryFrom<String> for OverscanFitType {
    type Error = IsrError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<OverscanFitType> for String {
    fn from(value: OverscanFitType) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for OverscanFitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Axis along which the overscan is collapsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverscanOrientation {
    /// One model value per row; overscan lies beside the data region
    #[default]
    PerRow,
    /// One model value per column; overscan lies above or below
    PerColumn,
}

impl OverscanOrientation {
    /// Parent-frame index of pixel `(x, y)` along the model axis.
    fn index_of(self, x: usize, y: usize) -> usize {
        match self {
            OverscanOrientation::PerRow => y,
            OverscanOrientation::PerColumn => x,
        }
    }

    /// First index and lane axis of a window.
    fn lanes(self, bbox: &BoundingBox) -> (usize, Axis) {
        match self {
            OverscanOrientation::PerRow => (bbox.min_y, Axis(0)),
            OverscanOrientation::PerColumn => (bbox.min_x, Axis(1)),
        }
    }
}

/// A fitted overscan level.
#[derive(Debug, Clone)]
pub enum OverscanModel {
    /// One level for the whole amplifier
    Constant(f64),
    /// One level per row or column, starting at parent index `start`
    Profile {
        orientation: OverscanOrientation,
        start: usize,
        values: Vec<f64>,
    },
    /// Least-squares polynomial in the parent row or column index
    Polynomial {
        orientation: OverscanOrientation,
        fit: PolynomialFit,
    },
    /// Spline through binned control points
    Spline {
        orientation: OverscanOrientation,
        spline: CubicSpline,
    },
}

impl OverscanModel {
    pub fn orientation(&self) -> Option<OverscanOrientation> {
        match self {
            OverscanModel::Constant(_) => None,
            OverscanModel::Profile { orientation, .. }
            | OverscanModel::Polynomial { orientation, .. }
            | OverscanModel::Spline { orientation, .. } => Some(*orientation),
        }
    }

    /// Model level at parent index `index` along the model axis.
    ///
    /// Profiles clamp to their first or last value outside their range. An
    /// empty profile has no level and yields NaN.
    pub fn value_at(&self, index: usize) -> f64 {
        match self {
            OverscanModel::Constant(level) => *level,
            OverscanModel::Profile { start, values, .. } => {
                let offset = index.saturating_sub(*start);
                values
                    .get(offset)
                    .or(values.last())
                    .copied()
                    .unwrap_or(f64::NAN)
            }
            OverscanModel::Polynomial { fit, .. } => fit.evaluate(index as f64),
            OverscanModel::Spline { spline, .. } => spline.evaluate(index as f64),
        }
    }

    /// Level at parent pixel `(x, y)`.
    pub fn value_at_pixel(&self, x: usize, y: usize) -> f64 {
        match self.orientation() {
            Some(orientation) => self.value_at(orientation.index_of(x, y)),
            None => self.value_at(0),
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self, OverscanModel::Profile { values, .. } if values.is_empty())
    }
}

fn lane_values(
    image: ArrayView1<'_, f32>,
    mask: ArrayView1<'_, MaskPixel>,
    and_mask: MaskPixel,
) -> Vec<f64> {
    image
        .iter()
        .zip(mask.iter())
        .filter(|(v, m)| v.is_finite() && *m & and_mask == 0)
        .map(|(&v, _)| v as f64)
        .collect()
}

/// Clipped statistic of every row (or column) of the window, paired with its
/// parent index. Lanes without usable pixels are skipped.
fn collapse(
    view: &PlaneView<'_>,
    orientation: OverscanOrientation,
    statistic: Statistic,
    ctrl: &StatisticsControl,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let (start, axis) = orientation.lanes(&view.bbox);
    let mut indices = Vec::new();
    let mut values = Vec::new();

    for (offset, (image, mask)) in view
        .image
        .axis_iter(axis)
        .zip(view.mask.axis_iter(axis))
        .enumerate()
    {
        let lane = lane_values(image, mask, ctrl.and_mask);
        if lane.is_empty() {
            continue;
        }
        indices.push((start + offset) as f64);
        values.push(clipped_statistic_of(&lane, statistic, ctrl)?);
    }

    if values.is_empty() {
        return Err(IsrError::InsufficientData(format!(
            "overscan region {} has no usable pixels",
            view.bbox
        )));
    }
    Ok((indices, values))
}

/// Average `(index, value)` pairs into `n_bins` equal-width index bins.
///
/// Each non-empty bin yields one control point at its mean index and mean
/// value.
fn bin_control_points(indices: &[f64], values: &[f64], n_bins: usize) -> (Vec<f64>, Vec<f64>) {
    let lo = indices.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = indices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let width = (hi - lo) / n_bins as f64;

    let mut sums = vec![(0.0, 0.0, 0usize); n_bins];
    for (&index, &value) in indices.iter().zip(values) {
        let bin = if width > 0.0 {
            (((index - lo) / width) as usize).min(n_bins - 1)
        } else {
            0
        };
        sums[bin].0 += index;
        sums[bin].1 += value;
        sums[bin].2 += 1;
    }

    sums.into_iter()
        .filter(|(_, _, count)| *count > 0)
        .map(|(x, y, count)| (x / count as f64, y / count as f64))
        .unzip()
}

fn fit_polynomial(
    overscan: &PlaneView<'_>,
    basis: PolynomialBasis,
    degree: usize,
    orientation: OverscanOrientation,
    ctrl: &StatisticsControl,
) -> Result<OverscanModel> {
    let (indices, values) = collapse(overscan, orientation, Statistic::Mean, ctrl)?;
    Ok(OverscanModel::Polynomial {
        orientation,
        fit: PolynomialFit::fit(basis, &indices, &values, degree)?,
    })
}

fn fit_spline(
    overscan: &PlaneView<'_>,
    kind: SplineKind,
    n_bins: usize,
    orientation: OverscanOrientation,
    ctrl: &StatisticsControl,
) -> Result<OverscanModel> {
    if n_bins < 2 {
        return Err(IsrError::InvalidParameter(format!(
            "{kind:?} spline needs at least 2 control points, got {n_bins}"
        )));
    }
    let (indices, values) = collapse(overscan, orientation, Statistic::Mean, ctrl)?;
    let (knots, levels) = bin_control_points(&indices, &values, n_bins);
    Ok(OverscanModel::Spline {
        orientation,
        spline: CubicSpline::new(kind, knots, levels)?,
    })
}

/// Fit an overscan model to a window of the overscan region.
///
/// # Arguments
/// * `overscan` - Overscan pixels, with their mask
/// * `fit_type` - Model family
/// * `order` - Polynomial degree for POLY/CHEB/LEG, number of control-point
///   bins for the spline families; ignored otherwise
/// * `orientation` - Whether the model varies along rows or columns
/// * `ctrl` - Clipping control for the per-lane statistics
///
/// # Returns
/// The fitted model, or `InsufficientData` when no usable pixels remain
pub fn fit(
    overscan: &PlaneView<'_>,
    fit_type: OverscanFitType,
    order: usize,
    orientation: OverscanOrientation,
    ctrl: &StatisticsControl,
) -> Result<OverscanModel> {
    let model = match fit_type {
        OverscanFitType::Mean => {
            OverscanModel::Constant(clipped_statistic_view(overscan, Statistic::Mean, ctrl)?)
        }
        OverscanFitType::Median => {
            OverscanModel::Constant(clipped_statistic_view(overscan, Statistic::Median, ctrl)?)
        }
        OverscanFitType::MedianPerRow => {
            let (indices, values) = collapse(overscan, orientation, Statistic::Median, ctrl)?;
            let (start, _) = orientation.lanes(&overscan.bbox);
            let expected = match orientation {
                OverscanOrientation::PerRow => overscan.bbox.height(),
                OverscanOrientation::PerColumn => overscan.bbox.width(),
            };
            if indices.len() != expected {
                return Err(IsrError::InsufficientData(format!(
                    "{} of {expected} overscan lanes have no usable pixels",
                    expected - indices.len()
                )));
            }
            OverscanModel::Profile {
                orientation,
                start,
                values,
            }
        }
        OverscanFitType::Poly => {
            fit_polynomial(overscan, PolynomialBasis::Power, order, orientation, ctrl)?
        }
        OverscanFitType::Cheb => {
            fit_polynomial(overscan, PolynomialBasis::Chebyshev, order, orientation, ctrl)?
        }
        OverscanFitType::Leg => {
            fit_polynomial(overscan, PolynomialBasis::Legendre, order, orientation, ctrl)?
        }
        OverscanFitType::NaturalSpline => {
            fit_spline(overscan, SplineKind::Natural, order, orientation, ctrl)?
        }
        OverscanFitType::CubicSpline => {
            fit_spline(overscan, SplineKind::Cubic, order, orientation, ctrl)?
        }
        OverscanFitType::AkimaSpline => {
            fit_spline(overscan, SplineKind::Akima, order, orientation, ctrl)?
        }
    };

    debug!(
        "Overscan {} fit over {}: level {:.3} at first index",
        fit_type,
        overscan.bbox,
        model.value_at_pixel(overscan.bbox.min_x, overscan.bbox.min_y)
    );
    Ok(model)
}

/// Subtract `model` from the image plane inside `region`.
pub fn apply(plane: &mut PixelPlane, region: &BoundingBox, model: &OverscanModel) -> Result<()> {
    if model.is_empty() {
        return Err(IsrError::InsufficientData("overscan profile has no values".to_string()));
    }
    let mut view = plane.view_mut(region)?;
    for ((row, col), value) in view.image.indexed_iter_mut() {
        let level = model.value_at_pixel(region.min_x + col, region.min_y + row);
        *value = (*value as f64 - level) as f32;
    }
    Ok(())
}

/// Fit the overscan in `overscan_bbox` and subtract it from both the data and
/// the overscan region.
///
/// # Arguments
/// * `plane` - Untrimmed amplifier plane, corrected in place
/// * `data_bbox` - Data region in parent coordinates
/// * `overscan_bbox` - Overscan region; must span the data region along the
///   model axis
/// * `orientation` - Per-row or per-column model
/// * `fit_type` - Model family
/// * `order` - Degree or control-point count passed to [`fit`]
/// * `ctrl` - Clipping control, including the mask planes to ignore
///
/// # Returns
/// The subtracted model. On error the plane is left unchanged.
pub fn overscan_correction(
    plane: &mut PixelPlane,
    data_bbox: &BoundingBox,
    overscan_bbox: &BoundingBox,
    orientation: OverscanOrientation,
    fit_type: OverscanFitType,
    order: usize,
    ctrl: &StatisticsControl,
) -> Result<OverscanModel> {
    let shared_extent = match orientation {
        OverscanOrientation::PerRow => {
            overscan_bbox.min_y <= data_bbox.min_y && overscan_bbox.max_y >= data_bbox.max_y
        }
        OverscanOrientation::PerColumn => {
            overscan_bbox.min_x <= data_bbox.min_x && overscan_bbox.max_x >= data_bbox.max_x
        }
    };
    if !shared_extent {
        return Err(IsrError::dimension_mismatch(
            format!("overscan spanning data region {data_bbox} ({orientation:?})"),
            overscan_bbox,
        ));
    }

    let model = fit(&plane.view(overscan_bbox)?, fit_type, order, orientation, ctrl)?;
    apply(plane, data_bbox, &model)?;
    apply(plane, overscan_bbox, &model)?;
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    /// 10x10 data region of 10 at the origin, with a 3-pixel overscan of 2
    /// either to the right (per row) or below (per column).
    fn amp(orientation: OverscanOrientation) -> (PixelPlane, BoundingBox, BoundingBox) {
        let data = BoundingBox::new(0, 0, 9, 9).unwrap();
        let (plane, overscan) = match orientation {
            OverscanOrientation::PerRow => (
                PixelPlane::new(13, 10).unwrap(),
                BoundingBox::new(10, 0, 12, 9).unwrap(),
            ),
            OverscanOrientation::PerColumn => (
                PixelPlane::new(10, 13).unwrap(),
                BoundingBox::new(0, 10, 9, 12).unwrap(),
            ),
        };
        let mut plane = plane.with_values(10.0, 0, 0.0);
        plane.view_mut(&overscan).unwrap().image.fill(2.0);
        (plane, data, overscan)
    }

    #[test]
    fn test_constant_fits_both_orientations() {
        for orientation in [OverscanOrientation::PerRow, OverscanOrientation::PerColumn] {
            for fit_type in [OverscanFitType::Mean, OverscanFitType::Median] {
                let (mut plane, data, overscan) = amp(orientation);
                overscan_correction(
                    &mut plane,
                    &data,
                    &overscan,
                    orientation,
                    fit_type,
                    1,
                    &StatisticsControl::default(),
                )
                .unwrap();

                assert!(plane.view(&data).unwrap().image.iter().all(|&v| v == 8.0));
                assert!(plane.view(&overscan).unwrap().image.iter().all(|&v| v == 0.0));
            }
        }
    }

    #[test]
    fn test_mask_and_variance_untouched() {
        let (mut plane, data, overscan) = amp(OverscanOrientation::PerRow);
        plane.variance_mut().fill(3.0);
        plane.mask_mut()[[0, 0]] = 1;

        overscan_correction(
            &mut plane,
            &data,
            &overscan,
            OverscanOrientation::PerRow,
            OverscanFitType::MedianPerRow,
            1,
            &StatisticsControl::default(),
        )
        .unwrap();

        assert!(plane.variance().iter().all(|&v| v == 3.0));
        assert_eq!(plane.count_masked(1), 1);
    }

    /// Overscan row i holds 2 + i + {-0.5, 0, 0.5}.
    fn sloped_amp() -> (PixelPlane, BoundingBox, BoundingBox) {
        let (mut plane, data, overscan) = amp(OverscanOrientation::PerRow);
        let mut view = plane.view_mut(&overscan).unwrap();
        for ((row, col), value) in view.image.indexed_iter_mut() {
            *value = 2.0 + row as f32 + (col as f32 - 1.0) * 0.5;
        }
        (plane, data, overscan)
    }

    #[test]
    fn test_polynomial_fits_follow_slope() {
        for fit_type in [OverscanFitType::Poly, OverscanFitType::Cheb, OverscanFitType::Leg] {
            let (mut plane, data, overscan) = sloped_amp();
            overscan_correction(
                &mut plane,
                &data,
                &overscan,
                OverscanOrientation::PerRow,
                fit_type,
                1,
                &StatisticsControl::default(),
            )
            .unwrap();

            for y in 0..10 {
                for x in 0..10 {
                    assert_abs_diff_eq!(
                        plane.get(x, y).unwrap(),
                        8.0 - y as f32,
                        epsilon = 1e-5
                    );
                }
                for (x, expected) in [(10, -0.5), (11, 0.0), (12, 0.5)] {
                    assert_abs_diff_eq!(plane.get(x, y).unwrap(), expected, epsilon = 1e-5);
                }
            }
        }
    }

    #[test]
    fn test_spline_fits_interpolate_control_points() {
        for fit_type in [
            OverscanFitType::NaturalSpline,
            OverscanFitType::CubicSpline,
            OverscanFitType::AkimaSpline,
        ] {
            let (plane, _, overscan) = sloped_amp();
            let model = fit(
                &plane.view(&overscan).unwrap(),
                fit_type,
                5,
                OverscanOrientation::PerRow,
                &StatisticsControl::default(),
            )
            .unwrap();

            // Bins of two rows each: control points at 0.5, 2.5, ... with level 2 + index
            let OverscanModel::Spline { spline, .. } = &model else {
                panic!("expected a spline model for {fit_type}");
            };
            assert_eq!(spline.knots(), &[0.5, 2.5, 4.5, 6.5, 8.5]);
            for &knot in spline.knots() {
                assert_abs_diff_eq!(spline.evaluate(knot), 2.0 + knot, epsilon = 1e-9);
            }

            let (mut plane, data, overscan) = sloped_amp();
            overscan_correction(
                &mut plane,
                &data,
                &overscan,
                OverscanOrientation::PerRow,
                fit_type,
                5,
                &StatisticsControl::default(),
            )
            .unwrap();
            for y in 0..10 {
                assert_abs_diff_eq!(plane.get(3, y).unwrap(), 8.0 - y as f32, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_median_per_row_profile() {
        let (plane, _, overscan) = sloped_amp();
        let model = fit(
            &plane.view(&overscan).unwrap(),
            OverscanFitType::MedianPerRow,
            1,
            OverscanOrientation::PerRow,
            &StatisticsControl::default(),
        )
        .unwrap();
        for y in 0..10 {
            assert_abs_diff_eq!(model.value_at(y), 2.0 + y as f64, epsilon = 1e-12);
        }
        // Clamped beyond the fitted rows
        assert_abs_diff_eq!(model.value_at(50), 11.0, epsilon = 1e-12);
    }

    #[test]
    fn test_outlier_rejected_from_constant_level() {
        let mut image = Array2::<f32>::from_elem((20, 5), 2.0);
        image[[7, 2]] = 5000.0;
        let plane = PixelPlane::from_image(image).unwrap();
        let model = fit(
            &plane.full_view(),
            OverscanFitType::Mean,
            1,
            OverscanOrientation::PerRow,
            &StatisticsControl::default(),
        )
        .unwrap();
        assert_abs_diff_eq!(model.value_at(0), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_fit_type_names() {
        for fit_type in OverscanFitType::ALL {
            assert_eq!(fit_type.name().parse::<OverscanFitType>().unwrap(), fit_type);
        }
        assert!(matches!(
            "QUADRATIC".parse::<OverscanFitType>(),
            Err(IsrError::UnknownFitType(_))
        ));
        let json = serde_json::to_string(&OverscanFitType::AkimaSpline).unwrap();
        assert_eq!(json, "\"AKIMA_SPLINE\"");
        assert!(serde_json::from_str::<OverscanFitType>("\"SPLINEY\"").is_err());
    }

    #[test]
    fn test_misoriented_overscan_rejected() {
        let (mut plane, data, overscan) = amp(OverscanOrientation::PerRow);
        let result = overscan_correction(
            &mut plane,
            &data,
            &overscan,
            OverscanOrientation::PerColumn,
            OverscanFitType::Mean,
            1,
            &StatisticsControl::default(),
        );
        assert!(matches!(result, Err(IsrError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_spline_order_too_small() {
        let (plane, _, overscan) = sloped_amp();
        let result = fit(
            &plane.view(&overscan).unwrap(),
            OverscanFitType::NaturalSpline,
            1,
            OverscanOrientation::PerRow,
            &StatisticsControl::default(),
        );
        assert!(matches!(result, Err(IsrError::InvalidParameter(_))));
    }

    #[test]
    fn test_empty_profile_rejected() {
        let model = OverscanModel::Profile {
            orientation: OverscanOrientation::PerRow,
            start: 0,
            values: Vec::new(),
        };
        assert!(model.value_at(3).is_nan());

        let (mut plane, data, _) = amp(OverscanOrientation::PerRow);
        let before = plane.image().clone();
        assert!(matches!(
            apply(&mut plane, &data, &model),
            Err(IsrError::InsufficientData(_))
        ));
        assert_eq!(plane.image(), &before);
    }
}
