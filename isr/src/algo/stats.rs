//! Sigma-clipped statistics over plane regions.
//!
//! Every statistic is computed over the pixels of a region that are finite and
//! whose mask word does not intersect the control's `and_mask`. Clipping then
//! iterates: the location is the median of the kept set, the scale is its
//! unbiased standard deviation, and pixels further than `n_sigma * scale` from
//! the location are dropped. Iteration stops after `n_iter` passes or when a
//! pass drops nothing.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::error::{IsrError, Result};
use crate::image_proc::bbox::BoundingBox;
use crate::image_proc::mask::MaskPixel;
use crate::image_proc::plane::{PixelPlane, PlaneView};

/// Statistic to report from the clipped pixel set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statistic {
    Mean,
    Median,
    /// Unbiased (n - 1) standard deviation
    StdDev,
    /// Unbiased (n - 1) variance
    Variance,
    Min,
    Max,
}

/// Clipping parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsControl {
    /// Maximum number of clipping passes (0 disables clipping)
    pub n_iter: usize,
    /// Rejection radius in units of the standard deviation
    pub n_sigma: f64,
    /// Pixels whose mask intersects these bits are ignored
    pub and_mask: MaskPixel,
}

impl Default for StatisticsControl {
    fn default() -> Self {
        Self {
            n_iter: 3,
            n_sigma: 3.0,
            and_mask: 0,
        }
    }
}

impl StatisticsControl {
    /// No clipping at all; plain statistics over the unmasked finite pixels.
    pub fn unclipped() -> Self {
        Self {
            n_iter: 0,
            ..Self::default()
        }
    }

    pub fn with_and_mask(mut self, and_mask: MaskPixel) -> Self {
        self.and_mask = and_mask;
        self
    }
}

/// Summary of a clipped pixel set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClippedSummary {
    pub n_points: usize,
    pub mean: f64,
    pub median: f64,
    /// NaN when fewer than two points survive
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

/// Result of iterative sigma clipping.
#[derive(Debug, Clone, PartialEq)]
pub struct ClippedSample {
    /// Surviving values, in input order
    pub values: Vec<f64>,
    /// Number of passes that rejected at least one value
    pub passes: usize,
    /// Whether iteration stopped because a pass rejected nothing
    pub converged: bool,
}

/// Calculate median of a slice of f64 values
///
/// NaN values are ignored; infinities take part in the ordering. For
/// even-length data the two middle values are averaged.
pub fn median(values: &[f64]) -> Result<f64> {
    let mut valid_values: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();

    if valid_values.is_empty() {
        return Err(IsrError::InsufficientData(format!(
            "cannot compute median: {} total values, 0 valid",
            values.len()
        )));
    }

    valid_values.sort_by(f64::total_cmp);

    let median_value = if valid_values.len() % 2 == 0 {
        let mid = valid_values.len() / 2;
        (valid_values[mid - 1] + valid_values[mid]) / 2.0
    } else {
        valid_values[valid_values.len() / 2]
    };

    Ok(median_value)
}

/// Arithmetic mean.
pub fn mean(values: &[f64]) -> Result<f64> {
    if values.is_empty() {
        return Err(IsrError::InsufficientData(
            "cannot compute mean of an empty set".to_string(),
        ));
    }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

/// Unbiased (n - 1) variance.
pub fn variance(values: &[f64]) -> Result<f64> {
    if values.len() < 2 {
        return Err(IsrError::InsufficientData(format!(
            "variance needs at least 2 values, got {}",
            values.len()
        )));
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    Ok(ss / (values.len() - 1) as f64)
}

/// Unbiased standard deviation.
pub fn std_dev(values: &[f64]) -> Result<f64> {
    variance(values).map(f64::sqrt)
}

/// Collect the finite, unmasked pixels of an image window as f64.
pub fn collect_pixels(
    image: &ArrayView2<f32>,
    mask: Option<&ArrayView2<MaskPixel>>,
    and_mask: MaskPixel,
) -> Vec<f64> {
    match mask {
        Some(mask) if and_mask != 0 => image
            .iter()
            .zip(mask.iter())
            .filter(|(v, m)| v.is_finite() && *m & and_mask == 0)
            .map(|(&v, _)| v as f64)
            .collect(),
        _ => image
            .iter()
            .filter(|v| v.is_finite())
            .map(|&v| v as f64)
            .collect(),
    }
}

/// Iteratively sigma-clip `values`.
///
/// Non-finite values are dropped before the first pass. Fails with
/// `InsufficientData` when nothing is left to clip or a pass rejects every
/// value.
pub fn sigma_clip(values: &[f64], n_iter: usize, n_sigma: f64) -> Result<ClippedSample> {
    let mut kept: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if kept.is_empty() {
        return Err(IsrError::InsufficientData(format!(
            "no finite values among {} inputs",
            values.len()
        )));
    }

    let mut passes = 0;
    let mut converged = n_iter == 0;

    for _ in 0..n_iter {
        if kept.len() < 2 {
            converged = true;
            break;
        }

        let center = median(&kept)?;
        let scale = std_dev(&kept)?;
        let limit = n_sigma * scale;

        let before = kept.len();
        kept.retain(|v| (v - center).abs() <= limit);

        if kept.is_empty() {
            return Err(IsrError::InsufficientData(format!(
                "clipping at {n_sigma} sigma rejected all {before} values"
            )));
        }
        if kept.len() == before {
            converged = true;
            break;
        }
        passes += 1;
    }

    Ok(ClippedSample {
        values: kept,
        passes,
        converged,
    })
}

/// Evaluate one statistic over an already-prepared value set.
pub fn statistic_of(values: &[f64], statistic: Statistic) -> Result<f64> {
    if values.is_empty() {
        return Err(IsrError::InsufficientData(format!(
            "{statistic:?} of an empty set"
        )));
    }
    match statistic {
        Statistic::Mean => mean(values),
        Statistic::Median => median(values),
        Statistic::StdDev => std_dev(values),
        Statistic::Variance => variance(values),
        Statistic::Min => Ok(values.iter().copied().fold(f64::INFINITY, f64::min)),
        Statistic::Max => Ok(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
    }
}

/// Clip `values` per `ctrl` and evaluate `statistic` on the survivors.
///
/// `ctrl.and_mask` is irrelevant here since raw values carry no mask.
pub fn clipped_statistic_of(
    values: &[f64],
    statistic: Statistic,
    ctrl: &StatisticsControl,
) -> Result<f64> {
    let sample = sigma_clip(values, ctrl.n_iter, ctrl.n_sigma)?;
    statistic_of(&sample.values, statistic)
}

/// Clipped statistic over a borrowed plane window.
pub fn clipped_statistic_view(
    view: &PlaneView<'_>,
    statistic: Statistic,
    ctrl: &StatisticsControl,
) -> Result<f64> {
    let pixels = collect_pixels(&view.image, Some(&view.mask), ctrl.and_mask);
    if pixels.is_empty() {
        return Err(IsrError::InsufficientData(format!(
            "no usable pixels in region {}",
            view.bbox
        )));
    }
    clipped_statistic_of(&pixels, statistic, ctrl)
}

/// Clipped statistic over `region` of `plane`, or the whole plane when `None`.
pub fn clipped_statistic(
    plane: &PixelPlane,
    region: Option<&BoundingBox>,
    statistic: Statistic,
    ctrl: &StatisticsControl,
) -> Result<f64> {
    match region {
        Some(bbox) => clipped_statistic_view(&plane.view(bbox)?, statistic, ctrl),
        None => clipped_statistic_view(&plane.full_view(), statistic, ctrl),
    }
}

/// Every summary statistic of the clipped set of a plane window.
pub fn clipped_summary(view: &PlaneView<'_>, ctrl: &StatisticsControl) -> Result<ClippedSummary> {
    let pixels = collect_pixels(&view.image, Some(&view.mask), ctrl.and_mask);
    let sample = sigma_clip(&pixels, ctrl.n_iter, ctrl.n_sigma)?;
    let values = &sample.values;

    Ok(ClippedSummary {
        n_points: values.len(),
        mean: statistic_of(values, Statistic::Mean)?,
        median: statistic_of(values, Statistic::Median)?,
        std_dev: std_dev(values).unwrap_or(f64::NAN),
        min: statistic_of(values, Statistic::Min)?,
        max: statistic_of(values, Statistic::Max)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_proc::mask::MaskPlane;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_median_odd_length() {
        let values = vec![1.0, 3.0, 2.0, 5.0, 4.0];
        assert_eq!(median(&values).unwrap(), 3.0);
    }

    #[test]
    fn test_median_even_length() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(median(&values).unwrap(), 2.5);
    }

    #[test]
    fn test_median_with_nan() {
        let values = vec![1.0, f64::NAN, 3.0, 2.0, f64::NAN];
        assert_eq!(median(&values).unwrap(), 2.0);
    }

    #[test]
    fn test_median_with_negative_inf() {
        let values = vec![1.0, 2.0, f64::NEG_INFINITY, 3.0];
        assert_eq!(median(&values).unwrap(), 1.5);
    }

    #[test]
    fn test_median_all_nan() {
        let values = vec![f64::NAN, f64::NAN];
        assert!(matches!(
            median(&values),
            Err(IsrError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_unbiased_estimators() {
        let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(mean(&values).unwrap(), 5.0);
        // Sum of squared deviations is 32, n - 1 = 7
        assert_relative_eq!(variance(&values).unwrap(), 32.0 / 7.0, epsilon = 1e-12);
        assert_relative_eq!(
            std_dev(&values).unwrap(),
            (32.0f64 / 7.0).sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_std_dev_needs_two_values() {
        assert!(std_dev(&[1.0]).is_err());
        assert!(statistic_of(&[1.0], Statistic::StdDev).is_err());
        assert_eq!(statistic_of(&[1.0], Statistic::Median).unwrap(), 1.0);
    }

    #[test]
    fn test_sigma_clip_rejects_outlier() {
        let mut values: Vec<f64> = (0..50).map(|i| 100.0 + (i % 5) as f64 - 2.0).collect();
        values.push(10_000.0);

        let sample = sigma_clip(&values, 5, 3.0).unwrap();
        assert_eq!(sample.values.len(), 50);
        assert!(sample.converged);
        assert!(sample.passes >= 1);
        assert_relative_eq!(mean(&sample.values).unwrap(), 100.0, epsilon = 1e-12);
    }

    #[test]
    fn test_sigma_clip_is_idempotent_once_converged() {
        let mut values: Vec<f64> = (0..200).map(|i| ((i * 37) % 23) as f64).collect();
        values.extend([500.0, -300.0, 250.0]);

        let first = sigma_clip(&values, 20, 2.5).unwrap();
        assert!(first.converged);

        let second = sigma_clip(&first.values, 20, 2.5).unwrap();
        assert_eq!(second.values, first.values);
        assert_eq!(second.passes, 0);
    }

    #[test]
    fn test_non_finite_excluded_before_clipping() {
        let values = vec![1.0, 2.0, 3.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY];
        let sample = sigma_clip(&values, 3, 3.0).unwrap();
        assert_eq!(sample.values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_empty_input_fails() {
        assert!(matches!(
            sigma_clip(&[], 3, 3.0),
            Err(IsrError::InsufficientData(_))
        ));
        assert!(matches!(
            sigma_clip(&[f64::NAN], 3, 3.0),
            Err(IsrError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_clipped_statistic_respects_mask() {
        let mut plane = PixelPlane::from_image(Array2::from_elem((4, 4), 5.0f32)).unwrap();
        plane.image_mut()[[0, 0]] = 1000.0;
        plane.mask_mut()[[0, 0]] = MaskPlane::Sat.bitmask();

        let ctrl = StatisticsControl::unclipped().with_and_mask(MaskPlane::Sat.bitmask());
        let max = clipped_statistic(&plane, None, Statistic::Max, &ctrl).unwrap();
        assert_eq!(max, 5.0);

        let unmasked = StatisticsControl::unclipped();
        let max = clipped_statistic(&plane, None, Statistic::Max, &unmasked).unwrap();
        assert_eq!(max, 1000.0);
    }

    #[test]
    fn test_fully_masked_region_fails() {
        let mut plane = PixelPlane::new(3, 3).unwrap();
        plane.mask_mut().fill(MaskPlane::Bad.bitmask());

        let ctrl = StatisticsControl::default().with_and_mask(MaskPlane::Bad.bitmask());
        let result = clipped_statistic(&plane, None, Statistic::Mean, &ctrl);
        assert!(matches!(result, Err(IsrError::InsufficientData(_))));
    }

    #[test]
    fn test_region_statistic() {
        let mut plane = PixelPlane::new(6, 6).unwrap().with_values(1.0, 0, 0.0);
        let region = BoundingBox::new(2, 2, 3, 3).unwrap();
        plane.view_mut(&region).unwrap().image.fill(4.0);

        let ctrl = StatisticsControl::default();
        let inside = clipped_statistic(&plane, Some(&region), Statistic::Mean, &ctrl).unwrap();
        assert_eq!(inside, 4.0);
    }

    #[test]
    fn test_clipped_summary() {
        let image = Array2::from_shape_vec((2, 3), vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let plane = PixelPlane::from_image(image).unwrap();
        let summary = clipped_summary(&plane.full_view(), &StatisticsControl::unclipped()).unwrap();

        assert_eq!(summary.n_points, 6);
        assert_relative_eq!(summary.mean, 3.5);
        assert_relative_eq!(summary.median, 3.5);
        assert_relative_eq!(summary.std_dev, 3.5f64.sqrt(), epsilon = 1e-12);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 6.0);
    }
}
