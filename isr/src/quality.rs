//! Data-quality metrics for processed CCDs and raw amplifiers.

use serde::{Deserialize, Serialize};

use crate::algo::stats::{
    clipped_summary, collect_pixels, median, sigma_clip, statistic_of, Statistic,
    StatisticsControl,
};
use crate::error::{IsrError, Result};
use crate::exposure::Metadata;
use crate::image_proc::bbox::BoundingBox;
use crate::image_proc::mask::{MaskPlane, INTRP_PLANE};
use crate::image_proc::plane::PixelPlane;

/// Gain implied by the image and variance planes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectiveGain {
    pub median: f64,
    pub clipped_mean: f64,
}

/// Median and clipped mean of `image / variance` over pixels where the
/// ratio is finite.
pub fn effective_gain(plane: &PixelPlane) -> Result<EffectiveGain> {
    let ratios: Vec<f64> = plane
        .image()
        .iter()
        .zip(plane.variance().iter())
        .map(|(&i, &v)| i as f64 / v as f64)
        .filter(|r| r.is_finite())
        .collect();

    if ratios.is_empty() {
        return Err(IsrError::InsufficientData(
            "no pixels with a finite image/variance ratio".to_string(),
        ));
    }

    let ctrl = StatisticsControl::default();
    let clipped = sigma_clip(&ratios, ctrl.n_iter, ctrl.n_sigma)?;
    Ok(EffectiveGain {
        median: median(&ratios)?,
        clipped_mean: statistic_of(&clipped.values, Statistic::Mean)?,
    })
}

/// Whole-CCD metrics after correction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CcdQuality {
    pub n_saturated: usize,
    pub n_bad: usize,
    /// 4-sigma, 3-pass clipped mean
    pub clipped_mean: f64,
    pub clipped_std_dev: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

impl CcdQuality {
    /// Record the metrics as header keywords.
    pub fn write_to(&self, metadata: &mut Metadata) {
        metadata.set("nSaturatePix", self.n_saturated as i64);
        metadata.set("nBadCalibPix", self.n_bad as i64);
        metadata.set("imageClipMean4Sig3Pass", self.clipped_mean);
        metadata.set("imageSigma", self.clipped_std_dev);
        metadata.set("imageMedian", self.median);
        metadata.set("imageMin", self.min);
        metadata.set("imageMax", self.max);
    }
}

/// Saturated and bad pixel counts plus image statistics excluding BAD, SAT
/// and INTRP pixels.
///
/// Mean and standard deviation are 4-sigma, 3-pass clipped; median, min and
/// max are taken over every unmasked finite pixel.
pub fn ccd_quality(plane: &PixelPlane) -> Result<CcdQuality> {
    let sat = MaskPlane::Sat.bitmask();
    let bad = MaskPlane::Bad.bitmask();
    let and_mask = sat | bad | plane.registry().union_of(&[INTRP_PLANE]);

    let clip = StatisticsControl {
        n_iter: 3,
        n_sigma: 4.0,
        and_mask,
    };
    let view = plane.full_view();
    let clipped = clipped_summary(&view, &clip)?;
    let plain = clipped_summary(&view, &StatisticsControl::unclipped().with_and_mask(and_mask))?;

    Ok(CcdQuality {
        n_saturated: plane.count_masked(sat),
        n_bad: plane.count_masked(bad),
        clipped_mean: clipped.mean,
        clipped_std_dev: clipped.std_dev,
        median: plain.median,
        min: plain.min,
        max: plain.max,
    })
}

/// Per-amplifier metrics on the raw exposure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmpQuality {
    /// Data-region pixels above the saturation level or already flagged SAT
    pub n_saturated: usize,
    pub overscan_mean: f64,
    pub overscan_std_dev: f64,
    pub overscan_median: f64,
    pub overscan_min: f64,
    pub overscan_max: f64,
}

impl AmpQuality {
    /// Record the metrics as header keywords.
    pub fn write_to(&self, metadata: &mut Metadata) {
        metadata.set("ampSaturatePix", self.n_saturated as i64);
        metadata.set("overscanMean", self.overscan_mean);
        metadata.set("overscanStdDev", self.overscan_std_dev);
        metadata.set("overscanMedian", self.overscan_median);
        metadata.set("overscanMin", self.overscan_min);
        metadata.set("overscanMax", self.overscan_max);
    }
}

/// Saturation count in the data region and unclipped overscan statistics.
///
/// Meant for the raw exposure, before saturation masking: a data pixel counts
/// as saturated when it lies strictly above `saturation_level` or already
/// carries the SAT bit.
///
/// # Arguments
/// * `plane` - Raw amplifier plane
/// * `bias_bbox` - Overscan region in parent coordinates
/// * `data_bbox` - Data region in parent coordinates
/// * `saturation_level` - Saturation threshold in DN
///
/// # Returns
/// * `Ok(AmpQuality)` - Saturation count and overscan statistics, SAT pixels
///   excluded from the latter
/// * `Err(IsrError::InsufficientData)` - No usable overscan pixel
pub fn amp_quality(
    plane: &PixelPlane,
    bias_bbox: &BoundingBox,
    data_bbox: &BoundingBox,
    saturation_level: f64,
) -> Result<AmpQuality> {
    let sat = MaskPlane::Sat.bitmask();

    let data = plane.view(data_bbox)?;
    let n_saturated = data
        .image
        .iter()
        .zip(data.mask.iter())
        .filter(|(&v, &m)| v as f64 > saturation_level || m & sat != 0)
        .count();

    let bias = plane.view(bias_bbox)?;
    let pixels = collect_pixels(&bias.image, Some(&bias.mask), sat);
    if pixels.is_empty() {
        return Err(IsrError::InsufficientData(format!(
            "overscan region {bias_bbox} has no usable pixels"
        )));
    }

    Ok(AmpQuality {
        n_saturated,
        overscan_mean: statistic_of(&pixels, Statistic::Mean)?,
        overscan_std_dev: statistic_of(&pixels, Statistic::StdDev).unwrap_or(f64::NAN),
        overscan_median: statistic_of(&pixels, Statistic::Median)?,
        overscan_min: statistic_of(&pixels, Statistic::Min)?,
        overscan_max: statistic_of(&pixels, Statistic::Max)?,
    })
}
