//! Single-amplifier correction sequence.
//!
//! An [`AmplifierIsr`] walks one amplifier exposure through the correction
//! stages in a fixed order. Stages may be skipped, never repeated or
//! reordered. Corrections are applied in place and are not rolled back when
//! a later stage fails.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::algo::lookup_table::LinearityTable;
use crate::algo::parallel::process_amplifiers_in_parallel;
use crate::algo::stats::StatisticsControl;
use crate::calib::Calibration;
use crate::calibrate::{
    apply_bias, apply_dark, apply_flat, apply_illumination, linearize, update_variance_from_gain,
    CalibrationFrame, FlatScalingMode,
};
use crate::config::IsrConfig;
use crate::defects::{mask_and_interpolate_defects, Defect};
use crate::error::{IsrError, Result};
use crate::exposure::Exposure;
use crate::image_proc::bbox::BoundingBox;
use crate::image_proc::mask::MaskPlane;
use crate::overscan::{overscan_correction, OverscanFitType, OverscanModel, OverscanOrientation};
use crate::quality::{amp_quality, ccd_quality};
use crate::saturation::saturation_correction;

/// Position of an amplifier in the correction sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IsrStage {
    Raw,
    OverscanSubtracted,
    Trimmed,
    BiasCorrected,
    DarkCorrected,
    FlatCorrected,
    IlluminationCorrected,
    Linearized,
    SaturationMasked,
    DefectInterpolated,
    Done,
}

/// One amplifier exposure and how far it has been corrected.
#[derive(Debug, Clone)]
pub struct AmplifierIsr {
    name: String,
    exposure: Exposure,
    stage: IsrStage,
}

impl AmplifierIsr {
    pub fn new(name: &str, exposure: Exposure) -> Self {
        Self {
            name: name.to_string(),
            exposure,
            stage: IsrStage::Raw,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> IsrStage {
        self.stage
    }

    pub fn exposure(&self) -> &Exposure {
        &self.exposure
    }

    pub fn into_exposure(self) -> Exposure {
        self.exposure
    }

    /// Run `op` as the transition into `requested`.
    ///
    /// The stage only advances when `op` succeeds; any failure is wrapped
    /// with the amplifier name and the requested stage.
    fn transition<T, F>(&mut self, requested: IsrStage, op: F) -> Result<T>
    where
        F: FnOnce(&mut Exposure) -> Result<T>,
    {
        let wrap = |source: IsrError, amp: &str| IsrError::Stage {
            amp: amp.to_string(),
            stage: requested,
            source: Box::new(source),
        };

        if requested <= self.stage {
            let order = IsrError::StageOrder {
                current: self.stage,
                requested,
            };
            return Err(wrap(order, &self.name));
        }

        let out = op(&mut self.exposure).map_err(|e| wrap(e, &self.name))?;
        info!("Amplifier {}: {:?} -> {:?}", self.name, self.stage, requested);
        self.stage = requested;
        Ok(out)
    }

    /// Fit the overscan and subtract it from the data and overscan regions.
    pub fn subtract_overscan(
        &mut self,
        data_bbox: &BoundingBox,
        overscan_bbox: &BoundingBox,
        orientation: OverscanOrientation,
        fit_type: OverscanFitType,
        order: usize,
        ctrl: &StatisticsControl,
    ) -> Result<OverscanModel> {
        self.transition(IsrStage::OverscanSubtracted, |exposure| {
            overscan_correction(
                &mut exposure.plane,
                data_bbox,
                overscan_bbox,
                orientation,
                fit_type,
                order,
                ctrl,
            )
        })
    }

    /// Keep only `data_bbox`, at its parent-frame position.
    pub fn trim(&mut self, data_bbox: &BoundingBox) -> Result<()> {
        self.transition(IsrStage::Trimmed, |exposure| {
            exposure.plane = exposure.plane.extract(data_bbox)?;
            Ok(())
        })
    }

    /// Trim to the section under `keyword`, re-origined at `amp_bbox`.
    pub fn trim_to_amp(&mut self, amp_bbox: &BoundingBox, keyword: &str) -> Result<()> {
        self.transition(IsrStage::Trimmed, |exposure| {
            *exposure = exposure.trim(amp_bbox, keyword)?;
            Ok(())
        })
    }

    pub fn apply_bias(&mut self, bias: &CalibrationFrame) -> Result<()> {
        self.transition(IsrStage::BiasCorrected, |exposure| {
            apply_bias(&mut exposure.plane, bias)
        })
    }

    pub fn apply_dark(
        &mut self,
        dark: &CalibrationFrame,
        exposure_scaling: f64,
        dark_scaling: f64,
    ) -> Result<()> {
        self.transition(IsrStage::DarkCorrected, |exposure| {
            apply_dark(&mut exposure.plane, dark, exposure_scaling, dark_scaling)
        })
    }

    /// Returns the flat normalization used.
    pub fn apply_flat(
        &mut self,
        flat: &CalibrationFrame,
        mode: FlatScalingMode,
        user_scale: f64,
        ctrl: &StatisticsControl,
    ) -> Result<f64> {
        self.transition(IsrStage::FlatCorrected, |exposure| {
            apply_flat(&mut exposure.plane, flat, mode, user_scale, ctrl)
        })
    }

    pub fn apply_illumination(
        &mut self,
        illumination: &CalibrationFrame,
        scaling: f64,
    ) -> Result<()> {
        self.transition(IsrStage::IlluminationCorrected, |exposure| {
            apply_illumination(&mut exposure.plane, illumination, scaling)
        })
    }

    /// Returns the number of pixels clamped to the table ends.
    pub fn linearize(&mut self, table: &LinearityTable, gain: f64) -> Result<usize> {
        self.transition(IsrStage::Linearized, |exposure| {
            linearize(&mut exposure.plane, table, gain)
        })
    }

    /// Mask (and optionally interpolate) pixels above `level`.
    pub fn mask_saturation(
        &mut self,
        level: f64,
        fwhm: f64,
        grow_radius: usize,
        interpolate: bool,
    ) -> Result<Vec<Defect>> {
        self.transition(IsrStage::SaturationMasked, |exposure| {
            saturation_correction(&mut exposure.plane, level, fwhm, grow_radius, interpolate)
        })
    }

    /// Mask catalog defects BAD and optionally interpolate over them.
    pub fn interpolate_defects(
        &mut self,
        defects: &[Defect],
        fwhm: f64,
        interpolate: bool,
    ) -> Result<usize> {
        self.transition(IsrStage::DefectInterpolated, |exposure| {
            mask_and_interpolate_defects(
                &mut exposure.plane,
                defects,
                fwhm,
                interpolate,
                MaskPlane::Bad.bitmask(),
            )
        })
    }

    /// Mark the amplifier done, re-deriving the variance from `gain` if one
    /// is given.
    pub fn finish(&mut self, gain: Option<f64>) -> Result<()> {
        self.transition(IsrStage::Done, |exposure| match gain {
            Some(gain) => update_variance_from_gain(&mut exposure.plane, gain),
            None => Ok(()),
        })
    }
}

/// Calibration products for one amplifier. Absent products skip their stage.
#[derive(Debug, Clone, Default)]
pub struct AmpCalibrations {
    pub bias: Option<CalibrationFrame>,
    /// Dark frame; its `scaling` is the dark exposure time
    pub dark: Option<CalibrationFrame>,
    pub flat: Option<CalibrationFrame>,
    /// Illumination frame; its `scaling` is the normalization
    pub illumination: Option<CalibrationFrame>,
    pub linearizer: Option<LinearityTable>,
    pub defects: Vec<Defect>,
}

impl AmpCalibrations {
    /// Sort loaded products into their slots. Later products replace earlier
    /// ones of the same type; defect lists are concatenated.
    pub fn from_calibrations<'a, I>(calibrations: I) -> Self
    where
        I: IntoIterator<Item = &'a Calibration>,
    {
        let mut calibs = Self::default();
        for calibration in calibrations {
            match calibration {
                Calibration::Bias { frame, .. } => calibs.bias = Some(frame.clone()),
                Calibration::Dark { frame, .. } => calibs.dark = Some(frame.clone()),
                Calibration::Flat { frame, .. } => calibs.flat = Some(frame.clone()),
                Calibration::Illumination { frame, .. } => {
                    calibs.illumination = Some(frame.clone())
                }
                Calibration::Linearizer { table, .. } => calibs.linearizer = Some(table.clone()),
                Calibration::Defects { defects, .. } => {
                    calibs.defects.extend(defects.iter().cloned())
                }
                Calibration::Provenance { .. } => {}
            }
        }
        calibs
    }
}

/// Run every configured stage on one amplifier.
///
/// Data and overscan regions come from the section keywords in the exposure
/// metadata. The exposure is trimmed to its data region. Absent calibration
/// products skip their stage; saturation masking always runs.
///
/// With `record_quality` set, raw overscan statistics and the raw saturated
/// pixel count go into the metadata before any correction, and the CCD
/// statistics after the last stage.
///
/// # Arguments
/// * `name` - Amplifier name, carried in every error
/// * `exposure` - Raw amplifier exposure
/// * `calibs` - Calibration products for this amplifier
/// * `config` - Correction parameters
///
/// # Returns
/// * `Ok(Exposure)` - The corrected, trimmed exposure
/// * `Err(IsrError::Stage)` - The first failure, with the stage it happened in
pub fn run_amplifier(
    name: &str,
    exposure: Exposure,
    calibs: &AmpCalibrations,
    config: &IsrConfig,
) -> Result<Exposure> {
    let wrap = |stage: IsrStage| {
        move |source: IsrError| IsrError::Stage {
            amp: name.to_string(),
            stage,
            source: Box::new(source),
        }
    };

    config.validate().map_err(wrap(IsrStage::Raw))?;
    let fit_type = config.overscan_fit_type().map_err(wrap(IsrStage::Raw))?;
    let scaling_mode = config.flat_scaling_mode().map_err(wrap(IsrStage::Raw))?;
    let gain = config
        .gain
        .resolve(&exposure.metadata)
        .map_err(wrap(IsrStage::Raw))?;

    let data_bbox = exposure
        .section(&config.sections.data)
        .map_err(wrap(IsrStage::OverscanSubtracted))?;
    let bias_bbox = exposure
        .section(&config.sections.bias)
        .map_err(wrap(IsrStage::OverscanSubtracted))?;

    let mut amp = AmplifierIsr::new(name, exposure);

    if config.record_quality {
        let quality = amp_quality(
            &amp.exposure.plane,
            &bias_bbox,
            &data_bbox,
            config.saturation.level,
        )
        .map_err(wrap(IsrStage::Raw))?;
        quality.write_to(&mut amp.exposure.metadata);
    }

    let ctrl = config.overscan_statistics(amp.exposure.plane.registry());
    let model = amp.subtract_overscan(
        &data_bbox,
        &bias_bbox,
        config.overscan.orientation,
        fit_type,
        config.overscan.order,
        &ctrl,
    )?;
    debug!("Amplifier {} overscan model: {:?}", name, model);

    amp.trim(&data_bbox)?;

    if let Some(bias) = &calibs.bias {
        amp.apply_bias(bias)?;
    }
    if let Some(dark) = &calibs.dark {
        let exposure_time = amp
            .exposure
            .metadata
            .get_f64(&config.exposure_time_keyword)
            .ok_or_else(|| IsrError::MissingMetadata(config.exposure_time_keyword.clone()))
            .map_err(wrap(IsrStage::DarkCorrected))?;
        amp.apply_dark(dark, exposure_time, dark.scaling)?;
    }
    if let Some(flat) = &calibs.flat {
        amp.apply_flat(
            flat,
            scaling_mode,
            config.flat.user_scale,
            &StatisticsControl::default(),
        )?;
    }
    if let Some(illumination) = &calibs.illumination {
        amp.apply_illumination(illumination, illumination.scaling)?;
    }
    if let Some(table) = &calibs.linearizer {
        amp.linearize(table, gain)?;
    }

    amp.mask_saturation(
        config.saturation.level,
        config.fwhm,
        config.saturation.grow_radius,
        config.saturation.interpolate,
    )?;

    if !calibs.defects.is_empty() {
        amp.interpolate_defects(&calibs.defects, config.fwhm, config.defects.interpolate)?;
    }

    amp.finish(Some(gain))?;

    if config.record_quality {
        let quality = ccd_quality(&amp.exposure.plane).map_err(wrap(IsrStage::Done))?;
        quality.write_to(&mut amp.exposure.metadata);
    }

    Ok(amp.into_exposure())
}

/// One amplifier's inputs for [`run_amplifiers`].
#[derive(Debug, Clone)]
pub struct AmpJob {
    pub name: String,
    pub exposure: Exposure,
    pub calibs: AmpCalibrations,
}

/// Run [`run_amplifier`] on every job in parallel; results come back in job
/// order.
pub fn run_amplifiers(jobs: Vec<AmpJob>, config: &IsrConfig) -> Vec<Result<Exposure>> {
    process_amplifiers_in_parallel(jobs, |job| {
        run_amplifier(&job.name, job.exposure, &job.calibs, config)
    })
}
