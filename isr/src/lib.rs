//! Instrument signature removal for raw astronomical detector frames.
//!
//! The crate removes the detector's own imprint from one amplifier at a
//! time: overscan bias level, bias/dark/flat/illumination calibration
//! frames, non-linearity, saturated pixels and known defects. Every
//! correction works in place on a [`PixelPlane`](image_proc::plane::PixelPlane)
//! (image, mask and variance) and propagates the variance alongside the
//! image.
//!
//! # Module Organization
//!
//! - **algo**: clipped statistics, polynomial and spline fits, linearity
//!   lookup tables, the per-amplifier parallel helpers
//! - **image_proc**: bounding boxes, mask planes, pixel planes, footprints
//!   and the PSF kernel
//! - **overscan**: overscan model fitting and subtraction
//! - **defects** / **saturation**: masking and PSF-weighted interpolation
//! - **calibrate**: bias, dark, flat, illumination and linearity corrections
//! - **exposure** / **calib**: header metadata and calibration products
//! - **pipeline**: the single-amplifier correction sequence

pub mod algo;
pub mod calib;
pub mod calibrate;
pub mod config;
pub mod defects;
pub mod error;
pub mod exposure;
pub mod image_proc;
pub mod overscan;
pub mod pipeline;
pub mod quality;
pub mod saturation;

pub use config::IsrConfig;
pub use error::{IsrError, Result};
pub use exposure::{Exposure, Metadata};
pub use pipeline::{run_amplifier, run_amplifiers, AmpCalibrations, AmpJob, AmplifierIsr, IsrStage};
