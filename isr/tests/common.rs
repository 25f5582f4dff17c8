//! Common utilities for isr integration tests

use isr::exposure::{Exposure, GainLookup, Metadata};
use ndarray::Array2;

/// Layout of a synthetic raw amplifier: a data block with a serial overscan
/// strip to its right.
#[derive(Debug, Clone)]
pub struct RawAmpConfig {
    pub data_width: usize,
    pub height: usize,
    pub overscan_width: usize,
    pub data_level: f32,
    pub overscan_level: f32,
    pub gain: f64,
    pub exposure_time: f64,
}

impl Default for RawAmpConfig {
    fn default() -> Self {
        Self {
            data_width: 10,
            height: 10,
            overscan_width: 3,
            data_level: 1000.0,
            overscan_level: 100.0,
            gain: 2.0,
            exposure_time: 20.0,
        }
    }
}

/// Build a raw exposure with DATASEC/BIASSEC keywords describing the layout.
pub fn raw_amplifier(config: &RawAmpConfig) -> Exposure {
    let width = config.data_width + config.overscan_width;
    let image = Array2::from_shape_fn((config.height, width), |(_, c)| {
        if c < config.data_width {
            config.data_level
        } else {
            config.overscan_level
        }
    });
    let metadata = Metadata::new()
        .with(
            "DATASEC",
            format!("[1:{},1:{}]", config.data_width, config.height),
        )
        .with(
            "BIASSEC",
            format!("[{}:{},1:{}]", config.data_width + 1, width, config.height),
        )
        .with("GAIN", config.gain)
        .with("EXPTIME", config.exposure_time)
        .with("FILTER", "r");

    Exposure::from_raw(image, metadata, (0, 0), &GainLookup::default())
        .expect("synthetic amplifier should be valid")
}
