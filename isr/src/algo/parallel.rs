//! Parallel processing across amplifiers.
//!
//! The correction core is single threaded; independent amplifiers (or
//! exposures) are the unit of parallelism. Each closure owns its input
//! outright, so no state is shared between workers.

use rayon::prelude::*;

use crate::error::{IsrError, Result};

/// Run `processor` on every item on the global rayon pool.
///
/// Results come back in input order.
pub fn process_amplifiers_in_parallel<T, R, F>(items: Vec<T>, processor: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Send + Sync,
{
    items.into_par_iter().map(processor).collect()
}

/// Average per-amplifier gains into one detector-wide gain.
///
/// Every gain must be finite and positive.
pub fn mean_gain(gains: &[f64]) -> Result<f64> {
    if gains.is_empty() {
        return Err(IsrError::InsufficientData(
            "no amplifier gains to average".to_string(),
        ));
    }
    if let Some(bad) = gains.iter().find(|g| !(g.is_finite() && **g > 0.0)) {
        return Err(IsrError::InvalidParameter(format!(
            "amplifier gain must be positive, got {bad}"
        )));
    }
    Ok(gains.iter().sum::<f64>() / gains.len() as f64)
}
