//! Numerical building blocks: clipped statistics, curve fitting, lookup
//! tables and the amplifier-level parallel helpers.

pub mod lookup_table;
pub mod parallel;
pub mod poly;
pub mod spline;
pub mod stats;

pub use lookup_table::{LinearityKind, LinearityTable};
pub use parallel::{mean_gain, process_amplifiers_in_parallel};
pub use poly::{PolynomialBasis, PolynomialFit};
pub use spline::{CubicSpline, SplineKind};
pub use stats::{
    clipped_statistic, clipped_summary, median, sigma_clip, ClippedSummary, Statistic,
    StatisticsControl,
};
