//! Piecewise-cubic interpolating splines.
//!
//! All three families share one representation: per segment coefficients
//! `[a, b, c, d]` of `a + b*dx + c*dx^2 + d*dx^3`. They differ only in how the
//! coefficients are chosen:
//!
//! - natural: zero second derivative at both ends
//! - cubic: not-a-knot ends (third derivative continuous across the first and
//!   last interior knots)
//! - Akima: local slopes from the weighted neighbouring secant slopes, which
//!   avoids overshoot near sudden changes
//!
//! Outside the knot range the end segments are extended.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{IsrError, Result};

/// Spline family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplineKind {
    Natural,
    /// Not-a-knot cubic
    Cubic,
    Akima,
}

/// Interpolating cubic spline through a set of knots.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    kind: SplineKind,
    x: Vec<f64>,
    coeffs: Vec<[f64; 4]>,
}

impl CubicSpline {
    /// Build a spline of `kind` through `(x, y)`.
    ///
    /// `x` must be strictly increasing and hold at least two points. With two
    /// points every family degenerates to the straight line; with three the
    /// not-a-knot cubic is the interpolating parabola.
    pub fn new(kind: SplineKind, x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        if x.len() != y.len() {
            return Err(IsrError::dimension_mismatch(
                format!("{} knots", x.len()),
                format!("{} values", y.len()),
            ));
        }
        if x.len() < 2 {
            return Err(IsrError::InsufficientData(format!(
                "spline needs at least 2 knots, got {}",
                x.len()
            )));
        }
        if x.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(IsrError::InvalidParameter(
                "spline knots must be strictly increasing".to_string(),
            ));
        }

        let coeffs = if x.len() == 2 {
            let slope = (y[1] - y[0]) / (x[1] - x[0]);
            vec![[y[0], slope, 0.0, 0.0]]
        } else {
            match kind {
                SplineKind::Natural => natural_coefficients(&x, &y),
                SplineKind::Cubic => not_a_knot_coefficients(&x, &y)?,
                SplineKind::Akima => akima_coefficients(&x, &y),
            }
        };

        Ok(Self { kind, x, coeffs })
    }

    pub fn kind(&self) -> SplineKind {
        self.kind
    }

    pub fn knots(&self) -> &[f64] {
        &self.x
    }

    /// Evaluate the spline at `x`, extending the end segments beyond the knots.
    pub fn evaluate(&self, x: f64) -> f64 {
        let segment = self.find_segment(x);
        let dx = x - self.x[segment];
        let [a, b, c, d] = self.coeffs[segment];

        a + b * dx + c * dx * dx + d * dx * dx * dx
    }

    /// Find which segment contains the given x value
    ///
    /// Values left of the first knot map to the first segment and values right
    /// of the last knot to the last one.
    fn find_segment(&self, x: f64) -> usize {
        let mut left = 0;
        let mut right = self.x.len() - 1;

        while left < right - 1 {
            let mid = (left + right) / 2;
            if x < self.x[mid] {
                right = mid;
            } else {
                left = mid;
            }
        }
        left
    }
}

fn intervals(x: &[f64]) -> Vec<f64> {
    x.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Segment coefficients from knot second derivatives `m`.
fn coefficients_from_second_derivatives(x: &[f64], y: &[f64], m: &[f64]) -> Vec<[f64; 4]> {
    let h = intervals(x);
    (0..x.len() - 1)
        .map(|i| {
            let b = (y[i + 1] - y[i]) / h[i] - h[i] * (2.0 * m[i] + m[i + 1]) / 6.0;
            [y[i], b, m[i] / 2.0, (m[i + 1] - m[i]) / (6.0 * h[i])]
        })
        .collect()
}

/// Natural end conditions, solved with the Thomas algorithm.
fn natural_coefficients(x: &[f64], y: &[f64]) -> Vec<[f64; 4]> {
    let n = x.len();
    let h = intervals(x);
    let mut alpha = vec![0.0; n - 1];

    for i in 1..n - 1 {
        alpha[i] = (3.0 / h[i]) * (y[i + 1] - y[i]) - (3.0 / h[i - 1]) * (y[i] - y[i - 1]);
    }

    // Solve tridiagonal system for second derivatives
    let mut l = vec![1.0; n];
    let mut mu = vec![0.0; n];
    let mut z = vec![0.0; n];

    for i in 1..n - 1 {
        l[i] = 2.0 * (x[i + 1] - x[i - 1]) - h[i - 1] * mu[i - 1];
        mu[i] = h[i] / l[i];
        z[i] = (alpha[i] - h[i - 1] * z[i - 1]) / l[i];
    }

    let mut c = vec![0.0; n];
    let mut coeffs = vec![[0.0; 4]; n - 1];

    // Back substitution
    for j in (0..n - 1).rev() {
        c[j] = z[j] - mu[j] * c[j + 1];
        let b = (y[j + 1] - y[j]) / h[j] - h[j] * (c[j + 1] + 2.0 * c[j]) / 3.0;
        let d = (c[j + 1] - c[j]) / (3.0 * h[j]);
        coeffs[j] = [y[j], b, c[j], d];
    }

    coeffs
}

fn not_a_knot_coefficients(x: &[f64], y: &[f64]) -> Result<Vec<[f64; 4]>> {
    let n = x.len();
    let h = intervals(x);

    if n == 3 {
        // Both end conditions collapse to one: a single parabola
        let second_divided = ((y[2] - y[1]) / h[1] - (y[1] - y[0]) / h[0]) / (h[0] + h[1]);
        let m = vec![2.0 * second_divided; 3];
        return Ok(coefficients_from_second_derivatives(x, y, &m));
    }

    let mut system = DMatrix::<f64>::zeros(n, n);
    let mut rhs = DVector::<f64>::zeros(n);

    system[(0, 0)] = h[1];
    system[(0, 1)] = -(h[0] + h[1]);
    system[(0, 2)] = h[0];

    for i in 1..n - 1 {
        system[(i, i - 1)] = h[i - 1];
        system[(i, i)] = 2.0 * (h[i - 1] + h[i]);
        system[(i, i + 1)] = h[i];
        rhs[i] = 6.0 * ((y[i + 1] - y[i]) / h[i] - (y[i] - y[i - 1]) / h[i - 1]);
    }

    system[(n - 1, n - 3)] = h[n - 2];
    system[(n - 1, n - 2)] = -(h[n - 3] + h[n - 2]);
    system[(n - 1, n - 1)] = h[n - 3];

    let m = system.lu().solve(&rhs).ok_or_else(|| {
        IsrError::InvalidParameter("singular not-a-knot spline system".to_string())
    })?;

    Ok(coefficients_from_second_derivatives(
        x,
        y,
        m.as_slice(),
    ))
}

fn akima_coefficients(x: &[f64], y: &[f64]) -> Vec<[f64; 4]> {
    let n = x.len();
    let h = intervals(x);

    // Secant slopes padded with two extrapolated slopes at each end;
    // slope k of the padded sequence lives at index k + 2.
    let mut m = vec![0.0; n + 3];
    for i in 0..n - 1 {
        m[i + 2] = (y[i + 1] - y[i]) / h[i];
    }
    m[1] = 2.0 * m[2] - m[3];
    m[0] = 3.0 * m[2] - 2.0 * m[3];
    m[n + 1] = 2.0 * m[n] - m[n - 1];
    m[n + 2] = 3.0 * m[n] - 2.0 * m[n - 1];

    let t: Vec<f64> = (0..n)
        .map(|i| {
            let w_left = (m[i + 3] - m[i + 2]).abs();
            let w_right = (m[i + 1] - m[i]).abs();
            if w_left + w_right > 0.0 {
                (w_left * m[i + 1] + w_right * m[i + 2]) / (w_left + w_right)
            } else {
                (m[i + 1] + m[i + 2]) / 2.0
            }
        })
        .collect();

    (0..n - 1)
        .map(|i| {
            let secant = m[i + 2];
            [
                y[i],
                t[i],
                (3.0 * secant - 2.0 * t[i] - t[i + 1]) / h[i],
                (t[i] + t[i + 1] - 2.0 * secant) / (h[i] * h[i]),
            ]
        })
        .collect()
}
