//! Least-squares polynomial fits in power, Chebyshev and Legendre bases.
//!
//! Chebyshev and Legendre fits map the abscissa onto `[-1, 1]` over the span
//! of the fitted points before evaluating the basis; power-series fits use the
//! raw abscissa. The normal equations are never formed: the design matrix is
//! solved directly through its SVD.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{IsrError, Result};

/// Singular values below this fraction of the largest are treated as zero.
const SVD_RELATIVE_EPS: f64 = 1e-12;

/// Polynomial basis family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolynomialBasis {
    Power,
    Chebyshev,
    Legendre,
}

impl PolynomialBasis {
    /// Values of the first `order + 1` basis functions at `t`.
    fn terms(self, t: f64, order: usize, out: &mut [f64]) {
        debug_assert_eq!(out.len(), order + 1);
        out[0] = 1.0;
        if order == 0 {
            return;
        }
        out[1] = t;
        for k in 1..order {
            let kf = k as f64;
            out[k + 1] = match self {
                PolynomialBasis::Power => out[k] * t,
                PolynomialBasis::Chebyshev => 2.0 * t * out[k] - out[k - 1],
                PolynomialBasis::Legendre => {
                    ((2.0 * kf + 1.0) * t * out[k] - kf * out[k - 1]) / (kf + 1.0)
                }
            };
        }
    }
}

/// A fitted polynomial, evaluable anywhere on the real line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolynomialFit {
    pub basis: PolynomialBasis,
    /// Coefficients, lowest order first
    pub coefficients: Vec<f64>,
    /// Abscissa span mapped onto [-1, 1] for the orthogonal bases
    pub domain: (f64, f64),
}

impl PolynomialFit {
    /// Least-squares fit of a polynomial of degree `order` through `(x, y)`.
    ///
    /// Needs at least `order + 1` points.
    pub fn fit(basis: PolynomialBasis, x: &[f64], y: &[f64], order: usize) -> Result<Self> {
        if x.len() != y.len() {
            return Err(IsrError::dimension_mismatch(
                format!("{} ordinates", x.len()),
                format!("{} ordinates", y.len()),
            ));
        }
        if x.len() < order + 1 {
            return Err(IsrError::InsufficientData(format!(
                "order {order} fit needs at least {} points, got {}",
                order + 1,
                x.len()
            )));
        }

        let domain = x.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

        let mut fit = Self {
            basis,
            coefficients: vec![0.0; order + 1],
            domain,
        };

        let mut design = DMatrix::<f64>::zeros(x.len(), order + 1);
        let mut row = vec![0.0; order + 1];
        for (i, &xi) in x.iter().enumerate() {
            basis.terms(fit.map_abscissa(xi), order, &mut row);
            for (j, &term) in row.iter().enumerate() {
                design[(i, j)] = term;
            }
        }
        let rhs = DVector::from_column_slice(y);

        let svd = design.svd(true, true);
        let max_singular = svd.singular_values.max();
        let solution = svd
            .solve(&rhs, max_singular * SVD_RELATIVE_EPS)
            .map_err(|e| IsrError::InvalidParameter(format!("polynomial fit failed: {e}")))?;

        fit.coefficients = solution.iter().copied().collect();
        Ok(fit)
    }

    pub fn order(&self) -> usize {
        self.coefficients.len() - 1
    }

    fn map_abscissa(&self, x: f64) -> f64 {
        match self.basis {
            PolynomialBasis::Power => x,
            PolynomialBasis::Chebyshev | PolynomialBasis::Legendre => {
                let (lo, hi) = self.domain;
                let half_width = (hi - lo) / 2.0;
                if half_width > 0.0 {
                    (x - (lo + hi) / 2.0) / half_width
                } else {
                    0.0
                }
            }
        }
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        let order = self.order();
        let mut terms = vec![0.0; order + 1];
        self.basis.terms(self.map_abscissa(x), order, &mut terms);
        terms
            .iter()
            .zip(&self.coefficients)
            .map(|(t, c)| t * c)
            .sum()
    }
}
