//! Synthetic point-spread kernels for defect interpolation.

use ndarray::Array2;

use crate::error::{IsrError, Result};

/// Full-width-half-max to Gaussian sigma: 1 / (2 * sqrt(2 ln 2)).
pub const FWHM_TO_SIGMA: f64 = 0.424_660_900_144_009_5;

/// Kernel side length for a given FWHM: `4 * floor(fwhm) + 1`.
pub fn psf_kernel_size(fwhm: f64) -> usize {
    4 * fwhm.floor() as usize + 1
}

/// Generate a normalized 2D Gaussian kernel
///
/// # Arguments
/// * `size` - Kernel size (must be odd)
/// * `sigma` - Gaussian sigma in pixels
pub fn gaussian_kernel(size: usize, sigma: f64) -> Result<Array2<f64>> {
    if size % 2 == 0 {
        return Err(IsrError::InvalidParameter(format!(
            "kernel size must be odd, got {size}"
        )));
    }
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(IsrError::InvalidParameter(format!(
            "kernel sigma must be positive, got {sigma}"
        )));
    }

    let mut kernel = Array2::zeros((size, size));
    let center = size as isize / 2;

    let mut sum = 0.0;

    for i in 0..size {
        for j in 0..size {
            let x = j as isize - center;
            let y = i as isize - center;

            let value = (-((x * x + y * y) as f64) / (2.0 * sigma * sigma)).exp();
            kernel[[i, j]] = value;
            sum += value;
        }
    }

    kernel.mapv_inplace(|x| x / sum);
    Ok(kernel)
}

/// Gaussian point-spread kernel for a given FWHM in pixels.
///
/// Side length is `4 * floor(fwhm) + 1`, sigma is `fwhm / (2 sqrt(2 ln 2))`,
/// and the kernel sums to one. Built fresh on every call.
pub fn psf_kernel(fwhm: f64) -> Result<Array2<f64>> {
    if !(fwhm.is_finite() && fwhm > 0.0) {
        return Err(IsrError::InvalidParameter(format!(
            "PSF FWHM must be positive, got {fwhm}"
        )));
    }
    gaussian_kernel(psf_kernel_size(fwhm), fwhm * FWHM_TO_SIGMA)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_kernel_size_rule() {
        assert_eq!(psf_kernel_size(0.5), 1);
        assert_eq!(psf_kernel_size(1.0), 5);
        assert_eq!(psf_kernel_size(2.0), 9);
        assert_eq!(psf_kernel_size(2.9), 9);
        assert_eq!(psf_kernel(3.0).unwrap().dim(), (13, 13));
    }

    #[test]
    fn test_kernel_normalized_and_symmetric() {
        let kernel = psf_kernel(2.0).unwrap();
        assert_relative_eq!(kernel.sum(), 1.0, epsilon = 1e-12);

        let n = kernel.nrows();
        for i in 0..n {
            for j in 0..n {
                assert_relative_eq!(kernel[[i, j]], kernel[[j, i]], epsilon = 1e-15);
                assert_relative_eq!(kernel[[i, j]], kernel[[n - 1 - i, j]], epsilon = 1e-15);
            }
        }
        assert!(kernel[[n / 2, n / 2]] > kernel[[0, 0]]);
    }

    #[test]
    fn test_half_max_at_half_width() {
        // Unnormalized profile drops to one half at fwhm / 2 from the center
        let fwhm = 4.0f64;
        let sigma = fwhm * FWHM_TO_SIGMA;
        let half = (-(fwhm / 2.0).powi(2) / (2.0 * sigma * sigma)).exp();
        assert_relative_eq!(half, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_fwhm() {
        assert!(psf_kernel(0.0).is_err());
        assert!(psf_kernel(-1.0).is_err());
        assert!(psf_kernel(f64::NAN).is_err());
        assert!(gaussian_kernel(4, 1.0).is_err());
    }
}
