//! Defect masking and PSF-weighted interpolation.
//!
//! A defect is a rectangle of unreliable pixels, either from a static
//! catalog or derived from a mask plane. Interpolation replaces every defect
//! pixel with the kernel-weighted mean of the valid pixels inside the kernel
//! support around it; pixels with no valid neighbour get a fallback value.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::algo::stats::{mean, sigma_clip, StatisticsControl};
use crate::error::{IsrError, Result};
use crate::image_proc::bbox::BoundingBox;
use crate::image_proc::footprint::{
    connected_footprints, detect_masked, grow, Connectivity, GrowMode,
};
use crate::image_proc::kernel::psf_kernel;
use crate::image_proc::mask::{MaskPixel, MaskPlane, INTRP_PLANE};
use crate::image_proc::plane::PixelPlane;

/// A rectangular bad region, optionally with its own fill value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Defect {
    pub bbox: BoundingBox,
    /// Replaces the call-wide fallback for pixels of this defect that have no
    /// valid neighbour
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<f32>,
}

impl Defect {
    pub fn new(bbox: BoundingBox) -> Self {
        Self {
            bbox,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, value: f32) -> Self {
        self.fallback = Some(value);
        self
    }
}

impl From<BoundingBox> for Defect {
    fn from(bbox: BoundingBox) -> Self {
        Self::new(bbox)
    }
}

/// Clipped mean of the pixels that are finite, outside every defect and not
/// BAD or SAT. `None` when no such pixel exists.
fn global_fallback(plane: &PixelPlane, invalid: &Array2<bool>) -> Result<Option<f64>> {
    let reject = MaskPlane::Bad.bitmask() | MaskPlane::Sat.bitmask();
    let values: Vec<f64> = plane
        .image()
        .iter()
        .zip(plane.mask().iter())
        .zip(invalid.iter())
        .filter(|((v, m), bad)| v.is_finite() && *m & reject == 0 && !**bad)
        .map(|((&v, _), _)| v as f64)
        .collect();

    if values.is_empty() {
        return Ok(None);
    }
    let ctrl = StatisticsControl::default();
    let sample = sigma_clip(&values, ctrl.n_iter, ctrl.n_sigma)?;
    Ok(Some(mean(&sample.values)?))
}

/// Replace every pixel of every defect by PSF-weighted interpolation.
///
/// `fwhm` sets the Gaussian kernel. Neighbours are read from the image as it
/// was before the call, and never from inside any defect or from non-finite
/// pixels. When `fallback` is `None` the fill value for unconstrained pixels
/// is the clipped mean of the rest of the plane, computed once up front.
/// Defects are clipped to the plane; the mask is left unchanged.
///
/// # Arguments
/// * `plane` - Plane whose image is corrected in place
/// * `defects` - Regions to replace, in parent coordinates
/// * `fwhm` - PSF full width at half maximum in pixels
/// * `fallback` - Fill value for pixels with no valid neighbour
///
/// # Returns
/// The number of pixels replaced. On error no pixel is written.
pub fn interpolate_defects(
    plane: &mut PixelPlane,
    defects: &[Defect],
    fwhm: f64,
    fallback: Option<f32>,
) -> Result<usize> {
    let kernel = psf_kernel(fwhm)?;
    let half = (kernel.nrows() / 2) as isize;
    let own = plane.bbox();
    let (x0, y0) = plane.origin();

    let clipped: Vec<(BoundingBox, Option<f32>)> = defects
        .iter()
        .filter_map(|d| d.bbox.clipped_to(&own).map(|bbox| (bbox, d.fallback)))
        .collect();
    if clipped.len() < defects.len() {
        debug!(
            "{} defects lie entirely outside {own} and were skipped",
            defects.len() - clipped.len()
        );
    }

    let mut invalid = plane.image().mapv(|v| !v.is_finite());
    for (bbox, _) in &clipped {
        let (rows, cols) = plane.local_ranges(bbox)?;
        invalid.slice_mut(ndarray::s![rows, cols]).fill(true);
    }

    let global = match fallback {
        Some(value) => Some(value as f64),
        None => global_fallback(plane, &invalid)?,
    };

    let source = plane.image().to_owned();
    let (height, width) = source.dim();
    let mut writes = Vec::new();
    let mut unconstrained = 0;

    for (bbox, own_fallback) in &clipped {
        for (x, y) in bbox.pixels() {
            let (row, col) = ((y - y0) as isize, (x - x0) as isize);

            let mut sum = 0.0;
            let mut weight = 0.0;
            for dy in -half..=half {
                let r = row + dy;
                if r < 0 || r >= height as isize {
                    continue;
                }
                for dx in -half..=half {
                    let c = col + dx;
                    if c < 0 || c >= width as isize || invalid[[r as usize, c as usize]] {
                        continue;
                    }
                    let w = kernel[[(dy + half) as usize, (dx + half) as usize]];
                    sum += w * source[[r as usize, c as usize]] as f64;
                    weight += w;
                }
            }

            let value = if weight > 0.0 {
                sum / weight
            } else {
                unconstrained += 1;
                match own_fallback.map(f64::from).or(global) {
                    Some(value) => value,
                    None => {
                        return Err(IsrError::InsufficientData(format!(
                            "no valid pixels to derive a fallback for defect {bbox}"
                        )))
                    }
                }
            };

            writes.push((row as usize, col as usize, value as f32));
        }
    }

    let image = plane.image_mut();
    for &(row, col, value) in &writes {
        image[[row, col]] = value;
    }
    let filled = writes.len();

    debug!(
        "Interpolated {} pixels in {} defects ({} from fallback)",
        filled,
        clipped.len(),
        unconstrained
    );
    Ok(filled)
}

/// OR `bits` into the mask over every defect, clipped to the plane.
pub fn mask_pixels_from_defects(
    plane: &mut PixelPlane,
    defects: &[Defect],
    bits: MaskPixel,
) -> Result<()> {
    let own = plane.bbox();
    for defect in defects {
        if let Some(bbox) = defect.bbox.clipped_to(&own) {
            plane.or_mask_region(&bbox, bits)?;
        }
    }
    Ok(())
}

/// Defects covering every pixel whose mask intersects `bits`.
///
/// Connected masked regions are optionally grown (box dilation, clipped to
/// the plane) and then decomposed into rectangles.
pub fn defects_from_mask(
    plane: &PixelPlane,
    bits: MaskPixel,
    grow_radius: usize,
) -> Result<Vec<Defect>> {
    let bounds = plane.bbox();
    let mut defects = Vec::new();

    for footprint in detect_masked(plane, bits, Connectivity::Eight) {
        let footprint = if grow_radius > 0 {
            grow(&footprint, grow_radius, &bounds, GrowMode::Box)?
        } else {
            footprint
        };
        defects.extend(footprint.to_bounding_boxes().into_iter().map(Defect::new));
    }

    debug!("Found {} defects for mask bits {:#x}", defects.len(), bits);
    Ok(defects)
}

/// Defects covering the `true` pixels of a boolean image, or the `false`
/// ones when `invert` is set. `origin` places the image in the parent frame.
pub fn defects_from_bool_image(
    image: &ArrayView2<bool>,
    origin: (usize, usize),
    invert: bool,
) -> Vec<Defect> {
    let (height, width) = image.dim();
    connected_footprints(width, height, origin, Connectivity::Eight, |i, j| {
        image[[i, j]] != invert
    })
    .iter()
    .flat_map(|fp| fp.to_bounding_boxes())
    .map(Defect::new)
    .collect()
}

/// A fresh mask for a plane covering `bounds` with BAD set on every defect pixel.
pub fn mask_from_defects(bounds: &BoundingBox, defects: &[Defect]) -> Array2<MaskPixel> {
    let mut mask = Array2::zeros((bounds.height(), bounds.width()));
    let bad = MaskPlane::Bad.bitmask();
    for defect in defects {
        if let Some(bbox) = defect.bbox.clipped_to(bounds) {
            for (x, y) in bbox.pixels() {
                mask[[y - bounds.min_y, x - bounds.min_x]] |= bad;
            }
        }
    }
    mask
}

/// Mask the defects with `bits` and, when `interpolate` is set, fill them and
/// flag the filled pixels with the INTRP plane.
///
/// # Arguments
/// * `plane` - Plane to mask and correct in place
/// * `defects` - Defect regions in parent coordinates
/// * `fwhm` - PSF full width at half maximum in pixels
/// * `interpolate` - Fill the defects after masking them
/// * `bits` - Mask bits to set over every defect
///
/// # Returns
/// The number of pixels interpolated, zero when `interpolate` is unset
pub fn mask_and_interpolate_defects(
    plane: &mut PixelPlane,
    defects: &[Defect],
    fwhm: f64,
    interpolate: bool,
    bits: MaskPixel,
) -> Result<usize> {
    mask_pixels_from_defects(plane, defects, bits)?;
    if !interpolate || defects.is_empty() {
        return Ok(0);
    }

    let filled = interpolate_defects(plane, defects, fwhm, None)?;
    let intrp = plane.registry_mut().get_or_register(INTRP_PLANE)?;
    mask_pixels_from_defects(plane, defects, intrp)?;
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn carved_plane(width: usize, height: usize, value: f32, defects: &[Defect]) -> PixelPlane {
        let mut plane = PixelPlane::new(width, height).unwrap().with_values(value, 0, 0.0);
        for defect in defects {
            plane.view_mut(&defect.bbox).unwrap().image.fill(100.0);
        }
        plane
    }

    #[test]
    fn test_uniform_image_restored() {
        let defects: Vec<Defect> = [(34, 0, 35, 80), (34, 81, 34, 100), (180, 100, 182, 130)]
            .into_iter()
            .map(|(x0, y0, x1, y1)| Defect::new(BoundingBox::new(x0, y0, x1, y1).unwrap()))
            .collect();
        let mut plane = carved_plane(250, 225, 10.0, &defects);

        let filled = interpolate_defects(&mut plane, &defects, 2.0, None).unwrap();
        assert_eq!(filled, 2 * 81 + 20 + 3 * 31);
        assert!(plane.image().iter().all(|&v| v == 10.0));
    }

    #[test]
    fn test_unconstrained_pixels_use_global_fallback() {
        let defects = [Defect::new(BoundingBox::new(5, 5, 14, 14).unwrap())];
        let mut plane = carved_plane(20, 20, 10.0, &defects);

        interpolate_defects(&mut plane, &defects, 1.0, None).unwrap();
        assert!(plane.image().iter().all(|&v| v == 10.0));
    }

    #[test]
    fn test_explicit_fallbacks() {
        let bbox = BoundingBox::new(5, 5, 14, 14).unwrap();
        let mut plane = carved_plane(20, 20, 10.0, &[Defect::new(bbox)]);

        interpolate_defects(&mut plane, &[Defect::new(bbox)], 1.0, Some(7.0)).unwrap();
        // Kernel half-width is 2: the center is out of reach, the rim is not
        assert_eq!(plane.get(9, 9), Some(7.0));
        assert_abs_diff_eq!(plane.get(5, 5).unwrap(), 10.0, epsilon = 1e-5);

        let mut plane = carved_plane(20, 20, 10.0, &[Defect::new(bbox)]);
        let own = Defect::new(bbox).with_fallback(-1.0);
        interpolate_defects(&mut plane, &[own], 1.0, Some(7.0)).unwrap();
        assert_eq!(plane.get(9, 9), Some(-1.0));
    }

    #[test]
    fn test_edge_defect_tolerated() {
        let defects = [
            Defect::new(BoundingBox::new(0, 0, 1, 9).unwrap()),
            // Partly outside the plane
            Defect::new(BoundingBox::new(18, 18, 25, 25).unwrap()),
        ];
        let mut plane = PixelPlane::new(20, 20).unwrap().with_values(4.0, 0, 0.0);
        plane.view_mut(&BoundingBox::new(0, 0, 1, 9).unwrap()).unwrap().image.fill(-50.0);
        plane.view_mut(&BoundingBox::new(18, 18, 19, 19).unwrap()).unwrap().image.fill(-50.0);

        let filled = interpolate_defects(&mut plane, &defects, 2.0, None).unwrap();
        assert_eq!(filled, 20 + 4);
        for &v in plane.image().iter() {
            assert_abs_diff_eq!(v, 4.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_whole_plane_defect_without_fallback_fails() {
        let defects = [Defect::new(BoundingBox::new(0, 0, 4, 4).unwrap())];
        let mut plane = PixelPlane::new(5, 5).unwrap();
        let result = interpolate_defects(&mut plane, &defects, 1.0, None);
        assert!(matches!(result, Err(IsrError::InsufficientData(_))));

        interpolate_defects(&mut plane, &defects, 1.0, Some(3.0)).unwrap();
        assert!(plane.image().iter().all(|&v| v == 3.0));
    }

    #[test]
    fn test_failed_interpolation_leaves_image_untouched() {
        let small = Defect::new(BoundingBox::pixel(2, 2));
        let large = Defect::new(BoundingBox::new(8, 8, 16, 16).unwrap());
        let mut plane = carved_plane(20, 20, 5.0, &[small, large]);
        // Every pixel BAD: neighbours still interpolate, but no global fallback exists
        let bounds = plane.bbox();
        plane.or_mask_region(&bounds, MaskPlane::Bad.bitmask()).unwrap();
        let before = plane.image().clone();

        let result = interpolate_defects(&mut plane, &[small, large], 1.0, None);
        assert!(matches!(result, Err(IsrError::InsufficientData(_))));
        assert_eq!(plane.image(), &before);
        assert_eq!(plane.get(2, 2), Some(100.0));
    }

    #[test]
    fn test_nan_neighbours_ignored() {
        let defect = Defect::new(BoundingBox::pixel(5, 5));
        let mut plane = PixelPlane::new(11, 11).unwrap().with_values(6.0, 0, 0.0);
        plane.image_mut()[[5, 5]] = 1000.0;
        plane.image_mut()[[5, 6]] = f32::NAN;

        interpolate_defects(&mut plane, &[defect], 2.0, None).unwrap();
        assert_abs_diff_eq!(plane.get(5, 5).unwrap(), 6.0, epsilon = 1e-5);
        assert!(plane.get(6, 5).unwrap().is_nan());
    }

    #[test]
    fn test_mask_is_not_cleared() {
        let defect = Defect::new(BoundingBox::pixel(3, 3));
        let mut plane = PixelPlane::new(8, 8).unwrap().with_values(1.0, 0, 0.0);
        plane.or_mask_pixel(3, 3, MaskPlane::Bad.bitmask());

        interpolate_defects(&mut plane, &[defect], 1.0, None).unwrap();
        assert_eq!(plane.mask_at(3, 3), Some(MaskPlane::Bad.bitmask()));
    }

    #[test]
    fn test_defects_from_mask() {
        let bad = MaskPlane::Bad.bitmask();
        let mut plane = PixelPlane::new(20, 20).unwrap();

        plane.or_mask_pixel(5, 5, bad);
        let defects = defects_from_mask(&plane, bad, 0).unwrap();
        assert_eq!(defects, vec![Defect::new(BoundingBox::pixel(5, 5))]);

        plane.or_mask_pixel(15, 12, bad);
        assert_eq!(defects_from_mask(&plane, bad, 0).unwrap().len(), 2);

        plane.or_mask_pixel(1, 18, MaskPlane::Suspect.bitmask());
        assert_eq!(defects_from_mask(&plane, bad, 0).unwrap().len(), 2);
        assert_eq!(
            defects_from_mask(&plane, MaskPlane::Suspect.bitmask(), 0).unwrap(),
            vec![Defect::new(BoundingBox::pixel(1, 18))]
        );
    }

    #[test]
    fn test_defects_from_mask_grown() {
        let bad = MaskPlane::Bad.bitmask();
        let mut plane = PixelPlane::new(10, 10).unwrap();
        plane.or_mask_pixel(0, 5, bad);

        let defects = defects_from_mask(&plane, bad, 1).unwrap();
        assert_eq!(defects, vec![Defect::new(BoundingBox::new(0, 4, 1, 6).unwrap())]);
    }

    #[test]
    fn test_mask_round_trip() {
        let bounds = BoundingBox::new(10, 20, 29, 39).unwrap();
        let defects = vec![
            Defect::new(BoundingBox::new(12, 22, 13, 30).unwrap()),
            Defect::new(BoundingBox::pixel(25, 25)),
        ];
        let mask = mask_from_defects(&bounds, &defects);
        assert_eq!(mask.iter().filter(|&&m| m != 0).count(), 18 + 1);

        let bool_image = mask.mapv(|m| m != 0);
        let recovered = defects_from_bool_image(&bool_image.view(), (10, 20), false);
        assert_eq!(recovered, defects);

        let inverted = defects_from_bool_image(&bool_image.view(), (10, 20), true);
        let covered: usize = inverted.iter().map(|d| d.bbox.area()).sum();
        assert_eq!(covered, 400 - 19);
    }

    #[test]
    fn test_mask_and_interpolate_sets_intrp() {
        let defects = [Defect::new(BoundingBox::new(4, 4, 5, 5).unwrap())];
        let mut plane = carved_plane(12, 12, 2.0, &defects);

        let filled = mask_and_interpolate_defects(
            &mut plane,
            &defects,
            2.0,
            true,
            MaskPlane::Bad.bitmask(),
        )
        .unwrap();
        assert_eq!(filled, 4);

        let intrp = plane.registry().bitmask(INTRP_PLANE).unwrap();
        assert_eq!(plane.count_masked(intrp), 4);
        assert_eq!(plane.count_masked(MaskPlane::Bad.bitmask()), 4);
        assert_abs_diff_eq!(plane.get(4, 4).unwrap(), 2.0, epsilon = 1e-5);
    }
}
