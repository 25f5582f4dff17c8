//! Saturation detection, masking and interpolation.

use tracing::debug;

use crate::defects::{defects_from_mask, interpolate_defects, mask_pixels_from_defects, Defect};
use crate::error::Result;
use crate::image_proc::footprint::{detect, grow, Connectivity, Footprint, GrowMode, Polarity};
use crate::image_proc::mask::{MaskPlane, INTRP_PLANE};
use crate::image_proc::plane::PixelPlane;

/// Find pixels strictly above `saturation_level` and OR the `mask_plane` bit
/// into each of them.
///
/// The plane is registered in the plane's registry if it is not yet known.
/// Returns the footprints for further growing or interpolation.
pub fn detect_and_mask(
    plane: &mut PixelPlane,
    saturation_level: f64,
    mask_plane: &str,
) -> Result<Vec<Footprint>> {
    let bits = plane.registry_mut().get_or_register(mask_plane)?;
    let footprints = detect(plane, saturation_level, Polarity::Positive, Connectivity::Eight);

    for footprint in &footprints {
        for (x, y) in footprint.pixels() {
            plane.or_mask_pixel(x, y, bits);
        }
    }

    debug!("Found {} saturated footprints above {}", footprints.len(), saturation_level);
    Ok(footprints)
}

/// Detect saturated regions, grow them by `grow_radius`, set SAT over the
/// grown regions and optionally interpolate over them, flagging INTRP.
///
/// # Arguments
/// * `plane` - Plane to mask and correct in place
/// * `saturation_level` - Pixels strictly above this value are saturated
/// * `fwhm` - PSF full width at half maximum used for interpolation
/// * `grow_radius` - Box dilation applied to each saturated footprint
/// * `interpolate` - Fill the grown regions after masking them
///
/// # Returns
/// The defects built from the grown footprints
pub fn saturation_correction(
    plane: &mut PixelPlane,
    saturation_level: f64,
    fwhm: f64,
    grow_radius: usize,
    interpolate: bool,
) -> Result<Vec<Defect>> {
    let sat = MaskPlane::Sat.bitmask();
    let bounds = plane.bbox();

    let mut defects = Vec::new();
    for footprint in detect(plane, saturation_level, Polarity::Positive, Connectivity::Eight) {
        let grown = grow(&footprint, grow_radius, &bounds, GrowMode::Box)?;
        defects.extend(grown.to_bounding_boxes().into_iter().map(Defect::new));
    }

    mask_pixels_from_defects(plane, &defects, sat)?;

    if interpolate && !defects.is_empty() {
        interpolate_defects(plane, &defects, fwhm, None)?;
        let intrp = plane.registry_mut().get_or_register(INTRP_PLANE)?;
        mask_pixels_from_defects(plane, &defects, intrp)?;
    }

    debug!(
        "Saturation correction masked {} regions (interpolated: {})",
        defects.len(),
        interpolate
    );
    Ok(defects)
}

/// Interpolate over pixels already flagged SAT, growing the flagged regions
/// by `grow_radius` first, and flag the filled pixels INTRP.
pub fn saturation_interpolation(
    plane: &mut PixelPlane,
    fwhm: f64,
    grow_radius: usize,
) -> Result<Vec<Defect>> {
    let defects = defects_from_mask(plane, MaskPlane::Sat.bitmask(), grow_radius)?;
    if defects.is_empty() {
        return Ok(defects);
    }

    interpolate_defects(plane, &defects, fwhm, None)?;
    let intrp = plane.registry_mut().get_or_register(INTRP_PLANE)?;
    mask_pixels_from_defects(plane, &defects, intrp)?;
    Ok(defects)
}
