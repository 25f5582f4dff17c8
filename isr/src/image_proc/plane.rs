//! Co-registered image, mask and variance planes.
//!
//! A [`PixelPlane`] stores three arrays of identical shape plus the parent
//! coordinate of its first pixel. Arrays use ndarray's `[row, col]` indexing;
//! every public accessor taking coordinates uses parent `(x, y)`.
//!
//! Sub-regions come in two flavors: [`PixelPlane::view`] / [`PixelPlane::view_mut`]
//! borrow the parent's storage, [`PixelPlane::extract`] deep-copies it into a
//! new plane.

use std::ops::Range;

use ndarray::{s, Array2, ArrayView2, ArrayViewMut2};

use crate::error::{IsrError, Result};
use crate::image_proc::bbox::BoundingBox;
use crate::image_proc::mask::{MaskPixel, MaskRegistry};

/// Image, mask and variance planes sharing one coordinate frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelPlane {
    image: Array2<f32>,
    mask: Array2<MaskPixel>,
    variance: Array2<f32>,
    /// Parent coordinate `(x0, y0)` of element `[0, 0]`
    origin: (usize, usize),
    registry: MaskRegistry,
}

/// Borrowed read-only window into a [`PixelPlane`].
#[derive(Debug, Clone)]
pub struct PlaneView<'a> {
    pub image: ArrayView2<'a, f32>,
    pub mask: ArrayView2<'a, MaskPixel>,
    pub variance: ArrayView2<'a, f32>,
    pub bbox: BoundingBox,
}

/// Borrowed mutable window into a [`PixelPlane`].
#[derive(Debug)]
pub struct PlaneViewMut<'a> {
    pub image: ArrayViewMut2<'a, f32>,
    pub mask: ArrayViewMut2<'a, MaskPixel>,
    pub variance: ArrayViewMut2<'a, f32>,
    pub bbox: BoundingBox,
}

impl PixelPlane {
    /// Zero-filled plane of the given size at origin `(0, 0)`.
    pub fn new(width: usize, height: usize) -> Result<Self> {
        BoundingBox::from_extent(0, 0, width, height)?;
        Ok(Self {
            image: Array2::zeros((height, width)),
            mask: Array2::zeros((height, width)),
            variance: Array2::zeros((height, width)),
            origin: (0, 0),
            registry: MaskRegistry::default(),
        })
    }

    /// Wrap an image with an empty mask and zero variance.
    pub fn from_image(image: Array2<f32>) -> Result<Self> {
        let (height, width) = image.dim();
        BoundingBox::from_extent(0, 0, width, height)?;
        Ok(Self {
            mask: Array2::zeros((height, width)),
            variance: Array2::zeros((height, width)),
            image,
            origin: (0, 0),
            registry: MaskRegistry::default(),
        })
    }

    /// Assemble a plane from existing arrays, which must share one shape.
    pub fn from_parts(
        image: Array2<f32>,
        mask: Array2<MaskPixel>,
        variance: Array2<f32>,
    ) -> Result<Self> {
        if mask.dim() != image.dim() {
            return Err(IsrError::dimension_mismatch(
                format!("mask {:?}", image.dim()),
                format!("mask {:?}", mask.dim()),
            ));
        }
        if variance.dim() != image.dim() {
            return Err(IsrError::dimension_mismatch(
                format!("variance {:?}", image.dim()),
                format!("variance {:?}", variance.dim()),
            ));
        }
        let mut plane = Self::from_image(image)?;
        plane.mask = mask;
        plane.variance = variance;
        Ok(plane)
    }

    /// Builder-style origin assignment.
    pub fn with_origin(mut self, x0: usize, y0: usize) -> Self {
        self.origin = (x0, y0);
        self
    }

    /// Fill every pixel of all three planes.
    pub fn with_values(mut self, image: f32, mask: MaskPixel, variance: f32) -> Self {
        self.image.fill(image);
        self.mask.fill(mask);
        self.variance.fill(variance);
        self
    }

    pub fn set_origin(&mut self, x0: usize, y0: usize) {
        self.origin = (x0, y0);
    }

    pub fn origin(&self) -> (usize, usize) {
        self.origin
    }

    pub fn width(&self) -> usize {
        self.image.ncols()
    }

    pub fn height(&self) -> usize {
        self.image.nrows()
    }

    /// Parent-frame box covered by this plane.
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox {
            min_x: self.origin.0,
            min_y: self.origin.1,
            max_x: self.origin.0 + self.width() - 1,
            max_y: self.origin.1 + self.height() - 1,
        }
    }

    pub fn image(&self) -> &Array2<f32> {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut Array2<f32> {
        &mut self.image
    }

    pub fn mask(&self) -> &Array2<MaskPixel> {
        &self.mask
    }

    pub fn mask_mut(&mut self) -> &mut Array2<MaskPixel> {
        &mut self.mask
    }

    pub fn variance(&self) -> &Array2<f32> {
        &self.variance
    }

    pub fn variance_mut(&mut self) -> &mut Array2<f32> {
        &mut self.variance
    }

    pub fn registry(&self) -> &MaskRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut MaskRegistry {
        &mut self.registry
    }

    /// Replace the mask registry, e.g. with one shared across amplifiers.
    pub fn set_registry(&mut self, registry: MaskRegistry) {
        self.registry = registry;
    }

    /// Row and column ranges of `bbox` in local array coordinates.
    pub fn local_ranges(&self, bbox: &BoundingBox) -> Result<(Range<usize>, Range<usize>)> {
        let own = self.bbox();
        if !own.contains(bbox) {
            return Err(IsrError::MalformedRegion(format!(
                "region {bbox} lies outside plane {own}"
            )));
        }
        let rows = (bbox.min_y - self.origin.1)..(bbox.max_y - self.origin.1 + 1);
        let cols = (bbox.min_x - self.origin.0)..(bbox.max_x - self.origin.0 + 1);
        Ok((rows, cols))
    }

    /// Local `[row, col]` index of parent coordinate `(x, y)`, if inside.
    pub fn local_index(&self, x: usize, y: usize) -> Option<[usize; 2]> {
        if self.bbox().contains_point(x, y) {
            Some([y - self.origin.1, x - self.origin.0])
        } else {
            None
        }
    }

    /// Image value at parent coordinate `(x, y)`.
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        self.local_index(x, y).map(|idx| self.image[idx])
    }

    /// Mask word at parent coordinate `(x, y)`.
    pub fn mask_at(&self, x: usize, y: usize) -> Option<MaskPixel> {
        self.local_index(x, y).map(|idx| self.mask[idx])
    }

    /// Borrowed window sharing this plane's storage.
    pub fn view(&self, bbox: &BoundingBox) -> Result<PlaneView<'_>> {
        let (rows, cols) = self.local_ranges(bbox)?;
        Ok(PlaneView {
            image: self.image.slice(s![rows.clone(), cols.clone()]),
            mask: self.mask.slice(s![rows.clone(), cols.clone()]),
            variance: self.variance.slice(s![rows, cols]),
            bbox: *bbox,
        })
    }

    /// Window over the whole plane.
    pub fn full_view(&self) -> PlaneView<'_> {
        PlaneView {
            image: self.image.view(),
            mask: self.mask.view(),
            variance: self.variance.view(),
            bbox: self.bbox(),
        }
    }

    /// Mutable window sharing this plane's storage.
    pub fn view_mut(&mut self, bbox: &BoundingBox) -> Result<PlaneViewMut<'_>> {
        let (rows, cols) = self.local_ranges(bbox)?;
        Ok(PlaneViewMut {
            image: self.image.slice_mut(s![rows.clone(), cols.clone()]),
            mask: self.mask.slice_mut(s![rows.clone(), cols.clone()]),
            variance: self.variance.slice_mut(s![rows, cols]),
            bbox: *bbox,
        })
    }

    /// Mutable window over the whole plane.
    pub fn full_view_mut(&mut self) -> PlaneViewMut<'_> {
        let bbox = self.bbox();
        PlaneViewMut {
            image: self.image.view_mut(),
            mask: self.mask.view_mut(),
            variance: self.variance.view_mut(),
            bbox,
        }
    }

    /// Deep copy of `bbox` as an independent plane keeping parent coordinates.
    pub fn extract(&self, bbox: &BoundingBox) -> Result<PixelPlane> {
        let view = self.view(bbox)?;
        Ok(PixelPlane {
            image: view.image.to_owned(),
            mask: view.mask.to_owned(),
            variance: view.variance.to_owned(),
            origin: (bbox.min_x, bbox.min_y),
            registry: self.registry.clone(),
        })
    }

    /// OR `bits` into every mask pixel of `bbox`.
    pub fn or_mask_region(&mut self, bbox: &BoundingBox, bits: MaskPixel) -> Result<()> {
        let mut view = self.view_mut(bbox)?;
        view.mask.mapv_inplace(|m| m | bits);
        Ok(())
    }

    /// OR `bits` into one mask pixel; returns false when outside the plane.
    pub fn or_mask_pixel(&mut self, x: usize, y: usize, bits: MaskPixel) -> bool {
        match self.local_index(x, y) {
            Some(idx) => {
                self.mask[idx] |= bits;
                true
            }
            None => false,
        }
    }

    /// Count of pixels whose mask intersects `bits`.
    pub fn count_masked(&self, bits: MaskPixel) -> usize {
        self.mask.iter().filter(|&&m| m & bits != 0).count()
    }
}
