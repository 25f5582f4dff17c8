//! Pixel containers and the image-level algorithms built on them.
//!
//! - **bbox**: inclusive parent-frame boxes and bracketed section strings
//! - **mask**: fixed mask planes plus the registry for dynamic ones
//! - **plane**: co-registered image, mask and variance arrays
//! - **footprint**: connected-region detection and growing
//! - **kernel**: Gaussian PSF kernels for interpolation

pub mod bbox;
pub mod footprint;
pub mod kernel;
pub mod mask;
pub mod plane;

pub use bbox::BoundingBox;
pub use footprint::{detect, grow, Connectivity, Footprint, GrowMode, Polarity, Span};
pub use kernel::psf_kernel;
pub use mask::{MaskPixel, MaskPlane, MaskRegistry, INTRP_PLANE};
pub use plane::{PixelPlane, PlaneView, PlaneViewMut};
