//! Integer bounding boxes for detector regions.
//!
//! Boxes use inclusive bounds on both ends and live in the parent (detector)
//! coordinate frame: `x` is the column, `y` is the row. Overscan regions,
//! data regions and defects are all addressed with the same type.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{IsrError, Result};

/// Axis-aligned integer rectangle with inclusive bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Minimum column (x) coordinate
    pub min_x: usize,
    /// Minimum row (y) coordinate
    pub min_y: usize,
    /// Maximum column (x) coordinate
    pub max_x: usize,
    /// Maximum row (y) coordinate
    pub max_y: usize,
}

impl BoundingBox {
    /// Create a box from its inclusive corners.
    ///
    /// Fails with `MalformedRegion` when a max corner lies below its min corner.
    pub fn new(min_x: usize, min_y: usize, max_x: usize, max_y: usize) -> Result<Self> {
        if max_x < min_x || max_y < min_y {
            return Err(IsrError::MalformedRegion(format!(
                "inverted box ({min_x},{min_y})-({max_x},{max_y})"
            )));
        }
        Ok(Self {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    /// Create a box from a min corner and an extent.
    ///
    /// Zero-width or zero-height extents are rejected.
    pub fn from_extent(min_x: usize, min_y: usize, width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(IsrError::MalformedRegion(format!(
                "zero-area box at ({min_x},{min_y}) with extent {width}x{height}"
            )));
        }
        Self::new(min_x, min_y, min_x + width - 1, min_y + height - 1)
    }

    /// A single-pixel box.
    pub fn pixel(x: usize, y: usize) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    /// Parse a bracketed section string such as `[1:10,11:13]`.
    ///
    /// Sections are 1-based and inclusive (`[x1:x2,y1:y2]`); the returned box
    /// is 0-based and inclusive. Embedded whitespace is ignored.
    pub fn from_section(section: &str) -> Result<Self> {
        let malformed = || IsrError::MalformedRegion(format!("bad section string {section:?}"));

        let compact: String = section.chars().filter(|c| !c.is_whitespace()).collect();
        let inner = compact
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(malformed)?;

        let (x_range, y_range) = inner.split_once(',').ok_or_else(malformed)?;
        let parse_range = |range: &str| -> Result<(usize, usize)> {
            let (lo, hi) = range.split_once(':').ok_or_else(malformed)?;
            let lo: usize = lo.parse().map_err(|_| malformed())?;
            let hi: usize = hi.parse().map_err(|_| malformed())?;
            if lo == 0 || hi == 0 {
                return Err(malformed());
            }
            Ok((lo - 1, hi - 1))
        };

        let (x1, x2) = parse_range(x_range)?;
        let (y1, y2) = parse_range(y_range)?;
        Self::new(x1, y1, x2, y2)
    }

    /// Format as a 1-based bracketed section string.
    pub fn to_section(&self) -> String {
        format!(
            "[{}:{},{}:{}]",
            self.min_x + 1,
            self.max_x + 1,
            self.min_y + 1,
            self.max_y + 1
        )
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.max_x - self.min_x + 1
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.max_y - self.min_y + 1
    }

    /// Dimensions as `(width, height)`.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width(), self.height())
    }

    pub fn area(&self) -> usize {
        self.width() * self.height()
    }

    /// Check if this box contains the given point
    pub fn contains_point(&self, x: usize, y: usize) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Check if this box completely contains another box
    pub fn contains(&self, other: &Self) -> bool {
        self.min_x <= other.min_x
            && self.max_x >= other.max_x
            && self.min_y <= other.min_y
            && self.max_y >= other.max_y
    }

    /// Check if this box overlaps with another
    pub fn overlaps(&self, other: &Self) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Intersection with `other`, or `None` when they are disjoint.
    pub fn clipped_to(&self, other: &Self) -> Option<Self> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Self {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        })
    }

    /// Smallest box containing both.
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Expand this box to include the given point
    pub fn expand_to_include(&mut self, x: usize, y: usize) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    /// Grow by `radius` on every side, saturating at zero.
    pub fn grown(&self, radius: usize) -> Self {
        Self {
            min_x: self.min_x.saturating_sub(radius),
            min_y: self.min_y.saturating_sub(radius),
            max_x: self.max_x + radius,
            max_y: self.max_y + radius,
        }
    }

    /// Move the box so that its min corner lands on `(min_x, min_y)`.
    pub fn moved_to(&self, min_x: usize, min_y: usize) -> Self {
        Self {
            min_x,
            min_y,
            max_x: min_x + self.width() - 1,
            max_y: min_y + self.height() - 1,
        }
    }

    /// Iterate over every `(x, y)` inside the box in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (self.min_y..=self.max_y).flat_map(move |y| (self.min_x..=self.max_x).map(move |x| (x, y)))
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{})-({},{}) [{}x{}]",
            self.min_x,
            self.min_y,
            self.max_x,
            self.max_y,
            self.width(),
            self.height()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_parsing() {
        let bbox = BoundingBox::from_section("[1:10,11:13]").unwrap();
        assert_eq!(bbox, BoundingBox::new(0, 10, 9, 12).unwrap());
        assert_eq!(bbox.width(), 10);
        assert_eq!(bbox.height(), 3);

        let spaced = BoundingBox::from_section(" [ 11:13 , 1:10 ] ").unwrap();
        assert_eq!(spaced, BoundingBox::new(10, 0, 12, 9).unwrap());
    }

    #[test]
    fn test_section_round_trip_text() {
        let bbox = BoundingBox::new(32, 0, 63, 127).unwrap();
        assert_eq!(bbox.to_section(), "[33:64,1:128]");
        assert_eq!(BoundingBox::from_section(&bbox.to_section()).unwrap(), bbox);
    }

    #[test]
    fn test_malformed_sections() {
        for bad in [
            "",
            "1:10,1:10",
            "[1:10]",
            "[1-10,1:10]",
            "[a:10,1:10]",
            "[0:10,1:10]",
            "[10:1,1:10]",
        ] {
            assert!(
                matches!(
                    BoundingBox::from_section(bad),
                    Err(IsrError::MalformedRegion(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_zero_area_rejected() {
        assert!(BoundingBox::from_extent(0, 0, 0, 5).is_err());
        assert!(BoundingBox::from_extent(0, 0, 5, 0).is_err());
        assert!(BoundingBox::new(5, 0, 4, 0).is_err());
        assert_eq!(BoundingBox::from_extent(2, 3, 1, 1).unwrap().area(), 1);
    }

    #[test]
    fn test_clip_and_merge() {
        let a = BoundingBox::new(0, 0, 9, 9).unwrap();
        let b = BoundingBox::new(5, 5, 14, 14).unwrap();
        let c = BoundingBox::new(20, 20, 21, 21).unwrap();

        assert_eq!(a.clipped_to(&b), Some(BoundingBox::new(5, 5, 9, 9).unwrap()));
        assert_eq!(a.clipped_to(&c), None);
        assert_eq!(a.merge(&c), BoundingBox::new(0, 0, 21, 21).unwrap());
        assert!(a.merge(&c).contains(&b));
    }

    #[test]
    fn test_grown_saturates_at_origin() {
        let bbox = BoundingBox::new(1, 4, 2, 5).unwrap();
        assert_eq!(bbox.grown(2), BoundingBox::new(0, 2, 4, 7).unwrap());
    }

    #[test]
    fn test_pixel_iteration_order() {
        let bbox = BoundingBox::new(3, 7, 4, 8).unwrap();
        let pixels: Vec<_> = bbox.pixels().collect();
        assert_eq!(pixels, vec![(3, 7), (4, 7), (3, 8), (4, 8)]);
    }
}
