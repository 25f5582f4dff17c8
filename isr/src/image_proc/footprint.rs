//! Footprints: connected pixel regions stored as per-row spans.
//!
//! Detection is a two-pass connected component labeling with union-find.
//! Spans and bounding boxes are in the parent coordinate frame of the plane
//! they were detected on.

use std::collections::{BTreeMap, HashMap};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{IsrError, Result};
use crate::image_proc::bbox::BoundingBox;
use crate::image_proc::mask::MaskPixel;
use crate::image_proc::plane::PixelPlane;

/// Which side of the threshold counts as detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarity {
    /// value > threshold
    Positive,
    /// value < -threshold
    Negative,
}

/// Pixel adjacency used when grouping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    /// Horizontal and vertical neighbours only
    Four,
    /// Diagonal neighbours connect as well
    #[default]
    Eight,
}

/// How a footprint is dilated by [`grow`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrowMode {
    /// Square (Chebyshev) dilation: every span is extended by the radius on
    /// both ends and copied onto the `radius` rows above and below.
    #[default]
    Box,
    /// Disc dilation: row offset `dy` extends spans by
    /// `floor(sqrt(radius^2 - dy^2))`.
    Circular,
}

/// A run of pixels `x0..=x1` on row `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub y: usize,
    pub x0: usize,
    pub x1: usize,
}

impl Span {
    pub fn new(y: usize, x0: usize, x1: usize) -> Self {
        Self { y, x0, x1 }
    }

    pub fn width(&self) -> usize {
        self.x1 - self.x0 + 1
    }
}

/// A connected set of pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Footprint {
    spans: Vec<Span>,
    bbox: BoundingBox,
}

impl Footprint {
    /// Build a footprint from arbitrary spans.
    ///
    /// Spans are sorted and overlapping or touching spans on the same row are
    /// merged. Fails if no spans are given.
    pub fn from_spans(mut spans: Vec<Span>) -> Result<Self> {
        if spans.is_empty() {
            return Err(IsrError::MalformedRegion("empty footprint".to_string()));
        }
        spans.sort();

        let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
        for span in spans {
            match merged.last_mut() {
                Some(last) if last.y == span.y && span.x0 <= last.x1 + 1 => {
                    last.x1 = last.x1.max(span.x1);
                }
                _ => merged.push(span),
            }
        }

        let first = merged[0];
        let mut bbox = BoundingBox::pixel(first.x0, first.y);
        for span in &merged {
            bbox.expand_to_include(span.x0, span.y);
            bbox.expand_to_include(span.x1, span.y);
        }

        Ok(Self {
            spans: merged,
            bbox,
        })
    }

    /// Footprint covering a rectangle.
    pub fn from_bbox(bbox: &BoundingBox) -> Self {
        let spans = (bbox.min_y..=bbox.max_y)
            .map(|y| Span::new(y, bbox.min_x, bbox.max_x))
            .collect();
        Self { spans, bbox: *bbox }
    }

    /// Spans sorted by row then column, never overlapping.
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// Number of pixels.
    pub fn npix(&self) -> usize {
        self.spans.iter().map(Span::width).sum()
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        self.spans
            .iter()
            .any(|s| s.y == y && s.x0 <= x && x <= s.x1)
    }

    /// Every `(x, y)` in the footprint, row-major.
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.spans
            .iter()
            .flat_map(|s| (s.x0..=s.x1).map(move |x| (x, s.y)))
    }

    /// Decompose into rectangles covering exactly the footprint pixels.
    ///
    /// Identical spans on consecutive rows are merged into one box; the
    /// decomposition is not minimal in general.
    pub fn to_bounding_boxes(&self) -> Vec<BoundingBox> {
        let mut boxes: Vec<BoundingBox> = Vec::new();
        let mut open: HashMap<(usize, usize), usize> = HashMap::new();

        for span in &self.spans {
            let key = (span.x0, span.x1);
            match open.get(&key) {
                Some(&i) if boxes[i].max_y + 1 == span.y => boxes[i].max_y = span.y,
                _ => {
                    open.insert(key, boxes.len());
                    boxes.push(BoundingBox {
                        min_x: span.x0,
                        min_y: span.y,
                        max_x: span.x1,
                        max_y: span.y,
                    });
                }
            }
        }

        boxes
    }
}

/// Find the root label in a disjoint-set (union-find) data structure
fn find_root(labels: &mut [usize], label: usize) -> usize {
    let mut current = label;

    while current != labels[current] {
        // Path compression - make the parent point to the grandparent
        labels[current] = labels[labels[current]];
        current = labels[current];
    }

    current
}

/// Union two labels, keeping the smaller root as the parent
fn union_labels(labels: &mut [usize], label1: usize, label2: usize) {
    let root1 = find_root(labels, label1);
    let root2 = find_root(labels, label2);

    if root1 < root2 {
        labels[root2] = root1;
    } else if root2 < root1 {
        labels[root1] = root2;
    }
}

/// Group the pixels of a `height x width` grid satisfying `predicate(row, col)`
/// into footprints, offset by `origin`.
///
/// Footprints come back ordered by their first pixel in raster order.
pub fn connected_footprints<P>(
    width: usize,
    height: usize,
    origin: (usize, usize),
    connectivity: Connectivity,
    predicate: P,
) -> Vec<Footprint>
where
    P: Fn(usize, usize) -> bool,
{
    let mut labels = Array2::<usize>::zeros((height, width));
    // Label 0 is background
    let mut parent_table = vec![0];

    for i in 0..height {
        for j in 0..width {
            if !predicate(i, j) {
                continue;
            }

            let mut neighbor_labels = [0usize; 4];
            let mut count = 0;
            let mut push = |label: usize| {
                if label > 0 {
                    neighbor_labels[count] = label;
                    count += 1;
                }
            };

            if i > 0 {
                push(labels[[i - 1, j]]);
                if connectivity == Connectivity::Eight {
                    if j > 0 {
                        push(labels[[i - 1, j - 1]]);
                    }
                    if j + 1 < width {
                        push(labels[[i - 1, j + 1]]);
                    }
                }
            }
            if j > 0 {
                push(labels[[i, j - 1]]);
            }

            let neighbors = &neighbor_labels[..count];
            match neighbors.iter().min() {
                None => {
                    let label = parent_table.len();
                    parent_table.push(label);
                    labels[[i, j]] = label;
                }
                Some(&min_label) => {
                    labels[[i, j]] = min_label;
                    for &neighbor in neighbors {
                        union_labels(&mut parent_table, min_label, neighbor);
                    }
                }
            }
        }
    }

    let mut grouped: BTreeMap<usize, Vec<Span>> = BTreeMap::new();
    for i in 0..height {
        let mut j = 0;
        while j < width {
            let label = labels[[i, j]];
            if label == 0 {
                j += 1;
                continue;
            }
            let root = find_root(&mut parent_table, label);
            let start = j;
            while j + 1 < width
                && labels[[i, j + 1]] != 0
                && find_root(&mut parent_table, labels[[i, j + 1]]) == root
            {
                j += 1;
            }
            grouped.entry(root).or_default().push(Span::new(
                origin.1 + i,
                origin.0 + start,
                origin.0 + j,
            ));
            j += 1;
        }
    }

    grouped
        .into_values()
        .filter_map(|spans| Footprint::from_spans(spans).ok())
        .collect()
}

/// Threshold the image plane into footprints.
///
/// A pixel is selected when its value is strictly above `threshold`
/// (positive polarity) or strictly below `-threshold` (negative). NaN never
/// matches. Each pixel belongs to at most one footprint.
pub fn detect(
    plane: &PixelPlane,
    threshold: f64,
    polarity: Polarity,
    connectivity: Connectivity,
) -> Vec<Footprint> {
    let image = plane.image();
    connected_footprints(
        plane.width(),
        plane.height(),
        plane.origin(),
        connectivity,
        |i, j| {
            let value = image[[i, j]] as f64;
            match polarity {
                Polarity::Positive => value > threshold,
                Polarity::Negative => value < -threshold,
            }
        },
    )
}

/// Footprints of pixels whose mask intersects `bits`.
pub fn detect_masked(
    plane: &PixelPlane,
    bits: MaskPixel,
    connectivity: Connectivity,
) -> Vec<Footprint> {
    let mask = plane.mask();
    connected_footprints(
        plane.width(),
        plane.height(),
        plane.origin(),
        connectivity,
        |i, j| mask[[i, j]] & bits != 0,
    )
}

/// Dilate a footprint by `radius`, clipped to `bounds`.
///
/// Returns the footprint unchanged (apart from clipping) for a zero radius.
pub fn grow(
    footprint: &Footprint,
    radius: usize,
    bounds: &BoundingBox,
    mode: GrowMode,
) -> Result<Footprint> {
    let r = radius as isize;
    let mut spans = Vec::with_capacity(footprint.spans.len() * (2 * radius + 1));

    for span in &footprint.spans {
        for dy in -r..=r {
            let half_width = match mode {
                GrowMode::Box => radius,
                GrowMode::Circular => ((r * r - dy * dy) as f64).sqrt().floor() as usize,
            };

            let y = span.y as isize + dy;
            if y < bounds.min_y as isize || y > bounds.max_y as isize {
                continue;
            }
            let x0 = span.x0.saturating_sub(half_width).max(bounds.min_x);
            let x1 = (span.x1 + half_width).min(bounds.max_x);
            if x0 > x1 {
                continue;
            }
            spans.push(Span::new(y as usize, x0, x1));
        }
    }

    Footprint::from_spans(spans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn plane_with(width: usize, height: usize, hot: &[(usize, usize)], value: f32) -> PixelPlane {
        let mut image = Array2::<f32>::zeros((height, width));
        for &(x, y) in hot {
            image[[y, x]] = value;
        }
        PixelPlane::from_image(image).unwrap()
    }

    #[test]
    fn test_detect_single_region() {
        let hot: Vec<_> = BoundingBox::new(2, 3, 4, 5).unwrap().pixels().collect();
        let plane = plane_with(10, 10, &hot, 100.0);

        let footprints = detect(&plane, 50.0, Polarity::Positive, Connectivity::Eight);
        assert_eq!(footprints.len(), 1);
        assert_eq!(footprints[0].npix(), 9);
        assert_eq!(footprints[0].bbox(), BoundingBox::new(2, 3, 4, 5).unwrap());
    }

    #[test]
    fn test_threshold_is_strict() {
        let plane = plane_with(5, 5, &[(1, 1)], 50.0);
        assert!(detect(&plane, 50.0, Polarity::Positive, Connectivity::Four).is_empty());
        assert_eq!(
            detect(&plane, 49.9, Polarity::Positive, Connectivity::Four).len(),
            1
        );
    }

    #[test]
    fn test_negative_polarity() {
        let plane = plane_with(5, 5, &[(0, 0), (4, 4)], -20.0);
        let footprints = detect(&plane, 10.0, Polarity::Negative, Connectivity::Eight);
        assert_eq!(footprints.len(), 2);
        assert!(detect(&plane, 10.0, Polarity::Positive, Connectivity::Eight).is_empty());
    }

    #[test]
    fn test_diagonal_connectivity() {
        let plane = plane_with(6, 6, &[(1, 1), (2, 2), (3, 3)], 10.0);

        let eight = detect(&plane, 5.0, Polarity::Positive, Connectivity::Eight);
        assert_eq!(eight.len(), 1);
        assert_eq!(eight[0].npix(), 3);

        let four = detect(&plane, 5.0, Polarity::Positive, Connectivity::Four);
        assert_eq!(four.len(), 3);
    }

    #[test]
    fn test_u_shape_merges() {
        // Two arms only joined on the bottom row
        let hot = [(1, 1), (1, 2), (1, 3), (2, 3), (3, 3), (3, 2), (3, 1)];
        let plane = plane_with(6, 6, &hot, 10.0);
        let footprints = detect(&plane, 5.0, Polarity::Positive, Connectivity::Four);
        assert_eq!(footprints.len(), 1);
        assert_eq!(footprints[0].npix(), 7);
    }

    #[test]
    fn test_detection_uses_parent_coordinates() {
        let plane = plane_with(4, 4, &[(1, 2)], 10.0).with_origin(100, 200);
        let footprints = detect(&plane, 5.0, Polarity::Positive, Connectivity::Eight);
        assert_eq!(footprints[0].spans(), &[Span::new(202, 101, 101)]);
    }

    #[test]
    fn test_box_growth_is_square() {
        let fp = Footprint::from_bbox(&BoundingBox::pixel(5, 5));
        let bounds = BoundingBox::new(0, 0, 20, 20).unwrap();

        let grown = grow(&fp, 1, &bounds, GrowMode::Box).unwrap();
        assert_eq!(grown.npix(), 9);
        let grown = grow(&fp, 2, &bounds, GrowMode::Box).unwrap();
        assert_eq!(grown.npix(), 25);
        assert!(grown.contains(3, 3));
    }

    #[test]
    fn test_circular_growth_is_rounder() {
        let fp = Footprint::from_bbox(&BoundingBox::pixel(5, 5));
        let bounds = BoundingBox::new(0, 0, 20, 20).unwrap();

        let grown = grow(&fp, 2, &bounds, GrowMode::Circular).unwrap();
        assert_eq!(grown.npix(), 13);
        assert!(!grown.contains(3, 3));
        assert!(grown.contains(5, 3));
    }

    #[test]
    fn test_growth_clipped_to_bounds() {
        let fp = Footprint::from_bbox(&BoundingBox::pixel(0, 0));
        let bounds = BoundingBox::new(0, 0, 9, 9).unwrap();
        let grown = grow(&fp, 2, &bounds, GrowMode::Box).unwrap();
        assert_eq!(grown.bbox(), BoundingBox::new(0, 0, 2, 2).unwrap());
        assert_eq!(grown.npix(), 9);
    }

    #[test]
    fn test_zero_radius_growth() {
        let fp = Footprint::from_bbox(&BoundingBox::new(2, 2, 4, 3).unwrap());
        let bounds = BoundingBox::new(0, 0, 9, 9).unwrap();
        assert_eq!(grow(&fp, 0, &bounds, GrowMode::Box).unwrap(), fp);
    }

    #[test]
    fn test_bounding_boxes_cover_exactly() {
        let hot = [(1, 1), (2, 1), (1, 2), (2, 2), (1, 3), (2, 3), (3, 3), (4, 3)];
        let plane = plane_with(8, 8, &hot, 10.0);
        let footprint = &detect(&plane, 5.0, Polarity::Positive, Connectivity::Four)[0];

        let boxes = footprint.to_bounding_boxes();
        let covered: usize = boxes.iter().map(BoundingBox::area).sum();
        assert_eq!(covered, hot.len());
        for bbox in &boxes {
            for (x, y) in bbox.pixels() {
                assert!(footprint.contains(x, y));
            }
        }
        assert_eq!(boxes.len(), 2);
    }

    #[test]
    fn test_detect_masked() {
        let mut plane = PixelPlane::new(6, 6).unwrap();
        plane.mask_mut()[[1, 1]] = 0b01;
        plane.mask_mut()[[4, 4]] = 0b10;

        assert_eq!(detect_masked(&plane, 0b01, Connectivity::Eight).len(), 1);
        assert_eq!(detect_masked(&plane, 0b11, Connectivity::Eight).len(), 2);
    }
}
