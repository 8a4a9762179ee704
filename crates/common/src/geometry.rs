// Page geometry: pixel-space rectangles and their page-normalized form.
//
// Pixel rects are captured at whatever scale the page was rendered at.
// Normalized rects divide by the page size so they replay at any zoom.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in page-pixel space at capture-time scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        let (left, right) = if x1 <= x2 { (x1, x2) } else { (x2, x1) };
        let (top, bottom) = if y1 <= y2 { (y1, y2) } else { (y2, y1) };
        Self { x1: left, y1: top, x2: right, y2: bottom, width: right - left, height: bottom - top }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Smallest rect containing both `self` and `other`.
    pub fn union(&self, other: &Rect) -> Rect {
        Rect::from_corners(
            self.x1.min(other.x1),
            self.y1.min(other.y1),
            self.x2.max(other.x2),
            self.y2.max(other.y2),
        )
    }

    /// Bounding rect of a list; `None` for an empty list.
    pub fn bounding(rects: &[Rect]) -> Option<Rect> {
        let (first, rest) = rects.split_first()?;
        Some(rest.iter().fold(*first, |acc, rect| acc.union(rect)))
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Rect {
        Rect::from_corners(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }

    pub fn normalize(&self, page: PageSize) -> NormalizedRect {
        NormalizedRect::from_pixels(self, page)
    }
}

/// Page dimensions in pixels at some render scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    pub fn scaled(&self, scale: f64) -> PageSize {
        PageSize { width: self.width * scale, height: self.height * scale }
    }
}

/// Rectangle with every coordinate in `[0, 1]`, relative to page width/height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl NormalizedRect {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1: clamp_unit(x1), y1: clamp_unit(y1), x2: clamp_unit(x2), y2: clamp_unit(y2) }
    }

    pub fn from_pixels(rect: &Rect, page: PageSize) -> Self {
        if !page.is_valid() {
            return Self::new(0.0, 0.0, 0.0, 0.0);
        }
        Self::new(
            rect.x1 / page.width,
            rect.y1 / page.height,
            rect.x2 / page.width,
            rect.y2 / page.height,
        )
    }

    /// Pixel rect for a page rendered at `page` size.
    pub fn denormalize(&self, page: PageSize) -> Rect {
        Rect::from_corners(
            self.x1 * page.width,
            self.y1 * page.height,
            self.x2 * page.width,
            self.y2 * page.height,
        )
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }

    /// True when the top-left corners differ by at most `epsilon` on both axes.
    pub fn origin_within(&self, other: &NormalizedRect, epsilon: f64) -> bool {
        (self.x1 - other.x1).abs() <= epsilon && (self.y1 - other.y1).abs() <= epsilon
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_corners_orders_coordinates() {
        let rect = Rect::from_corners(300.0, 220.0, 100.0, 200.0);
        assert_eq!(rect.x1, 100.0);
        assert_eq!(rect.y1, 200.0);
        assert_eq!(rect.width, 200.0);
        assert_eq!(rect.height, 20.0);
    }

    #[test]
    fn bounding_covers_every_rect() {
        let rects = [
            Rect::from_corners(10.0, 10.0, 50.0, 20.0),
            Rect::from_corners(5.0, 22.0, 40.0, 32.0),
        ];
        let bounds = Rect::bounding(&rects).unwrap();
        assert_eq!((bounds.x1, bounds.y1, bounds.x2, bounds.y2), (5.0, 10.0, 50.0, 32.0));
        assert!(Rect::bounding(&[]).is_none());
    }

    #[test]
    fn normalize_then_denormalize_at_same_size_is_identity() {
        let page = PageSize::new(612.0, 792.0);
        let rect = Rect::from_corners(100.0, 200.0, 300.0, 220.0);
        let back = rect.normalize(page).denormalize(page);
        assert!((back.x1 - rect.x1).abs() < 1e-9);
        assert!((back.y2 - rect.y2).abs() < 1e-9);
    }

    #[test]
    fn normalization_clamps_out_of_page_coordinates() {
        let page = PageSize::new(100.0, 100.0);
        let rect = Rect::from_corners(-10.0, 50.0, 150.0, 60.0);
        let normalized = rect.normalize(page);
        assert_eq!(normalized.x1, 0.0);
        assert_eq!(normalized.x2, 1.0);
    }

    #[test]
    fn invalid_page_size_normalizes_to_zero_rect() {
        let rect = Rect::from_corners(1.0, 1.0, 2.0, 2.0);
        let normalized = rect.normalize(PageSize::new(0.0, 100.0));
        assert_eq!(normalized, NormalizedRect::new(0.0, 0.0, 0.0, 0.0));
    }
}
