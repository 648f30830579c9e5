//! Rectangles in window pixel space
//!
//! Coordinates follow the screen convention: origin at the top-left corner,
//! x grows right, y grows down. Edges are fractional so that scaled and
//! rotated draws keep sub-pixel precision.

/// Axis-aligned rectangle given by its edges
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self { left, top, right, bottom }
    }

    /// Rectangle anchored at the origin with the given size
    pub fn from_size(width: f64, height: f64) -> Self {
        Self::new(0.0, 0.0, width, height)
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    /// A rectangle is empty when it encloses no area
    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    /// Edges are finite and ordered
    pub fn is_valid(&self) -> bool {
        [self.left, self.top, self.right, self.bottom]
            .iter()
            .all(|v| v.is_finite())
            && self.left <= self.right
            && self.top <= self.bottom
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.left + self.right) * 0.5,
            (self.top + self.bottom) * 0.5,
        )
    }

    /// Same size as `self`, centred inside `container`
    pub fn centered_in(&self, container: &Rect) -> Rect {
        let (cx, cy) = container.center();
        let hw = self.width() * 0.5;
        let hh = self.height() * 0.5;
        Rect::new(cx - hw, cy - hh, cx + hw, cy + hh)
    }

    /// Whether `other` lies entirely inside `self`
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }
}
