use serde::{Deserialize, Serialize};

/// Pixel rectangle of a tile at its level: origin plus size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileBounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileBounds {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub const fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// Exclusive bottom edge.
    pub const fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether the point lies inside the rectangle.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && (x as u64) < self.right() && (y as u64) < self.bottom()
    }

    /// Whether the two rectangles share at least one pixel.
    pub fn intersects(&self, other: &TileBounds) -> bool {
        (self.x as u64) < other.right()
            && (other.x as u64) < self.right()
            && (self.y as u64) < other.bottom()
            && (other.y as u64) < self.bottom()
    }

    /// Shared pixels of two rectangles.
    pub fn intersection(&self, other: &TileBounds) -> Option<TileBounds> {
        if !self.intersects(other) {
            return None;
        }
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        Some(TileBounds::new(
            x,
            y,
            (right - x as u64) as u32,
            (bottom - y as u64) as u32,
        ))
    }
}

/// Polygon ring attached to a tile, in image pixel coordinates.
///
/// Masks are carried for downstream consumers; nothing in this crate
/// evaluates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileMask {
    points: Vec<(f64, f64)>,
}

impl TileMask {
    pub fn new(points: Vec<(f64, f64)>) -> Self {
        Self { points }
    }

    /// Axis-aligned rectangle ring matching `bounds`.
    pub fn from_bounds(bounds: &TileBounds) -> Self {
        let (x0, y0) = (bounds.x as f64, bounds.y as f64);
        let (x1, y1) = (bounds.right() as f64, bounds.bottom() as f64);
        Self::new(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1)])
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }
}
