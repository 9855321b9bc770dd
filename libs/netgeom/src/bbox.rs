//! Rectangular bounding boxes and associated trait implementations.

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

use super::{Point, Polygon, Rect, Shape};

/// An axis-aligned rectangular bounding box.
///
/// Points `p0` and `p1` represent opposite corners of a bounding rectangle.
/// `p0` is always closest to negative-infinity, in both x and y,
/// and `p1` is always closest to positive-infinity.
///
/// This differs from [`Rect`] in that it could be empty, meaning that `p0`
/// is to the upper right of `p1`.
#[derive(Debug, Copy, Clone, Deserialize, Serialize, Hash, PartialEq, Eq)]
pub struct Bbox {
    pub p0: Point,
    pub p1: Point,
}

impl Default for Bbox {
    fn default() -> Self {
        Self::empty()
    }
}

impl Bbox {
    /// Creates a new [`Bbox`] from two [`Point`]s.
    #[inline]
    pub fn new(p0: Point, p1: Point) -> Self {
        Self {
            p0: Point::new(p0.x.min(p1.x), p0.y.min(p1.y)),
            p1: Point::new(p0.x.max(p1.x), p0.y.max(p1.y)),
        }
    }

    /// Creates a new [`Bbox`] comprising solely of the given point, with zero area.
    pub fn from_point(pt: Point) -> Self {
        Self { p0: pt, p1: pt }
    }

    /// Creates an empty, otherwise invalid bounding box.
    pub fn empty() -> Self {
        Self {
            p0: Point::new(i64::MAX, i64::MAX),
            p1: Point::new(i64::MIN, i64::MIN),
        }
    }

    /// Returns `true` if the bounding box is empty.
    pub fn is_empty(&self) -> bool {
        self.p0.x > self.p1.x || self.p0.y > self.p1.y
    }

    /// Finds the width of the bounding box in the x-direction.
    #[inline]
    pub fn width(&self) -> i64 {
        self.p1.x - self.p0.x
    }

    /// Finds the height of the bounding box in the y-direction.
    #[inline]
    pub fn height(&self) -> i64 {
        self.p1.y - self.p0.y
    }

    /// Returns `true` if [`Point`] `pt` lies inside the bounding box.
    pub fn contains(&self, pt: Point) -> bool {
        self.p0.x <= pt.x && self.p1.x >= pt.x && self.p0.y <= pt.y && self.p1.y >= pt.y
    }

    /// Returns `true` if the boxes share at least one point.
    ///
    /// Inclusive: edge- and corner-contact counts. Empty boxes touch nothing.
    pub fn touches(&self, other: &Bbox) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.p0.x <= other.p1.x
            && other.p0.x <= self.p1.x
            && self.p0.y <= other.p1.y
            && other.p0.y <= self.p1.y
    }

    /// Computes the intersection with bounding box `bbox`.
    pub fn intersection(&self, bbox: Bbox) -> Bbox {
        let pmin = Point::new(self.p0.x.max(bbox.p0.x), self.p0.y.max(bbox.p0.y));
        let pmax = Point::new(self.p1.x.min(bbox.p1.x), self.p1.y.min(bbox.p1.y));
        if pmin.x > pmax.x || pmin.y > pmax.y {
            return Bbox::empty();
        }
        Bbox { p0: pmin, p1: pmax }
    }

    /// Computes the union with bounding box `bbox`.
    pub fn union(&self, bbox: Bbox) -> Bbox {
        if bbox.is_empty() {
            return *self;
        }
        if self.is_empty() {
            return bbox;
        }
        Bbox {
            p0: Point::new(self.p0.x.min(bbox.p0.x), self.p0.y.min(bbox.p0.y)),
            p1: Point::new(self.p1.x.max(bbox.p1.x), self.p1.y.max(bbox.p1.y)),
        }
    }

    /// Expands the box in all directions by `delta`.
    pub fn expand(&self, delta: i64) -> Bbox {
        if self.is_empty() {
            return *self;
        }
        Bbox {
            p0: Point::new(self.p0.x - delta, self.p0.y - delta),
            p1: Point::new(self.p1.x + delta, self.p1.y + delta),
        }
    }

    /// Converts the bounding box into a [`Rect`].
    ///
    /// # Panics
    ///
    /// Panics if the bounding box is empty.
    #[inline]
    pub fn into_rect(self) -> Rect {
        assert!(!self.is_empty(), "cannot convert an empty Bbox to a Rect");
        Rect {
            p0: self.p0,
            p1: self.p1,
        }
    }
}

impl From<Rect> for Bbox {
    fn from(r: Rect) -> Self {
        debug_assert!(r.p0.x <= r.p1.x);
        debug_assert!(r.p0.y <= r.p1.y);
        Self { p0: r.p0, p1: r.p1 }
    }
}

/// A trait representing functions available for objects with a bounding box.
#[enum_dispatch]
pub trait BoundBox {
    /// Computes a rectangular bounding box around the implementing type.
    fn bbox(&self) -> Bbox;
}

impl<T> BoundBox for &T
where
    T: BoundBox,
{
    fn bbox(&self) -> Bbox {
        T::bbox(*self)
    }
}

impl BoundBox for Bbox {
    fn bbox(&self) -> Bbox {
        *self
    }
}

impl BoundBox for Point {
    fn bbox(&self) -> Bbox {
        Bbox::from_point(*self)
    }
}

impl BoundBox for Rect {
    fn bbox(&self) -> Bbox {
        Bbox {
            p0: self.p0,
            p1: self.p1,
        }
    }
}

impl BoundBox for Polygon {
    fn bbox(&self) -> Bbox {
        self.points.bbox()
    }
}

impl BoundBox for Shape {
    fn bbox(&self) -> Bbox {
        match self {
            Shape::Rect(r) => r.bbox(),
            Shape::Polygon(p) => p.bbox(),
        }
    }
}

impl BoundBox for Vec<Point> {
    fn bbox(&self) -> Bbox {
        let mut bbox = Bbox::empty();
        for pt in self {
            bbox = bbox.union(pt.bbox());
        }
        bbox
    }
}
