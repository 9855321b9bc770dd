//! Core geometric types for integer-coordinate layout and their operations.

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

use self::bbox::BoundBox;
use self::transform::Translate;

pub mod bbox;
pub mod transform;

/// A point in two-dimensional layout-space.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    /// Creates a new [`Point`] from (x,y) coordinates.
    #[inline]
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// Returns the origin, (0, 0).
    #[inline]
    pub fn zero() -> Self {
        Self { x: 0, y: 0 }
    }

    /// Creates a new [`Point`] shifted by `p.x` in the x-dimension and by `p.y` in the y-dimension.
    #[inline]
    pub fn translated(&self, p: Point) -> Self {
        let mut pt = *self;
        pt.translate(p);
        pt
    }
}

impl std::ops::Add<Point> for Point {
    type Output = Self;
    fn add(self, rhs: Point) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::AddAssign<Point> for Point {
    fn add_assign(&mut self, rhs: Point) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl std::ops::Sub<Point> for Point {
    type Output = Self;
    fn sub(self, rhs: Point) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Neg for Point {
    type Output = Self;
    fn neg(self) -> Self::Output {
        Self::new(-self.x, -self.y)
    }
}

impl From<(i64, i64)> for Point {
    fn from(value: (i64, i64)) -> Self {
        Self {
            x: value.0,
            y: value.1,
        }
    }
}

/// An axis-aligned rectangle, specified by lower-left and upper-right corners.
#[derive(Debug, Default, Copy, Clone, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Rect {
    /// The lower-left corner.
    pub p0: Point,
    /// The upper-right corner.
    pub p1: Point,
}

impl Rect {
    /// Creates a new rectangle, normalizing the corner order.
    pub fn new(p0: Point, p1: Point) -> Self {
        Self {
            p0: Point::new(p0.x.min(p1.x), p0.y.min(p1.y)),
            p1: Point::new(p0.x.max(p1.x), p0.y.max(p1.y)),
        }
    }

    /// Creates a rectangle from the four side coordinates.
    pub fn from_sides(left: i64, bottom: i64, right: i64, top: i64) -> Self {
        Self::new(Point::new(left, bottom), Point::new(right, top))
    }

    /// Creates an empty rectangle containing the given point.
    pub fn from_point(p: Point) -> Self {
        Self { p0: p, p1: p }
    }

    /// Returns the bottom y-coordinate of the rectangle.
    #[inline]
    pub fn bottom(&self) -> i64 {
        self.p0.y
    }

    /// Returns the top y-coordinate of the rectangle.
    #[inline]
    pub fn top(&self) -> i64 {
        self.p1.y
    }

    /// Returns the left x-coordinate of the rectangle.
    #[inline]
    pub fn left(&self) -> i64 {
        self.p0.x
    }

    /// Returns the right x-coordinate of the rectangle.
    #[inline]
    pub fn right(&self) -> i64 {
        self.p1.x
    }

    /// Returns the horizontal width of the rectangle.
    #[inline]
    pub fn width(&self) -> i64 {
        self.p1.x - self.p0.x
    }

    /// Returns the vertical height of the rectangle.
    #[inline]
    pub fn height(&self) -> i64 {
        self.p1.y - self.p0.y
    }

    /// Returns the center point of the rectangle.
    pub fn center(&self) -> Point {
        Point::new((self.p0.x + self.p1.x) / 2, (self.p0.y + self.p1.y) / 2)
    }

    /// Expands the rectangle by `amount` on all sides.
    #[inline]
    pub fn expand(&self, amount: i64) -> Self {
        Self::new(
            Point::new(self.p0.x - amount, self.p0.y - amount),
            Point::new(self.p1.x + amount, self.p1.y + amount),
        )
    }

    /// Returns `true` if the rectangles share at least one point.
    ///
    /// Touching is *inclusive*: rectangles meeting along an edge or at a
    /// single corner count as touching.
    #[inline]
    pub fn touches(&self, other: &Rect) -> bool {
        self.p0.x <= other.p1.x
            && other.p0.x <= self.p1.x
            && self.p0.y <= other.p1.y
            && other.p0.y <= self.p1.y
    }
}

/// A closed n-sided polygon with an arbitrary number of vertices.
///
/// Closure from the last point back to the first is implied;
/// the initial point need not be repeated at the end.
#[derive(Debug, Default, Clone, Serialize, Deserialize, Hash, PartialEq, Eq)]
pub struct Polygon {
    pub points: Vec<Point>,
}

impl Polygon {
    /// Creates a new [`Polygon`] from its vertices.
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// Iterates over the polygon's edges as point pairs, closing the contour.
    pub fn edges(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        let n = self.points.len();
        (0..n).map(move |i| (self.points[i], self.points[(i + 1) % n]))
    }
}

/// The primary geometric primitive comprising raw layout.
///
/// Variants include [`Rect`] and [`Polygon`].
#[derive(Debug, Clone, Serialize, Deserialize, Hash, PartialEq, Eq)]
#[enum_dispatch(ShapeTrait)]
pub enum Shape {
    Rect(Rect),
    Polygon(Polygon),
}

impl Shape {
    /// Returns the contained [`Rect`] if this shape is box-backed.
    pub fn as_rect(&self) -> Option<Rect> {
        if let Shape::Rect(rect) = self {
            Some(*rect)
        } else {
            None
        }
    }

    /// Returns `true` if the shapes share at least one point.
    ///
    /// Interaction is inclusive: edge-only and corner-only contact counts.
    pub fn interacts(&self, other: &Shape) -> bool {
        if self.bbox().intersection(other.bbox()).is_empty() {
            return false;
        }
        match (self, other) {
            (Shape::Rect(a), Shape::Rect(b)) => a.touches(b),
            _ => polys_interact(&self.to_poly(), &other.to_poly()),
        }
    }
}

/// Common shape operations, dispatched from the [`Shape`] enum to its variants.
#[enum_dispatch]
pub trait ShapeTrait {
    /// Returns `true` if the shape contains [`Point`] `pt`.
    ///
    /// Containment is *inclusive*: points on the boundary are regarded as inside.
    fn contains(&self, pt: Point) -> bool;
    /// Converts the shape to a [`Polygon`], the most general of shapes.
    fn to_poly(&self) -> Polygon;
}

impl ShapeTrait for Rect {
    fn contains(&self, pt: Point) -> bool {
        self.p0.x <= pt.x && self.p1.x >= pt.x && self.p0.y <= pt.y && self.p1.y >= pt.y
    }
    fn to_poly(&self) -> Polygon {
        Polygon {
            points: vec![
                self.p0,
                Point::new(self.p1.x, self.p0.y),
                self.p1,
                Point::new(self.p0.x, self.p1.y),
            ],
        }
    }
}

impl ShapeTrait for Polygon {
    fn contains(&self, pt: Point) -> bool {
        if !self.points.bbox().contains(pt) {
            return false;
        }

        // Boundary points count as inside.
        for (a, b) in self.edges() {
            if on_segment(a, b, pt) {
                return true;
            }
        }

        // Even-odd ray cast with exact integer arithmetic: the comparison
        // `pt.x < x_intersection` is rewritten as a cross-multiplied i128
        // inequality so no rounding occurs.
        let mut inside = false;
        for (a, b) in self.edges() {
            if (a.y > pt.y) != (b.y > pt.y) {
                let lhs = (pt.x - a.x) as i128 * (b.y - a.y) as i128;
                let rhs = (pt.y - a.y) as i128 * (b.x - a.x) as i128;
                let crossed = if b.y > a.y { lhs < rhs } else { lhs > rhs };
                if crossed {
                    inside = !inside;
                }
            }
        }
        inside
    }
    fn to_poly(&self) -> Polygon {
        self.clone()
    }
}

/// The z-component of the cross product of `b - a` and `c - a`.
fn orient(a: Point, b: Point, c: Point) -> i128 {
    (b.x - a.x) as i128 * (c.y - a.y) as i128 - (b.y - a.y) as i128 * (c.x - a.x) as i128
}

/// Returns `true` if `pt` lies on the closed segment from `a` to `b`.
fn on_segment(a: Point, b: Point, pt: Point) -> bool {
    orient(a, b, pt) == 0
        && a.x.min(b.x) <= pt.x
        && pt.x <= a.x.max(b.x)
        && a.y.min(b.y) <= pt.y
        && pt.y <= a.y.max(b.y)
}

/// Returns `true` if the closed segments `p1..p2` and `q1..q2` intersect.
fn segments_intersect(p1: Point, p2: Point, q1: Point, q2: Point) -> bool {
    let d1 = orient(q1, q2, p1);
    let d2 = orient(q1, q2, p2);
    let d3 = orient(p1, p2, q1);
    let d4 = orient(p1, p2, q2);

    if ((d1 > 0 && d2 < 0) || (d1 < 0 && d2 > 0)) && ((d3 > 0 && d4 < 0) || (d3 < 0 && d4 > 0)) {
        return true;
    }

    (d1 == 0 && on_segment(q1, q2, p1))
        || (d2 == 0 && on_segment(q1, q2, p2))
        || (d3 == 0 && on_segment(p1, p2, q1))
        || (d4 == 0 && on_segment(p1, p2, q2))
}

/// Polygon-polygon interaction, inclusive of edge-only contact.
fn polys_interact(a: &Polygon, b: &Polygon) -> bool {
    // One polygon fully inside the other, or sharing a vertex.
    if a.points.iter().any(|&p| b.contains(p)) || b.points.iter().any(|&p| a.contains(p)) {
        return true;
    }
    // Crossing edges without vertex containment.
    for (p1, p2) in a.edges() {
        for (q1, q2) in b.edges() {
            if segments_intersect(p1, p2, q1, q2) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_touching_is_inclusive() {
        let a = Rect::from_sides(0, 0, 10, 10);
        let edge = Rect::from_sides(10, 0, 20, 10);
        let corner = Rect::from_sides(10, 10, 20, 20);
        let apart = Rect::from_sides(11, 0, 20, 10);
        assert!(a.touches(&edge));
        assert!(a.touches(&corner));
        assert!(!a.touches(&apart));
    }

    #[test]
    fn polygon_contains_boundary() {
        let triangle = Polygon::new(vec![Point::new(0, 0), Point::new(4, 0), Point::new(0, 4)]);
        assert!(triangle.contains(Point::new(0, 0)));
        assert!(triangle.contains(Point::new(2, 0)));
        assert!(triangle.contains(Point::new(2, 2)));
        assert!(triangle.contains(Point::new(1, 1)));
        assert!(!triangle.contains(Point::new(3, 3)));
        assert!(!triangle.contains(Point::new(-1, 0)));
    }

    #[test]
    fn polygon_contains_notch() {
        // A U-shaped polygon inside a 10x10 square.
        let u = Polygon::new(vec![
            Point::new(0, 0),
            Point::new(0, 10),
            Point::new(2, 10),
            Point::new(2, 2),
            Point::new(8, 2),
            Point::new(8, 10),
            Point::new(10, 10),
            Point::new(10, 0),
        ]);
        for pt in &u.points {
            assert!(u.contains(*pt));
        }
        assert!(u.contains(Point::new(1, 9)));
        assert!(u.contains(Point::new(9, 9)));
        assert!(!u.contains(Point::new(5, 9)));
        assert!(!u.contains(Point::new(5, 3)));
    }

    #[test]
    fn shape_interacts_edge_contact() {
        let a = Shape::Rect(Rect::from_sides(0, 0, 10, 10));
        let b = Shape::Rect(Rect::from_sides(10, 2, 20, 8));
        let c = Shape::Polygon(Polygon::new(vec![
            Point::new(10, 10),
            Point::new(14, 10),
            Point::new(14, 14),
        ]));
        let d = Shape::Rect(Rect::from_sides(30, 30, 40, 40));
        assert!(a.interacts(&b));
        assert!(a.interacts(&c));
        assert!(!a.interacts(&d));
        assert!(!b.interacts(&c));
    }

    #[test]
    fn shape_interacts_containment() {
        let outer = Shape::Polygon(Rect::from_sides(0, 0, 100, 100).to_poly());
        let inner = Shape::Rect(Rect::from_sides(40, 40, 60, 60));
        assert!(outer.interacts(&inner));
        assert!(inner.interacts(&outer));
    }
}
