//! Integer complex transformations: 8-fold rotation, mirroring,
//! translation, and scalar magnification.

use serde::{Deserialize, Serialize};

use super::{Point, Polygon, Rect, Shape};
use crate::bbox::Bbox;

/// A counter-clockwise rotation by a multiple of 90 degrees.
#[derive(
    Debug, Default, Copy, Clone, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord,
)]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    /// The number of counter-clockwise quarter turns.
    #[inline]
    pub fn quarter_turns(&self) -> u8 {
        match self {
            Self::R0 => 0,
            Self::R90 => 1,
            Self::R180 => 2,
            Self::R270 => 3,
        }
    }

    /// The rotation with the given number of counter-clockwise quarter turns.
    pub fn from_quarter_turns(turns: i32) -> Self {
        match turns.rem_euclid(4) {
            0 => Self::R0,
            1 => Self::R90,
            2 => Self::R180,
            _ => Self::R270,
        }
    }

    /// Composes two rotations.
    #[inline]
    pub fn compose(self, other: Rotation) -> Self {
        Self::from_quarter_turns(self.quarter_turns() as i32 + other.quarter_turns() as i32)
    }

    /// The opposite rotation.
    #[inline]
    pub fn inverse(self) -> Self {
        Self::from_quarter_turns(-(self.quarter_turns() as i32))
    }
}

/// An integer complex transformation.
///
/// Applies, in order: mirroring about the x-axis, counter-clockwise
/// rotation by a multiple of 90 degrees, scalar magnification, and an
/// integer translation. Transformations compose associatively via
/// [`Transformation::cascade`] and invert via [`Transformation::inverted`]
/// for non-zero magnification.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transformation {
    /// The rotation applied after the optional mirror.
    pub rot: Rotation,
    /// Whether the transformation mirrors about the x-axis before rotating.
    pub mirror: bool,
    /// The translation applied after rotation and magnification.
    pub disp: Point,
    /// The scalar magnification.
    pub mag: f64,
}

impl Default for Transformation {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transformation {
    /// Returns the identity transform, leaving any transformed object unmodified.
    pub fn identity() -> Self {
        Self {
            rot: Rotation::R0,
            mirror: false,
            disp: Point::zero(),
            mag: 1.0,
        }
    }

    /// Returns a translation by `disp`.
    pub fn translate(disp: Point) -> Self {
        Self {
            disp,
            ..Self::identity()
        }
    }

    /// Returns a pure rotation (and optional mirror) about the origin.
    pub fn with_rotation(rot: Rotation, mirror: bool) -> Self {
        Self {
            rot,
            mirror,
            ..Self::identity()
        }
    }

    /// Returns a pure magnification about the origin.
    pub fn magnification(mag: f64) -> Self {
        Self {
            mag,
            ..Self::identity()
        }
    }

    /// Returns a new [`TransformationBuilder`].
    #[inline]
    pub fn builder() -> TransformationBuilder {
        TransformationBuilder::default()
    }

    /// The scalar magnification of the transformation.
    #[inline]
    pub fn mag(&self) -> f64 {
        self.mag
    }

    /// This transformation with the magnification stripped.
    #[inline]
    pub fn without_mag(&self) -> Self {
        Self { mag: 1.0, ..*self }
    }

    /// Applies the linear part (mirror, rotation, magnification) to a point.
    fn apply_linear(&self, p: Point) -> Point {
        let (x, y) = (p.x, if self.mirror { -p.y } else { p.y });
        let (x, y) = match self.rot {
            Rotation::R0 => (x, y),
            Rotation::R90 => (-y, x),
            Rotation::R180 => (-x, -y),
            Rotation::R270 => (y, -x),
        };
        if self.mag == 1.0 {
            Point::new(x, y)
        } else {
            Point::new(
                (self.mag * x as f64).round() as i64,
                (self.mag * y as f64).round() as i64,
            )
        }
    }

    /// Creates a new [`Transformation`] that is the cascade of `parent` and `child`.
    ///
    /// "Parents" and "children" refer to typical layout-instance hierarchies:
    /// the result applies `child` first, then `parent`. Note this operation
    /// *is not* commutative.
    pub fn cascade(parent: Transformation, child: Transformation) -> Transformation {
        let rot = if parent.mirror {
            parent.rot.compose(child.rot.inverse())
        } else {
            parent.rot.compose(child.rot)
        };
        Transformation {
            rot,
            mirror: parent.mirror ^ child.mirror,
            disp: parent.disp + parent.apply_linear(child.disp),
            mag: parent.mag * child.mag,
        }
    }

    /// Returns the inverse transformation.
    ///
    /// The inverse exists for non-zero magnification only.
    pub fn inverted(&self) -> Transformation {
        debug_assert!(self.mag != 0.0);
        let mut inv = Transformation {
            rot: if self.mirror {
                self.rot
            } else {
                self.rot.inverse()
            },
            mirror: self.mirror,
            disp: Point::zero(),
            mag: 1.0 / self.mag,
        };
        inv.disp = -inv.apply_linear(self.disp);
        inv
    }

    /// Compares two transformations, tolerating floating-point noise in the
    /// magnification (as introduced by database-unit compensation).
    pub fn approx_eq(&self, other: &Transformation) -> bool {
        self.rot == other.rot
            && self.mirror == other.mirror
            && self.disp == other.disp
            && (self.mag - other.mag).abs() <= 1e-9 * self.mag.abs().max(1.0)
    }
}

/// A builder for creating transformations from their components.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformationBuilder {
    disp: Point,
    rot: Rotation,
    mirror: bool,
    mag: Option<f64>,
}

impl TransformationBuilder {
    /// Specifies the translation encoded by the transformation.
    pub fn point(&mut self, disp: impl Into<Point>) -> &mut Self {
        self.disp = disp.into();
        self
    }

    /// Specifies the rotation applied by this transformation.
    pub fn rotation(&mut self, rot: Rotation) -> &mut Self {
        self.rot = rot;
        self
    }

    /// Specifies whether the transformation mirrors about the x-axis.
    pub fn mirror(&mut self, mirror: bool) -> &mut Self {
        self.mirror = mirror;
        self
    }

    /// Specifies the scalar magnification.
    pub fn mag(&mut self, mag: f64) -> &mut Self {
        self.mag = Some(mag);
        self
    }

    /// Builds a [`Transformation`] from the specified parameters.
    pub fn build(&mut self) -> Transformation {
        Transformation {
            rot: self.rot,
            mirror: self.mirror,
            disp: self.disp,
            mag: self.mag.unwrap_or(1.0),
        }
    }
}

/// A trait for specifying how an object is changed by a transformation.
pub trait Transform {
    /// Applies [`Transformation`] `trans`, creating a new object.
    fn transform(&self, trans: Transformation) -> Self;
}

impl Transform for Point {
    fn transform(&self, trans: Transformation) -> Self {
        trans.apply_linear(*self) + trans.disp
    }
}

impl Transform for Rect {
    fn transform(&self, trans: Transformation) -> Self {
        // Rotations are multiples of 90 degrees, so a rectangle stays a
        // rectangle; only the corner order may change.
        Rect::new(self.p0.transform(trans), self.p1.transform(trans))
    }
}

impl Transform for Polygon {
    fn transform(&self, trans: Transformation) -> Self {
        Polygon {
            points: self.points.iter().map(|p| p.transform(trans)).collect(),
        }
    }
}

impl Transform for Shape {
    fn transform(&self, trans: Transformation) -> Self {
        match self {
            Self::Rect(s) => Self::Rect(s.transform(trans)),
            Self::Polygon(s) => Self::Polygon(s.transform(trans)),
        }
    }
}

impl Transform for Bbox {
    fn transform(&self, trans: Transformation) -> Self {
        if self.is_empty() {
            return *self;
        }
        Bbox::new(self.p0.transform(trans), self.p1.transform(trans))
    }
}

/// A trait for specifying how a shape is translated by a [`Point`].
pub trait Translate {
    /// Translates the shape by a [`Point`] through mutation.
    fn translate(&mut self, p: Point);
}

impl Translate for Point {
    fn translate(&mut self, p: Point) {
        self.x += p.x;
        self.y += p.y;
    }
}

impl Translate for Rect {
    fn translate(&mut self, p: Point) {
        self.p0.translate(p);
        self.p1.translate(p);
    }
}

impl Translate for Polygon {
    fn translate(&mut self, p: Point) {
        for pt in self.points.iter_mut() {
            pt.translate(p);
        }
    }
}

impl Translate for Shape {
    fn translate(&mut self, p: Point) {
        match self {
            Self::Rect(s) => s.translate(p),
            Self::Polygon(s) => s.translate(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_rectangular() -> Vec<Transformation> {
        let mut all = Vec::new();
        for rot in [Rotation::R0, Rotation::R90, Rotation::R180, Rotation::R270] {
            for mirror in [false, true] {
                all.push(Transformation {
                    rot,
                    mirror,
                    disp: Point::new(520, 130),
                    mag: 1.0,
                });
            }
        }
        all
    }

    #[test]
    fn transform_rotate() {
        let r = Rect::from_sides(0, 0, 2, 1);
        let t = Transformation::with_rotation(Rotation::R90, false);
        let r90 = r.transform(t);
        assert_eq!(r90, Rect::from_sides(-1, 0, 0, 2));
        let r180 = r90.transform(t);
        assert_eq!(r180, Rect::from_sides(-2, -1, 0, 0));
        let r270 = r180.transform(t);
        assert_eq!(r270, Rect::from_sides(0, -2, 1, 0));
        assert_eq!(r270.transform(t), r);
    }

    #[test]
    fn transform_mirror_then_rotate() {
        let p = Point::new(2, 1);
        let t = Transformation {
            rot: Rotation::R90,
            mirror: true,
            disp: Point::new(10, 0),
            mag: 1.0,
        };
        // Mirror: (2, -1); rotate 90: (1, 2); translate: (11, 2).
        assert_eq!(p.transform(t), Point::new(11, 2));
    }

    #[test]
    fn cascade_identity() {
        for tf in all_rectangular() {
            assert_eq!(Transformation::cascade(tf, Transformation::identity()), tf);
            assert_eq!(Transformation::cascade(Transformation::identity(), tf), tf);
        }
    }

    #[test]
    fn cascade_matches_sequential_application() {
        let pts = [Point::new(1, 1), Point::new(-3, 7), Point::new(0, -2)];
        for parent in all_rectangular() {
            for child in all_rectangular() {
                let casc = Transformation::cascade(parent, child);
                for p in pts {
                    assert_eq!(
                        p.transform(casc),
                        p.transform(child).transform(parent),
                        "cascade mismatch for parent {parent:?}, child {child:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn inverse_round_trip() {
        let pts = [Point::new(17, -4), Point::new(0, 0), Point::new(-9, 23)];
        for tf in all_rectangular() {
            let inv = tf.inverted();
            for p in pts {
                assert_eq!(p.transform(tf).transform(inv), p);
                assert_eq!(p.transform(inv).transform(tf), p);
            }
        }
    }

    #[test]
    fn magnification_scales_and_factors() {
        let t = Transformation {
            rot: Rotation::R0,
            mirror: false,
            disp: Point::new(5, 5),
            mag: 2.0,
        };
        assert_eq!(Point::new(3, 4).transform(t), Point::new(11, 13));

        let factored = Transformation::cascade(
            t.without_mag(),
            Transformation::magnification(t.mag()),
        );
        assert!(factored.approx_eq(&t));
    }
}
