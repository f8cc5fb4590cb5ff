// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Spatio-temporal geometry primitives: points and axis-aligned bounding boxes
//! over `(x, y, t)`.

use std::io::{Read, Write};

use crate::coding::{Decode, Encode, EncodeError, LittleEndian, ReadBytesExt, WriteBytesExt};
use crate::error::Error;

/// A point in space-time: two spatial coordinates plus a timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3 {
    /// Spatial x coordinate.
    pub x: f32,
    /// Spatial y coordinate.
    pub y: f32,
    /// Timestamp.
    pub t: f32,
}

impl Point3 {
    /// Creates a new point.
    #[must_use]
    pub fn new(x: f32, y: f32, t: f32) -> Self {
        Self { x, y, t }
    }

    /// Componentwise minimum.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        Self {
            x: self.x.min(other.x),
            y: self.y.min(other.y),
            t: self.t.min(other.t),
        }
    }

    /// Componentwise maximum.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        Self {
            x: self.x.max(other.x),
            y: self.y.max(other.y),
            t: self.t.max(other.t),
        }
    }

    /// Componentwise `<=`.
    #[must_use]
    pub fn le(self, other: Self) -> bool {
        self.x <= other.x && self.y <= other.y && self.t <= other.t
    }
}

impl Encode for Point3 {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_f32::<LittleEndian>(self.x)?;
        writer.write_f32::<LittleEndian>(self.y)?;
        writer.write_f32::<LittleEndian>(self.t)?;
        Ok(())
    }
}

impl Decode for Point3 {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let x = reader.read_f32::<LittleEndian>()?;
        let y = reader.read_f32::<LittleEndian>()?;
        let t = reader.read_f32::<LittleEndian>()?;
        Ok(Self { x, y, t })
    }
}

/// An axis-aligned bounding box over `(x, y, t)`, `min <= max` componentwise.
///
/// `size()` clamps to `f32::MAX` on overflow (see design note on floats):
/// extreme inputs can make the product of widths overflow to infinity, and
/// an infinite size must still compare consistently with other boxes rather
/// than silently becoming `NaN`-like.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    /// Componentwise minimum corner.
    pub min: Point3,
    /// Componentwise maximum corner.
    pub max: Point3,
}

impl BBox {
    /// Creates a bounding box from two corners, taking the componentwise
    /// min/max so callers need not pre-sort them.
    #[must_use]
    pub fn new(a: Point3, b: Point3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// A bounding box that is the single point `p`.
    #[must_use]
    pub fn point(p: Point3) -> Self {
        Self { min: p, max: p }
    }

    /// Widths along each axis.
    #[must_use]
    pub fn widths(&self) -> Point3 {
        Point3 {
            x: self.max.x - self.min.x,
            y: self.max.y - self.min.y,
            t: self.max.t - self.min.t,
        }
    }

    /// Volume: the product of the box's widths, clamped to `f32::MAX` if the
    /// product would overflow to infinity.
    #[must_use]
    pub fn size(&self) -> f32 {
        let w = self.widths();
        let s = (w.x as f64) * (w.y as f64) * (w.t as f64);
        if s.is_infinite() {
            f32::MAX
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let s = s as f32;
            s
        }
    }

    /// Whether `self` and `other` intersect (inclusive on boundaries), checked
    /// independently per axis.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.t <= other.max.t
            && self.max.t >= other.min.t
    }

    /// Whether `self` fully contains `other`.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.min.le(other.min) && other.max.le(self.max)
    }

    /// The smallest box containing both `self` and `other`.
    #[must_use]
    pub fn extend(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Enlargement needed to extend `self` to also cover `other`:
    /// `size(self ∪ other) - size(self)`.
    #[must_use]
    pub fn enlargement(&self, other: &Self) -> f32 {
        let union = self.extend(other);
        let grown = union.size() - self.size();
        if grown.is_finite() {
            grown.max(0.0)
        } else {
            grown
        }
    }
}

impl Encode for BBox {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        self.min.encode_into(writer)?;
        self.max.encode_into(writer)?;
        Ok(())
    }
}

impl Decode for BBox {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let min = Point3::decode_from(reader)?;
        let max = Point3::decode_from(reader)?;
        Ok(Self { min, max })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersects_basic() {
        let a = BBox::new(Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 10.0, 10.0));
        let b = BBox::new(Point3::new(5.0, 5.0, 5.0), Point3::new(15.0, 15.0, 15.0));
        let c = BBox::new(Point3::new(20.0, 20.0, 20.0), Point3::new(30.0, 30.0, 30.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn enlargement_zero_when_contained() {
        let a = BBox::new(Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 10.0, 10.0));
        let b = BBox::new(Point3::new(2.0, 2.0, 2.0), Point3::new(3.0, 3.0, 3.0));
        assert_eq!(a.enlargement(&b), 0.0);
    }

    #[test]
    fn extend_grows_to_union() {
        let a = BBox::point(Point3::new(1.0, 1.0, 1.0));
        let b = BBox::point(Point3::new(5.0, -2.0, 9.0));
        let u = a.extend(&b);
        assert_eq!(u.min, Point3::new(1.0, -2.0, 1.0));
        assert_eq!(u.max, Point3::new(5.0, 1.0, 9.0));
    }
}
