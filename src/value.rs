// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The leaf-level payload: trajectory units, the packed leaf-entry record,
//! and the `ValueAccessor` trait that generalizes insertion/query/bulk-load
//! code over both raw tree entries and the bulk loader's pseudo-leaf
//! entries (see `bulk_load.rs`).

use std::io::{Read, Write};

use enum_dispatch::enum_dispatch;

use crate::coding::{Decode, Encode, EncodeError, LittleEndian, ReadBytesExt, WriteBytesExt};
use crate::error::Error;
use crate::geo::{BBox, Point3};

/// Identifies one trajectory across all of its units.
pub type TrajectoryId = u32;

/// Position of a unit within its trajectory's ordered sequence.
pub type UnitIndex = u32;

/// A numeric textual label (the string table mapping to/from this id is an
/// external collaborator, out of scope here).
pub type LabelId = u32;

/// A single line segment of a trajectory: a start and end point in
/// space-time plus one label.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryUnit {
    /// Start point.
    pub start: Point3,
    /// End point.
    pub end: Point3,
    /// The unit's label.
    pub label: LabelId,
}

impl TrajectoryUnit {
    /// Creates a new unit.
    #[must_use]
    pub fn new(start: Point3, end: Point3, label: LabelId) -> Self {
        Self { start, end, label }
    }

    /// The componentwise min/max bounding box of `start` and `end`.
    #[must_use]
    pub fn mbb(&self) -> BBox {
        BBox::new(self.start, self.end)
    }

    /// Whether this unit's bounding box intersects `rect`.
    #[must_use]
    pub fn intersects(&self, rect: &BBox) -> bool {
        self.mbb().intersects(rect)
    }
}

impl Encode for TrajectoryUnit {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        self.start.encode_into(writer)?;
        self.end.encode_into(writer)?;
        writer.write_u32::<LittleEndian>(self.label)?;
        Ok(())
    }
}

impl Decode for TrajectoryUnit {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let start = Point3::decode_from(reader)?;
        let end = Point3::decode_from(reader)?;
        let label = reader.read_u32::<LittleEndian>()?;
        Ok(Self { start, end, label })
    }
}

/// A leaf entry (`tree_entry`): uniquely identifies one unit within one
/// trajectory. Trivially byte-copyable; field order is fixed since it is
/// also the wire format for the external trajectory-entry stream (§6.2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeEntry {
    /// The trajectory this unit belongs to.
    pub trajectory_id: TrajectoryId,
    /// This unit's position within its trajectory.
    pub unit_index: UnitIndex,
    /// The unit's geometry and label.
    pub unit: TrajectoryUnit,
}

impl Encode for TreeEntry {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<LittleEndian>(self.trajectory_id)?;
        writer.write_u32::<LittleEndian>(self.unit_index)?;
        self.unit.encode_into(writer)?;
        Ok(())
    }
}

impl Decode for TreeEntry {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let trajectory_id = reader.read_u32::<LittleEndian>()?;
        let unit_index = reader.read_u32::<LittleEndian>()?;
        let unit = TrajectoryUnit::decode_from(reader)?;
        Ok(Self {
            trajectory_id,
            unit_index,
            unit,
        })
    }
}

/// Size in bytes of one packed `TreeEntry` record: `2*u32 + 2*(3*f32) + u32`.
pub const TREE_ENTRY_SIZE: usize = 4 + 4 + (4 * 3) + (4 * 3) + 4;

/// Generalizes over anything that can be inserted into (or summarized for)
/// an IRWI tree level: raw leaf entries during ordinary insertion, and
/// bulk load's pseudo-leaf entries once a lower level has been finished.
///
/// `TreeEntry` always has `total_count() == 1` and exactly one
/// `(label, 1)` pair; pseudo-leaf entries instead report a precomputed
/// subtree summary.
///
/// `label_counts` returns an owned `Vec` rather than an associated iterator
/// type: this trait is also implemented by the bulk loader's `LevelItem`
/// enum (`bulk_load.rs`) via `enum_dispatch`, which cannot delegate a
/// generic-associated-type method across variants, and one small
/// allocation per node-level value is immaterial next to the I/O it sits
/// beside.
#[enum_dispatch]
pub trait ValueAccessor {
    /// The trajectory id this value is (or summarizes) associated with.
    /// Meaningless for pseudo-leaf entries above the leaf level, where it is
    /// never read.
    fn id(&self) -> TrajectoryId;

    /// The value's bounding box.
    fn mbb(&self) -> BBox;

    /// Total number of leaf-level units this value represents (`1` for a
    /// raw `TreeEntry`, the subtree's unit count for a pseudo-leaf entry).
    fn total_count(&self) -> u64;

    /// Per-label unit counts this value contributes.
    fn label_counts(&self) -> Vec<(LabelId, u64)>;
}

impl ValueAccessor for TreeEntry {
    fn id(&self) -> TrajectoryId {
        self.trajectory_id
    }

    fn mbb(&self) -> BBox {
        self.unit.mbb()
    }

    fn total_count(&self) -> u64 {
        1
    }

    fn label_counts(&self) -> Vec<(LabelId, u64)> {
        vec![(self.unit.label, 1)]
    }
}
