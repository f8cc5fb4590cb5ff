// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Aggregated `(count, id-set)` summaries keyed by label, shared by the
//! insertion engine's split/propagation bookkeeping (`insertion.rs`) and the
//! bulk loader's pseudo-leaf subtree descriptions (`bulk_load.rs`): the
//! per-node summary sidecar carried alongside a subtree's MBB whenever it
//! is reassigned during a split or attached under a new parent.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::coding::{Decode, Encode, EncodeError, LittleEndian, ReadBytesExt, WriteBytesExt};
use crate::error::Error;
use crate::id_set::{decode_id_set, IdSet};
use crate::inverted_index::InvertedIndex;
use crate::value::{LabelId, TreeEntry};

/// A subtree's (or a partitioned half's) aggregate: total unit count and id
/// set, plus the same per label.
#[derive(Debug, Clone)]
pub struct Summary {
    /// Total number of leaf-level units summarized.
    pub total_count: u64,
    /// Union of every summarized unit's trajectory id.
    pub total_ids: IdSet,
    /// Per-label `(count, ids)`, only for labels with at least one unit.
    pub labels: BTreeMap<LabelId, (u64, IdSet)>,
}

impl Summary {
    /// An empty summary over id sets bounded to `lambda`.
    #[must_use]
    pub fn empty(lambda: usize) -> Self {
        Self {
            total_count: 0,
            total_ids: IdSet::new(lambda),
            labels: BTreeMap::new(),
        }
    }

    /// Adds one leaf-level unit's contribution.
    pub fn add(&mut self, label: LabelId, trajectory_id: u32, lambda: usize) {
        self.total_count += 1;
        self.total_ids.insert(trajectory_id);
        let entry = self
            .labels
            .entry(label)
            .or_insert_with(|| (0, IdSet::new(lambda)));
        entry.0 += 1;
        entry.1.insert(trajectory_id);
    }

    /// Summarizes a slice of raw leaf entries.
    #[must_use]
    pub fn from_entries(entries: &[TreeEntry], lambda: usize) -> Self {
        let mut s = Self::empty(lambda);
        for e in entries {
            s.add(e.unit.label, e.trajectory_id, lambda);
        }
        s
    }

    /// Dense `(label, count)` pairs, for cost-function consumption via
    /// [`crate::value::ValueAccessor`].
    #[must_use]
    pub fn label_counts(&self) -> Vec<(LabelId, u64)> {
        self.labels.iter().map(|(&l, &(c, _))| (l, c)).collect()
    }

    /// Derives an internal node's own summary from its inverted index's
    /// `total` list and per-label lists, for propagating a finished
    /// subtree's aggregate up to its parent (bulk load's pseudo-leaf entries,
    /// whole-subtree insertion).
    #[must_use]
    pub fn from_index(index: &InvertedIndex, lambda: usize) -> Self {
        let total = index.total().summarize(lambda);
        let labels = index
            .iter()
            .map(|(label, list)| {
                let s = list.summarize(lambda);
                (label, (s.count, s.ids))
            })
            .collect();
        Self {
            total_count: total.count,
            total_ids: total.ids,
            labels,
        }
    }
}

/// Something that can report its own aggregate contribution to a parent's
/// summary: a raw leaf entry (always a single unit under one label) or a
/// bulk loader's pseudo-leaf entry (an already-finished subtree's true
/// summary, carried rather than re-derived).
pub trait Summarizable {
    /// This value's contribution, as a standalone summary.
    fn contribution(&self, lambda: usize) -> Summary;
}

impl Summarizable for TreeEntry {
    fn contribution(&self, lambda: usize) -> Summary {
        let mut s = Summary::empty(lambda);
        s.add(self.unit.label, self.trajectory_id, lambda);
        s
    }
}

impl Encode for Summary {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<LittleEndian>(self.total_count)?;
        self.total_ids.encode_into(writer)?;
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32::<LittleEndian>(self.labels.len() as u32)?;
        for (&label, (count, ids)) in &self.labels {
            writer.write_u32::<LittleEndian>(label)?;
            writer.write_u64::<LittleEndian>(*count)?;
            ids.encode_into(writer)?;
        }
        Ok(())
    }
}

/// Decodes a summary, given the tree-wide id-set capacity. Used by the bulk
/// loader to persist pseudo-leaf entries (already-finished subtrees) to
/// overflow buckets (`bulk_load.rs`).
pub fn decode_summary<R: Read>(reader: &mut R, lambda: usize) -> Result<Summary, Error> {
    let total_count = reader.read_u64::<LittleEndian>()?;
    let total_ids = decode_id_set(reader, lambda)?;
    let label_count = reader.read_u32::<LittleEndian>()?;
    let mut labels = BTreeMap::new();
    for _ in 0..label_count {
        let label = reader.read_u32::<LittleEndian>()?;
        let count = reader.read_u64::<LittleEndian>()?;
        let ids = decode_id_set(reader, lambda)?;
        labels.insert(label, (count, ids));
    }
    Ok(Summary {
        total_count,
        total_ids,
        labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Point3;
    use crate::value::TrajectoryUnit;

    #[test]
    fn from_entries_aggregates_labels_and_ids() {
        let entries = vec![
            TreeEntry {
                trajectory_id: 1,
                unit_index: 0,
                unit: TrajectoryUnit::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0), 7),
            },
            TreeEntry {
                trajectory_id: 2,
                unit_index: 0,
                unit: TrajectoryUnit::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0), 7),
            },
        ];
        let summary = Summary::from_entries(&entries, 4);
        assert_eq!(summary.total_count, 2);
        assert!(summary.total_ids.contains(1) && summary.total_ids.contains(2));
        let (count, ids) = &summary.labels[&7];
        assert_eq!(*count, 2);
        assert!(ids.contains(1) && ids.contains(2));
    }

    #[test]
    fn from_index_mirrors_postings_totals() {
        use crate::posting::Posting;

        let mut index = InvertedIndex::new(4);
        index
            .total_mut()
            .append(Posting::new(0, 2, crate::id_set::IdSet::singleton(4, 5)));
        index
            .find_or_create(9)
            .append(Posting::new(0, 2, crate::id_set::IdSet::singleton(4, 5)));

        let summary = Summary::from_index(&index, 4);
        assert_eq!(summary.total_count, 2);
        assert!(summary.total_ids.contains(5));
        assert_eq!(summary.labels[&9].0, 2);
    }

    #[test]
    fn tree_entry_contribution_is_a_single_unit() {
        let e = TreeEntry {
            trajectory_id: 3,
            unit_index: 0,
            unit: TrajectoryUnit::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0), 2),
        };
        let s = e.contribution(4);
        assert_eq!(s.total_count, 1);
        assert_eq!(s.labels[&2].0, 1);
    }
}
