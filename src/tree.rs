// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The tree-state facade (C5): the public `Tree<F>` type that ties
//! [`crate::node::NodeStorage`] to a fixed β weight and exposes insertion,
//! bulk load, and sequenced queries as one coherent API.
//! Opened/created exclusively via [`crate::config::TreeParams`], which
//! validates the persisted header before handing back an instance.

use std::path::PathBuf;

use crate::block_store::BlockHandle;
use crate::bulk_load;
use crate::config::TreeHeader;
use crate::cost::Beta;
use crate::error::Error;
use crate::fs::{FileSystem, StdFileSystem};
use crate::insertion::{self, TreeCounters};
use crate::io_stats::IoStats;
use crate::node::NodeStorage;
use crate::query::{self, SequencedQuery, TrajectoryMatch};
use crate::value::TreeEntry;

/// A disk-resident IRWI tree: node storage plus its persisted header and
/// fixed cost weight β.
///
/// Created or opened through [`crate::config::TreeParams`]; never
/// constructed directly by callers outside this crate.
pub struct Tree<F: FileSystem = StdFileSystem> {
    dir: PathBuf,
    storage: NodeStorage<F>,
    header: TreeHeader,
    beta: Beta,
}

impl<F: FileSystem> Tree<F> {
    pub(crate) fn new(dir: PathBuf, storage: NodeStorage<F>, header: TreeHeader, beta: Beta) -> Self {
        Self {
            dir,
            storage,
            header,
            beta,
        }
    }

    /// The directory this tree is persisted in.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.dir
    }

    /// Total number of leaf-level units ever inserted.
    #[must_use]
    pub fn size(&self) -> u64 {
        TreeCounters::size(&self.header)
    }

    /// Tree height: `0` empty, `1` a single leaf root, `>= 2` an internal
    /// root.
    #[must_use]
    pub fn height(&self) -> u64 {
        TreeCounters::height(&self.header)
    }

    /// Number of leaf nodes currently in the tree.
    #[must_use]
    pub fn leaf_count(&self) -> u64 {
        TreeCounters::leaf_count(&self.header)
    }

    /// Number of internal nodes currently in the tree.
    #[must_use]
    pub fn internal_count(&self) -> u64 {
        TreeCounters::internal_count(&self.header)
    }

    /// Whether the tree currently holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// The root node's block handle.
    ///
    /// # Errors
    /// [`Error::EmptyTree`] if `height() == 0`.
    pub fn root(&self) -> crate::Result<BlockHandle> {
        TreeCounters::root(&self.header).ok_or(Error::EmptyTree)
    }

    /// Running byte/block I/O counters for this tree's block store.
    #[must_use]
    pub fn io_stats(&self) -> &IoStats {
        self.storage.store_mut_shared().io_stats()
    }

    /// Inserts one trajectory unit's leaf entry, descending, splitting, and
    /// propagating index/MBB updates as needed (C6).
    ///
    /// # Errors
    /// I/O errors from the underlying block store. Invariant violations
    /// (e.g. a corrupted on-disk node) are fatal assertions, not returned
    /// errors.
    pub fn insert(&mut self, entry: TreeEntry) -> crate::Result<()> {
        let _scope = crate::io_stats::scope("insert");
        insertion::insert_entry(&mut self.storage, &mut self.header, self.beta, entry)
    }

    /// Inserts every entry from `entries` one at a time, in iteration
    /// order.
    ///
    /// # Errors
    /// See [`Self::insert`].
    pub fn insert_all<I: IntoIterator<Item = TreeEntry>>(&mut self, entries: I) -> crate::Result<()> {
        for entry in entries {
            self.insert(entry)?;
        }
        Ok(())
    }

    /// Bulk-loads `entries` into this tree via QuickLoad (C7): a bounded
    /// in-memory mini-tree plus external overflow buckets, built bottom-up
    /// level by level.
    ///
    /// # Errors
    /// [`Error::InvalidParams`] if `max_leaves < 2` or this tree is
    /// non-empty (bulk load requires a fresh target).
    pub fn bulk_load<I: IntoIterator<Item = TreeEntry>>(&mut self, max_leaves: usize, entries: I) -> crate::Result<()> {
        bulk_load::bulk_load(&mut self.storage, &mut self.header, self.beta, max_leaves, entries)
    }

    /// Evaluates a sequenced query (C8): multi-stage pruning
    /// by MBB, label postings, and trajectory-id-set intersection,
    /// followed by a per-leaf filter and the temporal-ordering check.
    ///
    /// Returns an empty list, not an error, when no trajectory matches.
    ///
    /// # Errors
    /// I/O errors from the underlying block store.
    ///
    /// # Panics
    /// Asserts `query` is non-empty.
    pub fn query(&mut self, query: &SequencedQuery) -> crate::Result<Vec<TrajectoryMatch>> {
        query::run_query(&mut self.storage, &self.header, query)
    }

    /// Flushes every dirty block and persists the header, in that order,
    /// so that either the prior or the new state is fully visible on
    /// reopen.
    ///
    /// # Errors
    /// I/O errors from the underlying block store or header file.
    pub fn flush(&mut self) -> crate::Result<()> {
        self.storage.store_mut().flush()?;
        self.header.write::<F>(&self.dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeParams;
    use crate::geo::{BBox, Point3};
    use crate::query::SimpleQuery;
    use crate::value::TrajectoryUnit;
    use std::collections::HashSet;

    fn entry(tid: u32, idx: u32, x: f32, label: u32) -> TreeEntry {
        TreeEntry {
            trajectory_id: tid,
            unit_index: idx,
            unit: TrajectoryUnit::new(Point3::new(x, 0.0, idx as f32), Point3::new(x + 1.0, 1.0, idx as f32 + 1.0), label),
        }
    }

    #[test]
    fn empty_tree_reports_zero_size_and_height() {
        let dir = tempfile::tempdir().unwrap();
        let tree = TreeParams::new().block_size(512).create::<StdFileSystem>(dir.path()).unwrap();
        assert_eq!(tree.size(), 0);
        assert_eq!(tree.height(), 0);
        assert!(tree.is_empty());
        assert!(matches!(tree.root(), Err(Error::EmptyTree)));
    }

    #[test]
    fn single_entry_tree_is_a_one_leaf_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = TreeParams::new().block_size(512).create::<StdFileSystem>(dir.path()).unwrap();
        tree.insert(entry(1, 0, 0.0, 7)).unwrap();
        assert_eq!(tree.size(), 1);
        assert_eq!(tree.height(), 1);
        assert!(tree.root().is_ok());
    }

    #[test]
    fn flush_then_reopen_preserves_observable_state() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut tree = TreeParams::new().block_size(512).create::<StdFileSystem>(dir.path()).unwrap();
            for i in 0..20u32 {
                tree.insert(entry(i, 0, i as f32, i % 3)).unwrap();
            }
            tree.flush().unwrap();
        }

        let mut reopened = TreeParams::new().block_size(512).open::<StdFileSystem>(dir.path()).unwrap();
        assert_eq!(reopened.size(), 20);

        let q = vec![SimpleQuery::new(
            BBox::new(Point3::new(0.0, 0.0, 0.0), Point3::new(25.0, 1.0, 1.0)),
            HashSet::from([0u32]),
        )];
        let results = reopened.query(&q).unwrap();
        assert!(!results.is_empty());
    }

    #[test]
    fn bulk_load_into_fresh_tree_matches_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = TreeParams::new().block_size(512).create::<StdFileSystem>(dir.path()).unwrap();
        let entries: Vec<TreeEntry> = (0..30u32).map(|i| entry(i, 0, i as f32, i % 4)).collect();
        tree.bulk_load(4, entries).unwrap();
        assert_eq!(tree.size(), 30);
    }
}
