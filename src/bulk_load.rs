// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! QuickLoad bulk loading (C7): builds a fresh IRWI tree
//! bottom-up from a stream of leaf entries, rather than inserting them one
//! at a time.
//!
//! Each level pass runs ordinary insertion (`insertion.rs`) against a small
//! in-memory mini-tree ([`MiniTree`]/[`MiniTreeState`]) until it reaches
//! `max_leaves` leaves. If the input is exhausted first, every mini-tree
//! leaf is flushed directly as a finished real node. Otherwise the
//! mini-tree's structure is frozen and every remaining value is routed
//! (read-only descent, no further mutation) to the leaf it would land in;
//! values landing in the same leaf accumulate in an on-disk [`Bucket`]
//! seeded with that leaf's original members. Once the input is exhausted,
//! leaves with no bucket are flushed directly; leaves with a bucket recurse
//! through this same level-pass algorithm over the bucket's contents (a
//! FIFO work queue keeps recursion order deterministic). Higher levels
//! repeat the process, treating each finished node from the level below as
//! one pseudo-leaf entry ([`LevelItem::Node`]), until a single root remains.

use std::collections::VecDeque;
use std::io::Read;
use std::path::PathBuf;

use enum_dispatch::enum_dispatch;
use rustc_hash::FxHashMap;

use crate::alloc::IdAllocator;
use crate::block_store::BlockHandle;
use crate::coding::{Decode, Encode, LittleEndian, ReadBytesExt, WriteBytesExt};
use crate::config::TreeHeader;
use crate::cost::Beta;
use crate::error::Error;
use crate::fs::FileSystem;
use crate::geo::BBox;
use crate::insertion::{self, NodeAccess, TreeCounters};
use crate::inverted_index::InvertedIndex;
use crate::node::{InternalEntry, LeafNode, NodeStorage};
use crate::summary::{self, Summarizable, Summary};
use crate::value::{LabelId, TrajectoryId, TreeEntry, ValueAccessor};

/// A finished subtree produced by one level pass: where it lives on the real
/// tree, its bounding box, and its precomputed aggregate summary. Acts as a
/// pseudo-leaf entry for the next level pass up.
#[derive(Debug, Clone)]
struct FinishedNode {
    handle: BlockHandle,
    mbb: BBox,
    summary: Summary,
}

impl ValueAccessor for FinishedNode {
    fn id(&self) -> TrajectoryId {
        0
    }

    fn mbb(&self) -> BBox {
        self.mbb
    }

    fn total_count(&self) -> u64 {
        self.summary.total_count
    }

    fn label_counts(&self) -> Vec<(LabelId, u64)> {
        self.summary.label_counts()
    }
}

/// One mini-tree leaf-level value: either a raw entry (the bottom-most
/// pass) or an already-finished node from the pass below.
#[enum_dispatch(ValueAccessor)]
#[derive(Debug, Clone)]
enum LevelItem {
    Entry(TreeEntry),
    Node(FinishedNode),
}

impl Summarizable for LevelItem {
    fn contribution(&self, lambda: usize) -> Summary {
        match self {
            Self::Entry(e) => e.contribution(lambda),
            Self::Node(n) => n.summary.clone(),
        }
    }
}

fn encode_level_item_bytes(item: &LevelItem) -> Vec<u8> {
    let mut buf = Vec::new();
    match item {
        LevelItem::Entry(e) => {
            buf.push(0);
            buf.extend(e.encode_into_vec());
        }
        LevelItem::Node(n) => {
            buf.push(1);
            buf.extend(n.handle.to_le_bytes());
            buf.extend(n.mbb.encode_into_vec());
            buf.extend(n.summary.encode_into_vec());
        }
    }
    buf
}

fn decode_level_item<R: Read>(reader: &mut R, lambda: usize) -> crate::Result<LevelItem> {
    let mut tag = [0u8; 1];
    reader.read_exact(&mut tag)?;
    match tag[0] {
        0 => Ok(LevelItem::Entry(TreeEntry::decode_from(reader)?)),
        1 => {
            let mut handle_buf = [0u8; 8];
            reader.read_exact(&mut handle_buf)?;
            let handle = u64::from_le_bytes(handle_buf);
            let mbb = BBox::decode_from(reader)?;
            let node_summary = summary::decode_summary(reader, lambda)?;
            Ok(LevelItem::Node(FinishedNode {
                handle,
                mbb,
                summary: node_summary,
            }))
        }
        other => Err(Error::InvalidParams(format!(
            "unknown bulk-load bucket record tag {other}"
        ))),
    }
}

/// One arena slot of the in-memory mini-tree.
enum MiniNode {
    Leaf(Vec<LevelItem>),
    Internal(InvertedIndex, Vec<InternalEntry>),
}

/// A small, bounded in-memory tree scaffold that reuses the ordinary
/// insertion engine ([`NodeAccess`]) to route values during one level pass,
/// without ever touching the real on-disk tree. Handles are arena indices
/// into `nodes`, and an internal node's `index_ref` is simply its own
/// handle (index and entries live in the same arena slot).
struct MiniTree {
    nodes: Vec<MiniNode>,
    fanout_internal: usize,
    fanout_leaf: usize,
    lambda: usize,
}

impl MiniTree {
    fn new(fanout_internal: usize, fanout_leaf: usize, lambda: usize) -> Self {
        Self {
            nodes: Vec::new(),
            fanout_internal,
            fanout_leaf,
            lambda,
        }
    }

    /// Every leaf handle, left-to-right, for the tree rooted as described by
    /// `state`. An empty tree yields no leaves.
    fn leaf_handles(&self, state: &MiniTreeState) -> Vec<BlockHandle> {
        let Some(root) = TreeCounters::root(state) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        self.collect_leaves(root, state.height, &mut out);
        out
    }

    fn collect_leaves(&self, handle: BlockHandle, remaining_height: u64, out: &mut Vec<BlockHandle>) {
        if remaining_height <= 1 {
            out.push(handle);
            return;
        }
        if let MiniNode::Internal(_, entries) = &self.nodes[handle as usize] {
            for entry in entries {
                self.collect_leaves(entry.child, remaining_height - 1, out);
            }
        }
    }
}

impl NodeAccess for MiniTree {
    type LeafValue = LevelItem;

    fn alloc_leaf(&mut self) -> crate::Result<BlockHandle> {
        self.nodes.push(MiniNode::Leaf(Vec::new()));
        Ok((self.nodes.len() - 1) as u64)
    }

    fn alloc_internal(&mut self) -> crate::Result<BlockHandle> {
        self.nodes.push(MiniNode::Internal(InvertedIndex::new(self.lambda), Vec::new()));
        Ok((self.nodes.len() - 1) as u64)
    }

    fn read_leaf_values(&mut self, handle: BlockHandle) -> crate::Result<Vec<LevelItem>> {
        match &self.nodes[handle as usize] {
            MiniNode::Leaf(values) => Ok(values.clone()),
            MiniNode::Internal(..) => unreachable!("handle does not name a mini-tree leaf"),
        }
    }

    fn write_leaf_values(&mut self, handle: BlockHandle, values: &[LevelItem]) -> crate::Result<()> {
        match &mut self.nodes[handle as usize] {
            MiniNode::Leaf(slot) => {
                *slot = values.to_vec();
                Ok(())
            }
            MiniNode::Internal(..) => unreachable!("handle does not name a mini-tree leaf"),
        }
    }

    fn read_internal(&mut self, handle: BlockHandle) -> crate::Result<crate::node::InternalNode> {
        match &self.nodes[handle as usize] {
            MiniNode::Internal(_, entries) => Ok(crate::node::InternalNode {
                index_ref: handle,
                entries: entries.clone(),
            }),
            MiniNode::Leaf(_) => unreachable!("handle does not name a mini-tree internal node"),
        }
    }

    fn write_internal(&mut self, handle: BlockHandle, node: &crate::node::InternalNode) -> crate::Result<()> {
        match &mut self.nodes[handle as usize] {
            MiniNode::Internal(_, entries) => {
                *entries = node.entries.clone();
                Ok(())
            }
            MiniNode::Leaf(_) => unreachable!("handle does not name a mini-tree internal node"),
        }
    }

    fn read_index(&mut self, index_ref: BlockHandle) -> crate::Result<InvertedIndex> {
        match &self.nodes[index_ref as usize] {
            MiniNode::Internal(index, _) => Ok(index.clone()),
            MiniNode::Leaf(_) => unreachable!("index_ref does not name a mini-tree internal node"),
        }
    }

    fn write_index(&mut self, index_ref: BlockHandle, index: &InvertedIndex) -> crate::Result<()> {
        match &mut self.nodes[index_ref as usize] {
            MiniNode::Internal(slot, _) => {
                *slot = index.clone();
                Ok(())
            }
            MiniNode::Leaf(_) => unreachable!("index_ref does not name a mini-tree internal node"),
        }
    }

    fn fanout_internal(&self) -> usize {
        self.fanout_internal
    }

    fn fanout_leaf(&self) -> usize {
        self.fanout_leaf
    }

    fn lambda(&self) -> usize {
        self.lambda
    }
}

/// The mini-tree's own root/height/leaf_count/internal_count, tracked the
/// same way the real tree's header is.
#[derive(Debug, Clone, Copy, Default)]
struct MiniTreeState {
    root: Option<BlockHandle>,
    height: u64,
    size: u64,
    leaf_count: u64,
    internal_count: u64,
}

impl TreeCounters for MiniTreeState {
    fn root(&self) -> Option<BlockHandle> {
        self.root
    }

    fn set_root(&mut self, handle: BlockHandle) {
        self.root = Some(handle);
    }

    fn height(&self) -> u64 {
        self.height
    }

    fn set_height(&mut self, height: u64) {
        self.height = height;
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    fn set_leaf_count(&mut self, count: u64) {
        self.leaf_count = count;
    }

    fn internal_count(&self) -> u64 {
        self.internal_count
    }

    fn set_internal_count(&mut self, count: u64) {
        self.internal_count = count;
    }
}

/// Finds the leaf `value` would land in under the mini-tree's current
/// (frozen) structure, without mutating anything: once frozen, routing
/// decisions use the structure exactly as it stood at freeze time.
fn simulate_insert(mini: &mut MiniTree, state: &MiniTreeState, beta: Beta, value: &LevelItem) -> crate::Result<BlockHandle> {
    let mut cur = state.root.expect("simulate_insert requires a non-empty mini-tree");
    for _ in 1..state.height {
        let internal = mini.read_internal(cur)?;
        let index = mini.read_index(internal.index_ref)?;
        let ci = insertion::choose_child(&index, &internal, value, beta);
        cur = internal.entries[ci].child;
    }
    Ok(cur)
}

/// An ephemeral on-disk bucket of overflow values for one frozen mini-tree
/// leaf. Named via a plain incrementing id from an [`IdAllocator`] rather
/// than the tree's own [`FileSystem`] abstraction: buckets are purely
/// internal scratch space, created and removed entirely within one
/// `bulk_load` call, not part of the persisted, pluggable tree directory.
struct Bucket {
    path: PathBuf,
}

impl Bucket {
    fn append(&self, items: &[LevelItem]) -> crate::Result<()> {
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
        for item in items {
            let bytes = encode_level_item_bytes(item);
            #[allow(clippy::cast_possible_truncation)]
            file.write_u32::<LittleEndian>(bytes.len() as u32)?;
            file.write_all(&bytes)?;
        }
        Ok(())
    }

    fn read_all(&self, lambda: usize) -> crate::Result<Vec<LevelItem>> {
        let mut file = std::fs::File::open(&self.path)?;
        let mut out = Vec::new();
        loop {
            let mut len_buf = [0u8; 4];
            match file.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut buf = vec![0u8; len];
            file.read_exact(&mut buf)?;
            out.push(decode_level_item(&mut std::io::Cursor::new(buf), lambda)?);
        }
        Ok(out)
    }

    fn remove(&self) -> crate::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Hands out bucket files under one shared temp directory, auto-removed
/// when it drops at the end of the level pass that created it.
struct BucketStore {
    dir: tempfile::TempDir,
    ids: IdAllocator,
}

impl BucketStore {
    fn new() -> crate::Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
            ids: IdAllocator::new(),
        })
    }

    fn create(&mut self) -> crate::Result<Bucket> {
        let id = self.ids.alloc()?;
        Ok(Bucket {
            path: self.dir.path().join(format!("bucket-{id}.tmp")),
        })
    }
}

fn flush_leaf_level<F: FileSystem>(
    storage: &mut NodeStorage<F>,
    header: &mut TreeHeader,
    lambda: usize,
    items: &[LevelItem],
) -> crate::Result<FinishedNode> {
    let entries: Vec<TreeEntry> = items
        .iter()
        .map(|item| match item {
            LevelItem::Entry(e) => *e,
            LevelItem::Node(_) => unreachable!("leaf-level pass only ever holds raw entries"),
        })
        .collect();

    let handle = storage.alloc_leaf()?;
    storage.write_leaf(handle, &LeafNode { entries: entries.clone() })?;
    header.set_leaf_count(header.leaf_count() + 1);

    let mbb = entries
        .iter()
        .map(ValueAccessor::mbb)
        .reduce(|a, b| a.extend(&b))
        .expect("flush is only ever called with at least one entry");
    let node_summary = Summary::from_entries(&entries, lambda);

    Ok(FinishedNode {
        handle,
        mbb,
        summary: node_summary,
    })
}

fn flush_internal_level<F: FileSystem>(
    storage: &mut NodeStorage<F>,
    header: &mut TreeHeader,
    lambda: usize,
    items: &[LevelItem],
) -> crate::Result<FinishedNode> {
    let children: Vec<&FinishedNode> = items
        .iter()
        .map(|item| match item {
            LevelItem::Node(n) => n,
            LevelItem::Entry(_) => unreachable!("higher-level passes only ever hold finished nodes"),
        })
        .collect();

    let handle = storage.alloc_internal()?;
    let mut node = storage.read_internal(handle)?;
    let mut index = storage.read_index(node.index_ref)?;

    for (i, child) in children.iter().enumerate() {
        node.entries.push(InternalEntry {
            mbb: child.mbb,
            child: child.handle,
        });
        #[allow(clippy::cast_possible_truncation)]
        insertion::append_child_summary(&mut index, i as u32, &child.summary);
    }
    storage.write_internal(handle, &node)?;
    storage.write_index(node.index_ref, &index)?;
    header.set_internal_count(header.internal_count() + 1);

    let mbb = children
        .iter()
        .map(|c| c.mbb)
        .reduce(|a, b| a.extend(&b))
        .expect("flush is only ever called with at least one child");
    let node_summary = Summary::from_index(&index, lambda);

    Ok(FinishedNode {
        handle,
        mbb,
        summary: node_summary,
    })
}

/// Runs one level pass (the four-step fill/freeze/route/recurse algorithm)
/// over `input`,
/// returning the finished nodes it produced. `group_fanout` is the mini-tree
/// leaf fanout: `fanout_leaf` for the bottom pass (grouping raw entries
/// into real leaves), `fanout_internal` for every pass above it (grouping
/// pseudo-leaf entries into real internal nodes' children).
#[allow(clippy::too_many_arguments)]
fn level_pass<F: FileSystem>(
    storage: &mut NodeStorage<F>,
    header: &mut TreeHeader,
    beta: Beta,
    lambda: usize,
    mini_fanout_internal: usize,
    group_fanout: usize,
    max_leaves: usize,
    input: impl IntoIterator<Item = LevelItem>,
    is_leaf_level: bool,
) -> crate::Result<Vec<FinishedNode>> {
    let _scope = crate::io_stats::scope(if is_leaf_level {
        "bulk_load::leaf_pass"
    } else {
        "bulk_load::internal_pass"
    });

    let mut mini = MiniTree::new(mini_fanout_internal, group_fanout, lambda);
    let mut state = MiniTreeState::default();
    let mut input = input.into_iter().peekable();

    while (state.leaf_count as usize) < max_leaves {
        match input.next() {
            Some(value) => insertion::insert_entry(&mut mini, &mut state, beta, value)?,
            None => break,
        }
    }
    let exhausted = input.peek().is_none();

    if exhausted {
        let mut finished = Vec::new();
        for leaf in mini.leaf_handles(&state) {
            let values = mini.read_leaf_values(leaf)?;
            if !values.is_empty() {
                finished.push(if is_leaf_level {
                    flush_leaf_level(storage, header, lambda, &values)?
                } else {
                    flush_internal_level(storage, header, lambda, &values)?
                });
            }
        }
        return Ok(finished);
    }

    let mut bucket_store = BucketStore::new()?;
    let mut bucket_for_leaf: FxHashMap<BlockHandle, Bucket> = FxHashMap::default();
    let mut bucket_order: Vec<BlockHandle> = Vec::new();

    for value in input {
        let leaf = simulate_insert(&mut mini, &state, beta, &value)?;
        if !bucket_for_leaf.contains_key(&leaf) {
            let bucket = bucket_store.create()?;
            let seed = mini.read_leaf_values(leaf)?;
            bucket.append(&seed)?;
            bucket_for_leaf.insert(leaf, bucket);
            bucket_order.push(leaf);
        }
        bucket_for_leaf
            .get(&leaf)
            .expect("bucket created just above")
            .append(std::slice::from_ref(&value))?;
    }

    let mut finished = Vec::new();
    for leaf in mini.leaf_handles(&state) {
        if bucket_for_leaf.contains_key(&leaf) {
            continue;
        }
        let values = mini.read_leaf_values(leaf)?;
        if !values.is_empty() {
            finished.push(if is_leaf_level {
                flush_leaf_level(storage, header, lambda, &values)?
            } else {
                flush_internal_level(storage, header, lambda, &values)?
            });
        }
    }

    let mut queue: VecDeque<Bucket> = bucket_order
        .into_iter()
        .map(|h| bucket_for_leaf.remove(&h).expect("bucket created for every queued leaf"))
        .collect();

    while let Some(bucket) = queue.pop_front() {
        let items = bucket.read_all(lambda)?;
        bucket.remove()?;
        let recursed = level_pass(
            storage,
            header,
            beta,
            lambda,
            mini_fanout_internal,
            group_fanout,
            max_leaves,
            items,
            is_leaf_level,
        )?;
        finished.extend(recursed);
    }

    Ok(finished)
}

/// Builds a fresh IRWI tree bottom-up from a stream of leaf entries (C7),
/// writing directly into `storage` and attaching the result
/// (root handle, height, size) to `header`.
///
/// Runs the leaf-level pass first, then repeats higher-level passes (each
/// treating the previous pass's finished nodes as pseudo-leaf entries)
/// until a single root node remains.
///
/// # Errors
/// [`Error::InvalidParams`] if `max_leaves < 2`, or if `header` already
/// names a root (bulk load requires an empty target tree).
pub fn bulk_load<F, I>(storage: &mut NodeStorage<F>, header: &mut TreeHeader, beta: Beta, max_leaves: usize, entries: I) -> crate::Result<()>
where
    F: FileSystem,
    I: IntoIterator<Item = TreeEntry>,
{
    if max_leaves < 2 {
        return Err(Error::InvalidParams(format!("max_leaves must be > 1, got {max_leaves}")));
    }
    if TreeCounters::root(header).is_some() {
        return Err(Error::InvalidParams("bulk_load requires an empty target tree".into()));
    }

    let _scope = crate::io_stats::scope("bulk_load");
    let lambda = storage.lambda();
    let fanout_leaf = storage.fanout_leaf();
    let fanout_internal = storage.fanout_internal();

    let mut nodes = level_pass(
        storage,
        header,
        beta,
        lambda,
        fanout_internal,
        fanout_leaf,
        max_leaves,
        entries.into_iter().map(LevelItem::Entry),
        true,
    )?;
    let mut height: u64 = u64::from(!nodes.is_empty());

    while nodes.len() > 1 {
        log::debug!("bulk load: {} nodes at height {height}, starting another pass", nodes.len());
        nodes = level_pass(
            storage,
            header,
            beta,
            lambda,
            fanout_internal,
            fanout_internal,
            max_leaves,
            nodes.into_iter().map(LevelItem::Node),
            false,
        )?;
        height += 1;
    }

    if let Some(root) = nodes.into_iter().next() {
        log::debug!("bulk load finished: root {} at height {height}, size {}", root.handle, root.summary.total_count);
        header.set_root(root.handle);
        header.set_height(height);
        header.set_size(root.summary.total_count);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_store::BlockStore;
    use crate::fs::StdFileSystem;
    use crate::geo::Point3;
    use crate::value::TrajectoryUnit;

    fn storage(block_size: u64, lambda: usize) -> NodeStorage<StdFileSystem> {
        let dir = Box::leak(Box::new(tempfile::tempdir().unwrap()));
        let store = BlockStore::<StdFileSystem>::create(dir.path(), block_size, 32).unwrap();
        NodeStorage::new(
            store,
            crate::node::fanout_internal(block_size),
            crate::node::fanout_leaf(block_size),
            lambda,
        )
    }

    fn entry(id: u32, x: f32, label: u32) -> TreeEntry {
        TreeEntry {
            trajectory_id: id,
            unit_index: 0,
            unit: TrajectoryUnit::new(Point3::new(x, 0.0, 0.0), Point3::new(x + 1.0, 1.0, 1.0), label),
        }
    }

    #[test]
    fn rejects_max_leaves_below_two() {
        let mut storage = storage(256, 4);
        let mut header = TreeHeader::fresh(256, 4, storage.fanout_internal(), storage.fanout_leaf());
        let err = bulk_load(&mut storage, &mut header, Beta::default(), 1, vec![entry(0, 0.0, 1)]).unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[test]
    fn rejects_non_empty_target_tree() {
        let mut storage = storage(256, 4);
        let mut header = TreeHeader::fresh(256, 4, storage.fanout_internal(), storage.fanout_leaf());
        insertion::insert_entry(&mut storage, &mut header, Beta::default(), entry(0, 0.0, 1)).unwrap();
        let err = bulk_load(&mut storage, &mut header, Beta::default(), 4, vec![entry(1, 1.0, 1)]).unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[test]
    fn bulk_load_of_empty_input_stays_empty() {
        let mut storage = storage(256, 4);
        let mut header = TreeHeader::fresh(256, 4, storage.fanout_internal(), storage.fanout_leaf());
        bulk_load(&mut storage, &mut header, Beta::default(), 4, Vec::new()).unwrap();
        assert_eq!(header.height(), 0);
        assert_eq!(header.size(), 0);
    }

    #[test]
    fn bulk_load_fits_in_a_single_leaf() {
        let mut storage = storage(256, 4);
        let mut header = TreeHeader::fresh(256, 4, storage.fanout_internal(), storage.fanout_leaf());
        let entries: Vec<TreeEntry> = (0..5u32).map(|i| entry(i, i as f32, i % 2)).collect();
        bulk_load(&mut storage, &mut header, Beta::default(), 8, entries).unwrap();
        assert_eq!(header.height(), 1);
        assert_eq!(header.size(), 5);
    }

    #[test]
    fn bulk_load_builds_a_multi_level_tree_matching_incremental_insertion_size() {
        let mut storage = storage(96, 4); // small block -> tiny fanout, forces multiple passes
        let mut header = TreeHeader::fresh(96, 4, storage.fanout_internal(), storage.fanout_leaf());
        let entries: Vec<TreeEntry> = (0..80u32).map(|i| entry(i, i as f32, i % 5)).collect();
        bulk_load(&mut storage, &mut header, Beta::default(), 3, entries).unwrap();

        assert_eq!(header.size(), 80);
        assert!(header.height() >= 2, "80 entries into a tiny-fanout tree should need more than one level");
        assert!(TreeCounters::root(&header).is_some());
    }
}
