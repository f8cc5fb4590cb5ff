// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Typed node storage (C4): internal/leaf node layout, fanout derivation,
//! and the block-chain backing for each internal node's inverted index.
//!
//! Nodes are addressed purely by [`BlockHandle`]; whether a given handle
//! names an internal or a leaf node is tracked by callers (insertion's
//! path buffer, the query engine's per-level frontier), never tagged in
//! the handle itself.

use crate::block_store::{BlockHandle, BlockStore, NONE};
use crate::coding::{Decode, Encode};
use crate::error::Error;
use crate::fs::{FileSystem, StdFileSystem};
use crate::geo::BBox;
use crate::inverted_index::InvertedIndex;
use crate::value::{TreeEntry, TREE_ENTRY_SIZE};

/// Byte size of one internal-node entry: a [`BBox`] (24 bytes) plus a child
/// [`BlockHandle`] (8 bytes).
const INTERNAL_ENTRY_SIZE: usize = 24 + 8;

/// Internal-block header: `index_ref: u64` + `count: u32`.
const INTERNAL_HEADER_SIZE: usize = 8 + 4;

/// Leaf-block header: `count: u32`.
const LEAF_HEADER_SIZE: usize = 4;

/// Derives `F_int` (the internal fanout) from the configured block size.
#[must_use]
pub fn fanout_internal(block_size: u64) -> usize {
    ((block_size as usize).saturating_sub(INTERNAL_HEADER_SIZE)) / INTERNAL_ENTRY_SIZE
}

/// Derives `F_leaf` (the leaf fanout) from the configured block size.
#[must_use]
pub fn fanout_leaf(block_size: u64) -> usize {
    ((block_size as usize).saturating_sub(LEAF_HEADER_SIZE)) / TREE_ENTRY_SIZE
}

/// The minimum number of entries a non-root node of fanout `f` must carry
/// after a split: `ceil((F+2)/3)`.
#[must_use]
pub fn min_entries(fanout: usize) -> usize {
    (fanout + 2).div_ceil(3)
}

/// One child slot of an internal node: the union MBB of the child's
/// entries, and the child's block handle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InternalEntry {
    /// Union bounding box of the child subtree.
    pub mbb: BBox,
    /// The child node's block handle.
    pub child: BlockHandle,
}

/// A decoded internal node: its inverted-index block-chain head plus its
/// child entries.
#[derive(Debug, Clone, PartialEq)]
pub struct InternalNode {
    /// Head block of this node's inverted-index chain (see
    /// [`NodeStorage::read_index`]/[`NodeStorage::write_index`]).
    pub index_ref: BlockHandle,
    /// Child entries, in position order; position is the `child_index`
    /// referenced by postings in this node's inverted index.
    pub entries: Vec<InternalEntry>,
}

impl InternalNode {
    /// An empty internal node owning the given (also empty) index chain.
    #[must_use]
    pub fn new(index_ref: BlockHandle) -> Self {
        Self {
            index_ref,
            entries: Vec::new(),
        }
    }

    fn encode(&self, block_size: u64) -> Vec<u8> {
        let mut buf = vec![0u8; block_size as usize];
        buf[0..8].copy_from_slice(&self.index_ref.to_le_bytes());
        #[allow(clippy::cast_possible_truncation)]
        let count = self.entries.len() as u32;
        buf[8..12].copy_from_slice(&count.to_le_bytes());

        let mut offset = INTERNAL_HEADER_SIZE;
        for entry in &self.entries {
            let bytes = entry.mbb.encode_into_vec();
            buf[offset..offset + 24].copy_from_slice(&bytes);
            buf[offset + 24..offset + 32].copy_from_slice(&entry.child.to_le_bytes());
            offset += INTERNAL_ENTRY_SIZE;
        }
        buf
    }

    fn decode(buf: &[u8]) -> crate::Result<Self> {
        let index_ref = u64::from_le_bytes(buf[0..8].try_into().expect("8 bytes"));
        let count = u32::from_le_bytes(buf[8..12].try_into().expect("4 bytes")) as usize;

        let mut entries = Vec::with_capacity(count);
        let mut offset = INTERNAL_HEADER_SIZE;
        for _ in 0..count {
            let mut cursor = std::io::Cursor::new(&buf[offset..offset + 24]);
            let mbb = BBox::decode_from(&mut cursor)?;
            let child = u64::from_le_bytes(
                buf[offset + 24..offset + 32].try_into().expect("8 bytes"),
            );
            entries.push(InternalEntry { mbb, child });
            offset += INTERNAL_ENTRY_SIZE;
        }
        Ok(Self { index_ref, entries })
    }
}

/// A decoded leaf node: its stored entries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LeafNode {
    /// The leaf's entries, in insertion order.
    pub entries: Vec<TreeEntry>,
}

impl LeafNode {
    fn encode(&self, block_size: u64) -> Vec<u8> {
        let mut buf = vec![0u8; block_size as usize];
        #[allow(clippy::cast_possible_truncation)]
        let count = self.entries.len() as u32;
        buf[0..4].copy_from_slice(&count.to_le_bytes());

        let mut offset = LEAF_HEADER_SIZE;
        for entry in &self.entries {
            let bytes = entry.encode_into_vec();
            buf[offset..offset + TREE_ENTRY_SIZE].copy_from_slice(&bytes);
            offset += TREE_ENTRY_SIZE;
        }
        buf
    }

    fn decode(buf: &[u8]) -> crate::Result<Self> {
        let count = u32::from_le_bytes(buf[0..4].try_into().expect("4 bytes")) as usize;
        let mut entries = Vec::with_capacity(count);
        let mut offset = LEAF_HEADER_SIZE;
        for _ in 0..count {
            let mut cursor = std::io::Cursor::new(&buf[offset..offset + TREE_ENTRY_SIZE]);
            entries.push(TreeEntry::decode_from(&mut cursor)?);
            offset += TREE_ENTRY_SIZE;
        }
        Ok(Self { entries })
    }
}

/// Typed view over a [`BlockStore`]: decodes/encodes internal and leaf
/// nodes, and pages each internal node's inverted index through the same
/// block-chain blob mechanism used for leaf/internal node storage itself.
pub struct NodeStorage<F: FileSystem = StdFileSystem> {
    store: BlockStore<F>,
    block_size: u64,
    fanout_internal: usize,
    fanout_leaf: usize,
    lambda: usize,
}

impl<F: FileSystem> NodeStorage<F> {
    /// Wraps an already-open block store with the tree's fanout and
    /// id-set-capacity parameters.
    #[must_use]
    pub fn new(store: BlockStore<F>, fanout_internal: usize, fanout_leaf: usize, lambda: usize) -> Self {
        let block_size = store.block_size();
        Self {
            store,
            block_size,
            fanout_internal,
            fanout_leaf,
            lambda,
        }
    }

    /// Internal fanout (`F_int`).
    #[must_use]
    pub fn fanout_internal(&self) -> usize {
        self.fanout_internal
    }

    /// Leaf fanout (`F_leaf`).
    #[must_use]
    pub fn fanout_leaf(&self) -> usize {
        self.fanout_leaf
    }

    /// The id-set capacity (λ) this storage's nodes were built with.
    #[must_use]
    pub fn lambda(&self) -> usize {
        self.lambda
    }

    /// Read/write access to the underlying block store, e.g. for flush.
    pub fn store_mut(&mut self) -> &mut BlockStore<F> {
        &mut self.store
    }

    /// Allocates a fresh, empty leaf node, returning its handle.
    pub fn alloc_leaf(&mut self) -> crate::Result<BlockHandle> {
        let handle = self.store.get_free_block()?;
        self.write_leaf(handle, &LeafNode::default())?;
        Ok(handle)
    }

    /// Allocates a fresh internal node together with its (empty) inverted
    /// index, per the data-model lifecycle note that the two are created
    /// together.
    pub fn alloc_internal(&mut self) -> crate::Result<BlockHandle> {
        let index_ref = self.write_index_chain(None, &InvertedIndex::new(self.lambda))?;
        let handle = self.store.get_free_block()?;
        self.write_internal(handle, &InternalNode::new(index_ref))?;
        Ok(handle)
    }

    /// Reads and decodes a leaf node.
    pub fn read_leaf(&mut self, handle: BlockHandle) -> crate::Result<LeafNode> {
        let buf = self.store.read_block(handle)?;
        LeafNode::decode(&buf)
    }

    /// Encodes and writes a leaf node.
    ///
    /// # Panics
    /// Asserts `node.entries.len() <= fanout_leaf`.
    pub fn write_leaf(&mut self, handle: BlockHandle, node: &LeafNode) -> crate::Result<()> {
        assert!(
            node.entries.len() <= self.fanout_leaf,
            "leaf node overflow: {} entries > fanout {}",
            node.entries.len(),
            self.fanout_leaf
        );
        let buf = node.encode(self.block_size);
        self.store.write_block(handle, &buf)
    }

    /// Reads and decodes an internal node.
    pub fn read_internal(&mut self, handle: BlockHandle) -> crate::Result<InternalNode> {
        let buf = self.store.read_block(handle)?;
        InternalNode::decode(&buf)
    }

    /// Encodes and writes an internal node.
    ///
    /// # Panics
    /// Asserts `node.entries.len() <= fanout_internal`.
    pub fn write_internal(&mut self, handle: BlockHandle, node: &InternalNode) -> crate::Result<()> {
        assert!(
            node.entries.len() <= self.fanout_internal,
            "internal node overflow: {} entries > fanout {}",
            node.entries.len(),
            self.fanout_internal
        );
        let buf = node.encode(self.block_size);
        self.store.write_block(handle, &buf)
    }

    /// Reads an internal node's inverted index out of its block chain.
    pub fn read_index(&mut self, index_ref: BlockHandle) -> crate::Result<InvertedIndex> {
        let bytes = self.read_chain(index_ref)?;
        InvertedIndex::decode_bytes(&bytes, self.lambda)
    }

    /// Writes an internal node's inverted index back to its block chain,
    /// reusing the existing chain head so `index_ref` never changes.
    pub fn write_index(&mut self, index_ref: BlockHandle, index: &InvertedIndex) -> crate::Result<()> {
        let written_head = self.write_index_chain(Some(index_ref), index)?;
        debug_assert_eq!(
            written_head, index_ref,
            "write_index must not relocate the chain head"
        );
        Ok(())
    }

    fn write_index_chain(
        &mut self,
        existing_head: Option<BlockHandle>,
        index: &InvertedIndex,
    ) -> crate::Result<BlockHandle> {
        let bytes = index.encode_bytes();
        self.write_chain(existing_head, &bytes)
    }

    /// Writes `data` into a chain of blocks starting at `existing_head` (if
    /// given, its head block handle is preserved), returning the chain's
    /// (possibly freshly allocated) head handle.
    fn write_chain(&mut self, existing_head: Option<BlockHandle>, data: &[u8]) -> crate::Result<BlockHandle> {
        let block_size = self.block_size as usize;
        let head_cap = block_size - 16;
        let rest_cap = block_size - 8;

        let mut existing_blocks = Vec::new();
        if let Some(head) = existing_head {
            let mut cur = head;
            loop {
                existing_blocks.push(cur);
                let buf = self.store.read_block(cur)?;
                let next = u64::from_le_bytes(buf[0..8].try_into().expect("8 bytes"));
                if next == NONE {
                    break;
                }
                cur = next;
            }
        }

        let blocks_needed = if data.len() <= head_cap {
            1
        } else {
            1 + (data.len() - head_cap).div_ceil(rest_cap)
        };

        let mut handles = Vec::with_capacity(blocks_needed);
        for i in 0..blocks_needed {
            if let Some(&h) = existing_blocks.get(i) {
                handles.push(h);
            } else {
                handles.push(self.store.get_free_block()?);
            }
        }
        for &extra in existing_blocks.get(blocks_needed..).unwrap_or_default() {
            self.store.free_block(extra)?;
        }

        let mut offset = 0usize;
        for (i, &handle) in handles.iter().enumerate() {
            let next = handles.get(i + 1).copied().unwrap_or(NONE);
            let mut buf = vec![0u8; block_size];
            buf[0..8].copy_from_slice(&next.to_le_bytes());

            if i == 0 {
                #[allow(clippy::cast_possible_truncation)]
                let total_len = data.len() as u64;
                buf[8..16].copy_from_slice(&total_len.to_le_bytes());
                let take = head_cap.min(data.len() - offset);
                buf[16..16 + take].copy_from_slice(&data[offset..offset + take]);
                offset += take;
            } else {
                let take = rest_cap.min(data.len() - offset);
                buf[8..8 + take].copy_from_slice(&data[offset..offset + take]);
                offset += take;
            }
            self.store.write_block(handle, &buf)?;
        }

        Ok(*handles.first().expect("chain always has at least one block"))
    }

    /// Reads a full block-chain blob back into a contiguous buffer.
    fn read_chain(&mut self, head: BlockHandle) -> crate::Result<Vec<u8>> {
        let block_size = self.block_size as usize;
        let buf0 = self.store.read_block(head)?;
        let next0 = u64::from_le_bytes(buf0[0..8].try_into().expect("8 bytes"));
        let total_len = u64::from_le_bytes(buf0[8..16].try_into().expect("8 bytes")) as usize;

        let mut out = Vec::with_capacity(total_len);
        let head_cap = block_size - 16;
        let take = head_cap.min(total_len);
        out.extend_from_slice(&buf0[16..16 + take]);

        let mut next = next0;
        while out.len() < total_len {
            if next == NONE {
                return Err(Error::InvalidParams(
                    "inverted-index chain truncated before declared length".into(),
                ));
            }
            let buf = self.store.read_block(next)?;
            let nxt = u64::from_le_bytes(buf[0..8].try_into().expect("8 bytes"));
            let rest_cap = block_size - 8;
            let take = rest_cap.min(total_len - out.len());
            out.extend_from_slice(&buf[8..8 + take]);
            next = nxt;
        }

        Ok(out)
    }
}
