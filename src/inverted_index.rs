// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-internal-node inverted index: a label -> postings-list map plus one
//! distinguished `total` list.
//!
//! In memory this is an ordered `BTreeMap<LabelId, PostingsList>`, paged
//! through the block store on open/close. On disk it is realized as a
//! single serialized blob written through a block chain
//! (`node.rs::NodeStorage::write_index`) rather than a directory of
//! per-label files, since a snapshot-on-close structure needs no
//! finer-grained file boundaries to satisfy this engine's single-writer,
//! clean-shutdown durability model (no transactional WAL).

use std::collections::BTreeMap;
use std::io::Cursor;

use crate::coding::{Decode, Encode, EncodeError, LittleEndian, ReadBytesExt, WriteBytesExt};
use crate::posting::{decode_postings_list, PostingsList};
use crate::value::LabelId;

/// A single internal node's inverted index: per-label postings lists plus
/// the `total` list.
#[derive(Debug, Clone)]
pub struct InvertedIndex {
    lists: BTreeMap<LabelId, PostingsList>,
    total: PostingsList,
    lambda: usize,
}

impl InvertedIndex {
    /// A fresh, empty index (created together with its owning internal
    /// node, per the data-model lifecycle note), over id sets bounded to
    /// `lambda` intervals.
    #[must_use]
    pub fn new(lambda: usize) -> Self {
        Self {
            lists: BTreeMap::new(),
            total: PostingsList::new(),
            lambda,
        }
    }

    /// The id-set capacity (λ) this index's postings were built with.
    #[must_use]
    pub fn lambda(&self) -> usize {
        self.lambda
    }

    /// Serializes this index to a self-describing byte blob: `lambda: u64`,
    /// `total` list, then `(label_count: u32, (label: u32, list)*)`.
    #[must_use]
    pub fn encode_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf).expect("encoding to Vec cannot fail");
        buf
    }

    /// Deserializes a blob written by [`Self::encode_bytes`]. The `_hint`
    /// parameter is unused (lambda travels with the bytes); kept so callers
    /// that only know a fallback lambda can pass one without branching.
    pub fn decode_bytes(bytes: &[u8], _hint: usize) -> crate::Result<Self> {
        let mut cursor = Cursor::new(bytes);
        Self::decode_from(&mut cursor)
    }

    /// The `total` list: one posting per child, irrespective of label.
    #[must_use]
    pub fn total(&self) -> &PostingsList {
        &self.total
    }

    /// Mutable access to the `total` list.
    pub fn total_mut(&mut self) -> &mut PostingsList {
        &mut self.total
    }

    /// Finds the postings list for `label`, if the label occurs anywhere in
    /// this node's subtree.
    #[must_use]
    pub fn find(&self, label: LabelId) -> Option<&PostingsList> {
        self.lists.get(&label)
    }

    /// Mutable find.
    pub fn find_mut(&mut self, label: LabelId) -> Option<&mut PostingsList> {
        self.lists.get_mut(&label)
    }

    /// Creates an empty postings list for `label`.
    ///
    /// # Panics
    /// Asserts `label` is not already present: `create` requires absence,
    /// per the component contract.
    pub fn create(&mut self, label: LabelId) -> &mut PostingsList {
        assert!(
            !self.lists.contains_key(&label),
            "create() called for a label that already has a postings list"
        );
        self.lists.entry(label).or_insert_with(PostingsList::new)
    }

    /// Finds the postings list for `label`, creating an empty one first if
    /// absent.
    pub fn find_or_create(&mut self, label: LabelId) -> &mut PostingsList {
        self.lists.entry(label).or_insert_with(PostingsList::new)
    }

    /// Iterates `(label, postings_list)` pairs in label order. Does not
    /// include the `total` list.
    pub fn iter(&self) -> impl Iterator<Item = (LabelId, &PostingsList)> {
        self.lists.iter().map(|(&l, list)| (l, list))
    }

    /// Iterates `(label, postings_list)` pairs mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (LabelId, &mut PostingsList)> {
        self.lists.iter_mut().map(|(&l, list)| (l, list))
    }

    /// Removes a label's list entirely (used when a split leaves a list
    /// empty on the originating side is *not* what this removes — that case
    /// keeps the list; this is used by index-clearing on `replace_entry`,
    /// see `insertion.rs`).
    pub fn remove_label(&mut self, label: LabelId) {
        self.lists.remove(&label);
    }

    /// Drops any label list that has become empty. Per the data-model
    /// invariant, empty label lists must never persist.
    pub fn prune_empty(&mut self) {
        self.lists.retain(|_, list| !list.is_empty());
    }

    /// Gathers, for every child with at least one posting under any label in
    /// `labels`, the union of that child's matching id sets.
    ///
    /// If `labels` is empty the caller is expected to use `total()` instead
    /// (an "any label" query) rather than call this.
    #[must_use]
    pub fn matching_children(
        &self,
        labels: &std::collections::HashSet<LabelId>,
        lambda: usize,
    ) -> BTreeMap<u32, crate::id_set::IdSet> {
        let mut out: BTreeMap<u32, Vec<crate::id_set::IdSet>> = BTreeMap::new();
        for &label in labels {
            if let Some(list) = self.lists.get(&label) {
                for posting in list.iter() {
                    out.entry(posting.child_index)
                        .or_default()
                        .push(posting.ids.clone());
                }
            }
        }
        out.into_iter()
            .map(|(child, sets)| (child, crate::id_set::IdSet::union(lambda, sets.iter())))
            .collect()
    }
}

impl Encode for InvertedIndex {
    fn encode_into<W: std::io::Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u64::<LittleEndian>(self.lambda as u64)?;
        self.total.encode_into(writer)?;
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32::<LittleEndian>(self.lists.len() as u32)?;
        for (&label, list) in &self.lists {
            writer.write_u32::<LittleEndian>(label)?;
            list.encode_into(writer)?;
        }
        Ok(())
    }
}

impl Decode for InvertedIndex {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Result<Self, crate::Error> {
        let lambda = reader.read_u64::<LittleEndian>()? as usize;
        let total = decode_postings_list(reader, lambda)?;
        let label_count = reader.read_u32::<LittleEndian>()?;
        let mut lists = BTreeMap::new();
        for _ in 0..label_count {
            let label = reader.read_u32::<LittleEndian>()?;
            let list = decode_postings_list(reader, lambda)?;
            lists.insert(label, list);
        }
        Ok(Self {
            lists,
            total,
            lambda,
        })
    }
}
