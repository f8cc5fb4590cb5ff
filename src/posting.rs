// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Postings and postings lists: the per-(node, label) summaries that make up
//! an inverted index (`inverted_index.rs`).

use std::io::{Read, Write};

use crate::coding::{Decode, Encode, EncodeError, LittleEndian, ReadBytesExt, WriteBytesExt};
use crate::error::Error;
use crate::id_set::{decode_id_set, IdSet};

/// Index of a child within its parent's `entries` array.
pub type ChildIndex = u32;

/// One entry of a postings list: how many units of the owning label (or, for
/// the `total` list, of any label) occur under `child_index`'s subtree, and
/// an approximate set of the trajectory ids involved.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    /// Position of the child in the owning internal node.
    pub child_index: ChildIndex,
    /// Number of matching units in the child's subtree.
    pub count: u64,
    /// Approximate set of trajectory ids with a matching unit there.
    pub ids: IdSet,
}

impl Posting {
    /// Creates a posting summarizing one matching trajectory id.
    #[must_use]
    pub fn new(child_index: ChildIndex, count: u64, ids: IdSet) -> Self {
        Self {
            child_index,
            count,
            ids,
        }
    }
}

impl Encode for Posting {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<LittleEndian>(self.child_index)?;
        writer.write_u64::<LittleEndian>(self.count)?;
        self.ids.encode_into(writer)?;
        Ok(())
    }
}

/// Decodes a posting, given the tree-wide id-set capacity (lambda).
pub fn decode_posting<R: Read>(reader: &mut R, lambda: usize) -> Result<Posting, Error> {
    let child_index = reader.read_u32::<LittleEndian>()?;
    let count = reader.read_u64::<LittleEndian>()?;
    let ids = decode_id_set(reader, lambda)?;
    Ok(Posting {
        child_index,
        count,
        ids,
    })
}

/// The result of `summarize()`: the aggregate count and id-set union over
/// every posting in a list.
#[derive(Debug, Clone, PartialEq)]
pub struct PostingsSummary {
    /// Sum of every posting's `count`.
    pub count: u64,
    /// Union of every posting's `ids`.
    pub ids: IdSet,
}

/// An ordered sequence of postings with unique `child_index`, bounded to the
/// parent's internal fanout. Three backends share this same in-memory
/// representation in this crate: a plain in-memory vector is used directly
/// for the mini-tree during bulk load and for small internal nodes kept
/// resident; node storage (`node.rs`) is responsible for (de)serializing a
/// `PostingsList` to/from its backing postings-list file under
/// `inverted_index/<id>/postings_lists/`.
///
/// Per the design note on polymorphism, interchangeability between backends
/// happens at the engine boundary (which concrete postings-list type a
/// generic tree is instantiated with), not via dynamic dispatch on the hot
/// append/find path.
#[derive(Debug, Clone, PartialEq)]
pub struct PostingsList {
    postings: Vec<Posting>,
}

impl PostingsList {
    /// An empty postings list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            postings: Vec::new(),
        }
    }

    /// Number of postings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.postings.len()
    }

    /// Whether the list holds no postings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    /// Iterates all postings.
    pub fn iter(&self) -> impl Iterator<Item = &Posting> {
        self.postings.iter()
    }

    /// Appends a posting. `O(1)` amortized.
    ///
    /// # Panics
    /// In debug builds, asserts `child_index` is not already present
    /// (postings lists hold unique child indices).
    pub fn append(&mut self, p: Posting) {
        debug_assert!(
            self.find(p.child_index).is_none(),
            "duplicate child_index appended to postings list"
        );
        self.postings.push(p);
    }

    /// Finds the posting for `child_index`, if any. Linear scan.
    #[must_use]
    pub fn find(&self, child_index: ChildIndex) -> Option<usize> {
        self.postings.iter().position(|p| p.child_index == child_index)
    }

    /// Finds the posting for `child_index`.
    #[must_use]
    pub fn find_ref(&self, child_index: ChildIndex) -> Option<&Posting> {
        self.postings.iter().find(|p| p.child_index == child_index)
    }

    /// Overwrites the posting at `pos` in place.
    pub fn set(&mut self, pos: usize, p: Posting) {
        self.postings[pos] = p;
    }

    /// Removes the posting at `pos` by swapping the last element into the
    /// hole and popping. Invalidates any previously-noted position for the
    /// former last element.
    ///
    /// # Panics
    /// Asserts the list is non-empty: removing from an empty postings list
    /// is a programming error (see design note on the source's misspelled
    /// `!v.empty()` assertion), not a silent no-op.
    pub fn remove(&mut self, pos: usize) {
        assert!(!self.postings.is_empty(), "remove from empty postings list");
        self.postings.swap_remove(pos);
    }

    /// Finds-or-appends: if `child_index` already has a posting, its count
    /// is incremented by `count` and `id` is merged in; otherwise a new
    /// posting `(child_index, count, {id})` is appended.
    pub fn increment(&mut self, child_index: ChildIndex, count: u64, id: u32, lambda: usize) {
        if let Some(pos) = self.find(child_index) {
            let p = &mut self.postings[pos];
            p.count += count;
            p.ids.insert(id);
        } else {
            self.append(Posting::new(child_index, count, IdSet::singleton(lambda, id)));
        }
    }

    /// Finds-or-appends with an already-computed id set rather than a single
    /// id: used when merging a whole subtree's summary into a parent's
    /// postings list (whole-subtree insertion, bulk load), where the
    /// contribution is a count plus an existing `IdSet` rather than one
    /// trajectory id at a time.
    pub fn merge_or_append(&mut self, child_index: ChildIndex, count: u64, ids: &IdSet, lambda: usize) {
        if let Some(pos) = self.find(child_index) {
            let p = &mut self.postings[pos];
            p.count += count;
            p.ids.union_with(ids);
            let _ = lambda;
        } else {
            self.append(Posting::new(child_index, count, ids.clone()));
        }
    }

    /// Clears every posting.
    pub fn clear(&mut self) {
        self.postings.clear();
    }

    /// Replaces the contents wholesale (used when assigning a split's
    /// partitioned half back into a list).
    pub fn assign(&mut self, postings: Vec<Posting>) {
        self.postings = postings;
    }

    /// Produces `(sum of counts, union of id sets)` over every posting.
    #[must_use]
    pub fn summarize(&self, lambda: usize) -> PostingsSummary {
        let count = self.postings.iter().map(|p| p.count).sum();
        let ids = IdSet::union(lambda, self.postings.iter().map(|p| &p.ids));
        PostingsSummary { count, ids }
    }

    /// Dense per-child-index count vector for `num_children` children: `0`
    /// for children absent from this list. Used by the cost functions
    /// (`cost.rs`) to compare a candidate child's relative frequency for a
    /// label against its siblings.
    #[must_use]
    pub fn counts_by_child(&self, num_children: usize) -> Vec<u64> {
        let mut out = vec![0u64; num_children];
        for p in &self.postings {
            if let Some(slot) = out.get_mut(p.child_index as usize) {
                *slot = p.count;
            }
        }
        out
    }
}

impl Default for PostingsList {
    fn default() -> Self {
        Self::new()
    }
}

impl Encode for PostingsList {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32::<LittleEndian>(self.postings.len() as u32)?;
        for p in &self.postings {
            p.encode_into(writer)?;
        }
        Ok(())
    }
}

/// Decodes a postings list, given the tree-wide id-set capacity.
pub fn decode_postings_list<R: Read>(reader: &mut R, lambda: usize) -> Result<PostingsList, Error> {
    let count = reader.read_u32::<LittleEndian>()? as usize;
    let mut postings = Vec::with_capacity(count);
    for _ in 0..count {
        postings.push(decode_posting(reader, lambda)?);
    }
    Ok(PostingsList { postings })
}
