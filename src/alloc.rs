// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Id allocators: a monotonically increasing counter plus a stack of freed
//! ids, persisted as `{ next_id: u64, freed: Vec<u64> }`.
//!
//! Used for block-store block handles (in-band, see `block_store.rs`),
//! directory ids for per-node inverted-index subdirectories, and file ids
//! for per-label postings-list files.

use std::io::{Read, Write};

use crate::coding::{Decode, Encode, EncodeError, LittleEndian, ReadBytesExt, WriteBytesExt};
use crate::error::Error;

/// An id allocator: hands out `u64` ids, reusing freed ones before growing.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    next_id: u64,
    freed: Vec<u64>,
}

impl IdAllocator {
    /// A fresh allocator starting at id 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: 0,
            freed: Vec::new(),
        }
    }

    /// Allocates an id: pops a freed id if any are available, else returns
    /// and increments the running counter.
    ///
    /// # Errors
    /// Returns [`Error::CapacityOverflow`] if the counter would wrap.
    pub fn alloc(&mut self) -> Result<u64, Error> {
        if let Some(id) = self.freed.pop() {
            return Ok(id);
        }
        let id = self.next_id;
        self.next_id = self.next_id.checked_add(1).ok_or(Error::CapacityOverflow)?;
        Ok(id)
    }

    /// Returns `id` to the free pool.
    ///
    /// # Panics
    /// Asserts `id < next_id`: freeing an id this allocator never handed out
    /// is a programming error.
    pub fn free(&mut self, id: u64) {
        assert!(id < self.next_id, "freeing an id never allocated");
        debug_assert!(!self.freed.contains(&id), "double free of allocator id");
        self.freed.push(id);
    }

    /// Number of ids currently in use.
    #[must_use]
    pub fn live_count(&self) -> u64 {
        self.next_id - self.freed.len() as u64
    }
}

impl Encode for IdAllocator {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<LittleEndian>(self.next_id)?;
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u64::<LittleEndian>(self.freed.len() as u64)?;
        for &id in &self.freed {
            writer.write_u64::<LittleEndian>(id)?;
        }
        Ok(())
    }
}

impl Decode for IdAllocator {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let next_id = reader.read_u64::<LittleEndian>()?;
        let freed_len = reader.read_u64::<LittleEndian>()?;
        let mut freed = Vec::with_capacity(freed_len as usize);
        for _ in 0..freed_len {
            freed.push(reader.read_u64::<LittleEndian>()?);
        }
        Ok(Self { next_id, freed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_freed_ids_before_growing() {
        let mut a = IdAllocator::new();
        let x = a.alloc().unwrap();
        let y = a.alloc().unwrap();
        a.free(x);
        let z = a.alloc().unwrap();
        assert_eq!(z, x);
        assert_ne!(y, z);
    }

    #[test]
    fn roundtrip() {
        let mut a = IdAllocator::new();
        a.alloc().unwrap();
        let x = a.alloc().unwrap();
        a.free(x);
        let bytes = a.encode_into_vec();
        let mut cursor = std::io::Cursor::new(bytes);
        let back = IdAllocator::decode_from(&mut cursor).unwrap();
        assert_eq!(back.next_id, a.next_id);
        assert_eq!(back.freed, a.freed);
    }
}
