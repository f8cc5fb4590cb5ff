// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! `TreeParams`: the builder used to create or open an on-disk IRWI tree
//! (C5's tree-state facade, plus the ambient configuration surface), and
//! the persisted tree header.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::block_store::{BlockStore, MIN_CACHE_BLOCKS, NONE};
use crate::coding::{Decode, Encode, EncodeError, LittleEndian, ReadBytesExt, WriteBytesExt};
use crate::cost::Beta;
use crate::error::{Error, FormatMismatch};
use crate::fs::{FileSystem, StdFileSystem};
use crate::node::{fanout_internal, fanout_leaf, NodeStorage};
use crate::tree::Tree;

/// On-disk header format version.
pub const FORMAT_VERSION: i32 = 2;

/// Default block size in bytes, chosen for a round number of 36-byte leaf
/// entries per block.
pub const DEFAULT_BLOCK_SIZE: u64 = 4096;

/// Default λ (trajectory-id-set interval capacity).
pub const DEFAULT_LAMBDA: usize = 8;

const HEADER_FILE: &str = "tree.state";

/// The persisted tree header: `{ version, block_size, lambda,
/// fanout_internal, fanout_leaf, size, height, leaf_count, internal_count,
/// root_handle }`, little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeHeader {
    pub(crate) version: i32,
    pub(crate) block_size: u64,
    pub(crate) lambda: u64,
    pub(crate) fanout_internal: u64,
    pub(crate) fanout_leaf: u64,
    pub(crate) size: u64,
    pub(crate) height: u64,
    pub(crate) leaf_count: u64,
    pub(crate) internal_count: u64,
    pub(crate) root_handle: u64,
}

impl Encode for TreeHeader {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_i32::<LittleEndian>(self.version)?;
        writer.write_u64::<LittleEndian>(self.block_size)?;
        writer.write_u64::<LittleEndian>(self.lambda)?;
        writer.write_u64::<LittleEndian>(self.fanout_internal)?;
        writer.write_u64::<LittleEndian>(self.fanout_leaf)?;
        writer.write_u64::<LittleEndian>(self.size)?;
        writer.write_u64::<LittleEndian>(self.height)?;
        writer.write_u64::<LittleEndian>(self.leaf_count)?;
        writer.write_u64::<LittleEndian>(self.internal_count)?;
        writer.write_u64::<LittleEndian>(self.root_handle)?;
        Ok(())
    }
}

impl Decode for TreeHeader {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, Error> {
        Ok(Self {
            version: reader.read_i32::<LittleEndian>()?,
            block_size: reader.read_u64::<LittleEndian>()?,
            lambda: reader.read_u64::<LittleEndian>()?,
            fanout_internal: reader.read_u64::<LittleEndian>()?,
            fanout_leaf: reader.read_u64::<LittleEndian>()?,
            size: reader.read_u64::<LittleEndian>()?,
            height: reader.read_u64::<LittleEndian>()?,
            leaf_count: reader.read_u64::<LittleEndian>()?,
            internal_count: reader.read_u64::<LittleEndian>()?,
            root_handle: reader.read_u64::<LittleEndian>()?,
        })
    }
}

impl TreeHeader {
    /// A fresh, empty header for the given block size/lambda/fanouts, not
    /// yet backed by any on-disk `tree.state` file. Used by callers (bulk
    /// load, the insertion engine's own tests) that drive a
    /// [`crate::node::NodeStorage`] directly instead of through
    /// [`TreeParams`].
    #[must_use]
    pub(crate) fn fresh(block_size: u64, lambda: usize, fanout_internal: usize, fanout_leaf: usize) -> Self {
        Self {
            version: FORMAT_VERSION,
            block_size,
            #[allow(clippy::cast_possible_truncation)]
            lambda: lambda as u64,
            #[allow(clippy::cast_possible_truncation)]
            fanout_internal: fanout_internal as u64,
            #[allow(clippy::cast_possible_truncation)]
            fanout_leaf: fanout_leaf as u64,
            size: 0,
            height: 0,
            leaf_count: 0,
            internal_count: 0,
            root_handle: NONE,
        }
    }

    fn path(dir: &Path) -> PathBuf {
        dir.join(HEADER_FILE)
    }

    pub(crate) fn write<F: FileSystem>(&self, dir: &Path) -> crate::Result<()> {
        let bytes = self.encode_into_vec();
        let mut file = F::create(&Self::path(dir))?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        Ok(())
    }

    pub(crate) fn read<F: FileSystem>(dir: &Path) -> crate::Result<Self> {
        let bytes = F::read(&Self::path(dir))?;
        let mut cursor = std::io::Cursor::new(bytes);
        Self::decode_from(&mut cursor)
    }
}

/// Builder for creating a fresh tree directory or opening an existing one.
///
/// Fixes `block_size` and `lambda` up front, derives
/// `fanout_internal`/`fanout_leaf` from `block_size` unless overridden, and
/// fixes `beta` (the descent/split cost weight).
#[derive(Debug, Clone)]
pub struct TreeParams {
    block_size: Option<u64>,
    lambda: Option<usize>,
    fanout_internal: Option<usize>,
    fanout_leaf: Option<usize>,
    beta: f32,
    cache_capacity: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            block_size: None,
            lambda: None,
            fanout_internal: None,
            fanout_leaf: None,
            beta: Beta::default().value(),
            cache_capacity: MIN_CACHE_BLOCKS * 16,
        }
    }
}

impl TreeParams {
    /// Starts a builder with every parameter defaulted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the block size in bytes (used only on [`Self::create`]; ignored
    /// -- after a format-mismatch check -- on [`Self::open`]).
    #[must_use]
    pub fn block_size(mut self, bytes: u64) -> Self {
        self.block_size = Some(bytes);
        self
    }

    /// Sets λ, the trajectory-id-set interval capacity.
    ///
    /// # Panics
    /// Panics (at `create`/`open` time, not here) if `lambda < 2`.
    #[must_use]
    pub fn lambda(mut self, lambda: usize) -> Self {
        self.lambda = Some(lambda);
        self
    }

    /// Overrides the derived internal fanout.
    #[must_use]
    pub fn fanout_internal(mut self, fanout: usize) -> Self {
        self.fanout_internal = Some(fanout);
        self
    }

    /// Overrides the derived leaf fanout.
    #[must_use]
    pub fn fanout_leaf(mut self, fanout: usize) -> Self {
        self.fanout_leaf = Some(fanout);
        self
    }

    /// Sets β, the spatial/textual cost-blend weight (clamped to `[0, 1]`).
    #[must_use]
    pub fn beta(mut self, beta: f32) -> Self {
        self.beta = Beta::new(beta).value();
        self
    }

    /// Sets the block cache's capacity in blocks (minimum 4).
    #[must_use]
    pub fn cache_capacity(mut self, blocks: usize) -> Self {
        self.cache_capacity = blocks;
        self
    }

    /// Creates a fresh on-disk tree directory and returns it opened. Fails
    /// if `dir` already contains a `tree.state`.
    ///
    /// # Errors
    /// I/O errors, or [`Error::InvalidParams`] if `lambda < 2`.
    pub fn create<F: FileSystem>(self, dir: &Path) -> crate::Result<Tree<F>> {
        let lambda = self.lambda.unwrap_or(DEFAULT_LAMBDA);
        if lambda < 2 {
            return Err(Error::InvalidParams(format!(
                "lambda must be > 1, got {lambda}"
            )));
        }
        let block_size = self.block_size.unwrap_or(DEFAULT_BLOCK_SIZE);

        F::create_dir_all(dir)?;

        let fanout_internal = self.fanout_internal.unwrap_or_else(|| fanout_internal(block_size));
        let fanout_leaf = self.fanout_leaf.unwrap_or_else(|| fanout_leaf(block_size));

        let store = BlockStore::<F>::create(dir, block_size, self.cache_capacity)?;
        let storage = NodeStorage::new(store, fanout_internal, fanout_leaf, lambda);

        let header = TreeHeader::fresh(block_size, lambda, fanout_internal, fanout_leaf);
        header.write::<F>(dir)?;

        Ok(Tree::new(dir.to_path_buf(), storage, header, Beta::new(self.beta)))
    }

    /// Opens an existing tree directory, validating the persisted header
    /// against any parameters this builder explicitly set.
    ///
    /// # Errors
    /// [`Error::FormatMismatch`] if `version`, or an explicitly-set
    /// `block_size`/`lambda`/fanout, disagrees with what is on disk.
    pub fn open<F: FileSystem>(self, dir: &Path) -> crate::Result<Tree<F>> {
        let header = TreeHeader::read::<F>(dir)?;

        if header.version != FORMAT_VERSION {
            log::warn!(
                "tree.state version mismatch: expected {FORMAT_VERSION}, found {}",
                header.version
            );
            return Err(FormatMismatch {
                field: "version",
                expected: FORMAT_VERSION as u64,
                found: header.version as u64,
            }
            .into());
        }

        check_field(self.block_size, header.block_size, "block_size")?;
        check_field(self.lambda.map(|v| v as u64), header.lambda, "lambda")?;
        check_field(
            self.fanout_internal.map(|v| v as u64),
            header.fanout_internal,
            "fanout_internal",
        )?;
        check_field(
            self.fanout_leaf.map(|v| v as u64),
            header.fanout_leaf,
            "fanout_leaf",
        )?;

        let expected_fanout_internal = fanout_internal(header.block_size) as u64;
        if header.fanout_internal != expected_fanout_internal {
            return Err(FormatMismatch {
                field: "fanout_internal",
                expected: expected_fanout_internal,
                found: header.fanout_internal,
            }
            .into());
        }
        let expected_fanout_leaf = fanout_leaf(header.block_size) as u64;
        if header.fanout_leaf != expected_fanout_leaf {
            return Err(FormatMismatch {
                field: "fanout_leaf",
                expected: expected_fanout_leaf,
                found: header.fanout_leaf,
            }
            .into());
        }

        let store = BlockStore::<F>::open(dir, header.block_size, self.cache_capacity)?;
        let storage = NodeStorage::new(
            store,
            header.fanout_internal as usize,
            header.fanout_leaf as usize,
            header.lambda as usize,
        );

        Ok(Tree::new(dir.to_path_buf(), storage, header, Beta::new(self.beta)))
    }
}

fn check_field(expected: Option<u64>, found: u64, field: &'static str) -> crate::Result<()> {
    if let Some(expected) = expected {
        if expected != found {
            log::warn!("tree.state field `{field}` mismatch: expected {expected}, found {found}");
            return Err(FormatMismatch {
                field,
                expected,
                found,
            }
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_open_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let tree = TreeParams::new()
                .block_size(256)
                .lambda(4)
                .create::<StdFileSystem>(dir.path())
                .unwrap();
            assert_eq!(tree.size(), 0);
            assert_eq!(tree.height(), 0);
        }

        let tree = TreeParams::new()
            .block_size(256)
            .lambda(4)
            .open::<StdFileSystem>(dir.path())
            .unwrap();
        assert_eq!(tree.size(), 0);
    }

    #[test]
    fn open_rejects_mismatched_lambda() {
        let dir = tempfile::tempdir().unwrap();
        TreeParams::new()
            .block_size(256)
            .lambda(4)
            .create::<StdFileSystem>(dir.path())
            .unwrap();

        let err = TreeParams::new()
            .block_size(256)
            .lambda(8)
            .open::<StdFileSystem>(dir.path());
        assert!(matches!(err, Err(Error::FormatMismatch(_))));
    }

    #[test]
    fn rejects_lambda_below_two() {
        let dir = tempfile::tempdir().unwrap();
        let err = TreeParams::new().lambda(1).create::<StdFileSystem>(dir.path());
        assert!(matches!(err, Err(Error::InvalidParams(_))));
    }
}
