// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// A persisted header field that disagreed with what the opening build expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatMismatch {
    /// Name of the field that disagreed, e.g. `"block_size"`.
    pub field: &'static str,

    /// Value expected by the library build doing the opening.
    pub expected: u64,

    /// Value found on disk.
    pub found: u64,
}

impl std::fmt::Display for FormatMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "format mismatch on field `{}`: expected {}, found {} on disk",
            self.field, self.expected, self.found
        )
    }
}

/// Represents errors that can occur while operating an IRWI tree.
///
/// Invariant violations (e.g. inserting into a node with no room, or
/// freeing a block id the allocator never handed out) are programming
/// errors and are not represented here; they are asserted via
/// `debug_assert!`/`assert!` at the point of violation instead.
#[derive(Debug)]
pub enum Error {
    /// Failure of an underlying file or directory operation.
    Io(std::io::Error),

    /// The tree directory's persisted header disagrees with what this
    /// build expects (version, block size, lambda, or fanouts).
    FormatMismatch(FormatMismatch),

    /// An id allocator (block ids, directory ids, file ids) ran out of
    /// numeric space.
    CapacityOverflow,

    /// `root()` was called on a tree with `height() == 0`.
    EmptyTree,

    /// A `TreeParams` value was internally inconsistent (e.g. `lambda < 2`,
    /// or `max_leaves < 2` passed to bulk load).
    InvalidParams(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IrwiTreeError::Io({e})"),
            Self::FormatMismatch(m) => write!(f, "IrwiTreeError::FormatMismatch({m})"),
            Self::CapacityOverflow => write!(f, "IrwiTreeError::CapacityOverflow"),
            Self::EmptyTree => write!(f, "IrwiTreeError::EmptyTree: root() on an empty tree"),
            Self::InvalidParams(msg) => write!(f, "IrwiTreeError::InvalidParams({msg})"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<FormatMismatch> for Error {
    fn from(value: FormatMismatch) -> Self {
        Self::FormatMismatch(value)
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
