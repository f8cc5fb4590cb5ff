// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

#![doc(
    html_logo_url = "https://raw.githubusercontent.com/fjall-rs/irwi-tree/main/logo.png",
    html_favicon_url = "https://raw.githubusercontent.com/fjall-rs/irwi-tree/main/favicon.png"
)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![warn(clippy::multiple_crate_versions)]

//! A block-addressable, disk-resident inverted R-tree with weighted
//! intersection (IRWI) for sequenced spatio-textual trajectory queries.
//!
//! An IRWI tree indexes *trajectories*: ordered sequences of `(x, y, t)`
//! movement segments ([`TrajectoryUnit`]), each carrying a single text
//! label. A *sequenced query* ([`SequencedQuery`]) is a list of stages,
//! each a `(region, label-set)` pair, that must be satisfied by
//! consecutive, temporally non-decreasing segments of the same
//! trajectory. Every internal node pairs an R-tree-style bounding-box
//! index over its children with an inverted index from label to the set
//! of children carrying at least one segment under that label, so a
//! query prunes subtrees both spatially and textually at every level of
//! descent.
//!
//! ```no_run
//! use irwi_tree::{BBox, Point3, SimpleQuery, StdFileSystem, TrajectoryUnit, TreeEntry, TreeParams};
//! use std::collections::HashSet;
//!
//! # fn main() -> irwi_tree::Result<()> {
//! let mut tree = TreeParams::new()
//!     .block_size(4096)
//!     .lambda(8)
//!     .create::<StdFileSystem>("/tmp/my-trajectories")?;
//!
//! tree.insert(TreeEntry {
//!     trajectory_id: 42,
//!     unit_index: 0,
//!     unit: TrajectoryUnit::new(
//!         Point3::new(0.0, 0.0, 0.0),
//!         Point3::new(1.0, 1.0, 1.0),
//!         /* label */ 7,
//!     ),
//! })?;
//!
//! let query = vec![SimpleQuery::new(
//!     BBox::new(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 2.0, 2.0)),
//!     HashSet::from([7]),
//! )];
//! let matches = tree.query(&query)?;
//! # Ok(())
//! # }
//! ```
//!
//! Large datasets are better served by [`Tree::bulk_load`], which builds a
//! fresh tree bottom-up from a stream of entries rather than inserting
//! them one at a time.

mod alloc;
mod binary_search;
mod block_store;
mod bulk_load;
mod coding;
mod config;
mod cost;
mod error;
mod fs;
mod geo;
mod id_set;
mod insertion;
mod inverted_index;
mod io_stats;
mod node;
mod posting;
mod query;
mod split;
mod summary;
mod tree;
mod value;

pub use block_store::BlockHandle;
pub use config::{TreeHeader, TreeParams, DEFAULT_BLOCK_SIZE, DEFAULT_LAMBDA, FORMAT_VERSION};
pub use cost::Beta;
pub use error::{Error, FormatMismatch, Result};
pub use fs::{DirEntry, FileSystem, StdFileSystem};
pub use geo::{BBox, Point3};
pub use io_stats::IoStats;
pub use query::{SequencedQuery, SimpleQuery, TrajectoryMatch};
pub use tree::Tree;
pub use value::{LabelId, TrajectoryId, TrajectoryUnit, TreeEntry, UnitIndex, ValueAccessor};
