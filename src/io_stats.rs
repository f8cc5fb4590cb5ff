// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! I/O accounting: running byte/block counters exposed by the block store,
//! plus a small RAII scope used to log query/bulk-load phase boundaries at
//! `trace` level. The phase-boundary logging is gated behind the
//! `metrics` feature; the counters themselves are always tracked, since
//! they cost nothing to maintain.

/// Running counters of bytes and blocks read/written by a [`crate::block_store::BlockStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStats {
    /// Total bytes read from the block file.
    pub bytes_read: u64,
    /// Total bytes written to the block file.
    pub bytes_written: u64,
    /// Total block-read operations.
    pub block_reads: u64,
    /// Total block-write operations.
    pub block_writes: u64,
}

impl IoStats {
    pub(crate) fn record_read(&mut self, bytes: u64) {
        self.bytes_read += bytes;
        self.block_reads += 1;
    }

    pub(crate) fn record_write(&mut self, bytes: u64) {
        self.bytes_written += bytes;
        self.block_writes += 1;
    }
}

/// RAII guard that logs entry/exit of a named query or bulk-load phase at
/// `trace` level, using plain `log` macros rather than a tracing-span
/// facade: there is no concurrent attribution problem to solve in a
/// single-writer engine.
pub struct Scope {
    name: &'static str,
}

/// Opens a named accounting/logging scope. The returned guard logs on drop
/// when the `metrics` feature is enabled; otherwise it is a zero-cost
/// marker.
#[must_use]
pub fn scope(name: &'static str) -> Scope {
    #[cfg(feature = "metrics")]
    log::trace!("enter scope: {name}");
    Scope { name }
}

impl Drop for Scope {
    fn drop(&mut self) {
        #[cfg(feature = "metrics")]
        log::trace!("exit scope: {}", self.name);
        #[cfg(not(feature = "metrics"))]
        let _ = self.name;
    }
}
