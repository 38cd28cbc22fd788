//! Error types for region construction, durable storage and ring setup.
//!
//! Allocation exhaustion and queue full/empty are *not* errors: they are
//! expected outcomes reported as null handles, `None` or `false`. The
//! enums here cover the failures that abort construction or I/O.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors from creating, opening or flushing a backing region.
#[derive(Debug, Error)]
pub enum ArenaError {
    /// A configuration value violates a construction invariant.
    #[error("invalid arena configuration: {reason}")]
    InvalidConfig {
        /// Which invariant was violated.
        reason: String,
    },
    /// The heap refused a page-aligned allocation for a volatile region.
    #[error("failed to allocate {size} bytes aligned to {align} for backing region")]
    RegionAlloc {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },
    /// Creating, sizing, mapping or flushing a durable file failed.
    #[error("{op} failed for {path}: {source}")]
    Io {
        /// The operation that failed (`"open"`, `"set_len"`, `"mmap"`, `"flush"`).
        op: &'static str,
        /// The backing file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// An existing journal cannot be used as a durable region.
    #[error("corrupt journal at offset {offset}: {reason}")]
    Corrupt {
        /// Byte offset where the problem was detected.
        offset: u64,
        /// Description of the problem.
        reason: String,
    },
}

impl ArenaError {
    /// Shorthand for [`ArenaError::InvalidConfig`].
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`ArenaError::Io`].
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Errors from constructing an SPSC ring.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RingError {
    /// Wraparound is a bitmask, so capacity must be a power of two.
    #[error("ring capacity {capacity} is not a power of two")]
    CapacityNotPowerOfTwo {
        /// The rejected capacity.
        capacity: usize,
    },
    /// One slot is always kept empty, so fewer than two slots hold nothing.
    #[error("ring capacity must be >= 2, got {capacity}")]
    CapacityTooSmall {
        /// The rejected capacity.
        capacity: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn invalid_config_display() {
        let err = ArenaError::invalid_config("min_chunk > max_chunk");
        assert_eq!(
            err.to_string(),
            "invalid arena configuration: min_chunk > max_chunk"
        );
    }

    #[test]
    fn io_error_exposes_source() {
        let err = ArenaError::io(
            "open",
            "/nonexistent/journal",
            io::Error::new(io::ErrorKind::NotFound, "missing"),
        );
        assert!(err.to_string().starts_with("open failed for /nonexistent/journal"));
        assert!(err.source().is_some());
    }

    #[test]
    fn ring_error_display() {
        let err = RingError::CapacityNotPowerOfTwo { capacity: 12 };
        assert_eq!(err.to_string(), "ring capacity 12 is not a power of two");
    }
}
