//! Arena configuration parameters.

use std::path::{Path, PathBuf};

use tessera_core::{round_up, ArenaError, CACHE_LINE_SIZE, MAX_REGION_CAPACITY, PAGE_SIZE};

/// Configuration for a volatile arena.
///
/// Validated at construction; all values are immutable after creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Requested region size in bytes, rounded up to a page multiple.
    ///
    /// Must be non-zero and at most [`MAX_REGION_CAPACITY`].
    pub capacity: usize,

    /// Smallest chunk a two-level arena claims on refill.
    ///
    /// Default: 64 KiB. Must be a multiple of the cache line size.
    pub min_chunk: usize,

    /// Largest chunk a two-level arena claims on refill. Requests bigger
    /// than this bypass the chunk cache.
    ///
    /// Default: 1 MiB. Must be a multiple of the cache line size and
    /// `>= min_chunk`.
    pub max_chunk: usize,
}

impl ArenaConfig {
    /// Default region size: 64 MiB.
    pub const DEFAULT_CAPACITY: usize = 64 * 1024 * 1024;

    /// Default minimum refill chunk: 64 KiB.
    pub const DEFAULT_MIN_CHUNK: usize = 64 * 1024;

    /// Default maximum refill chunk: 1 MiB.
    pub const DEFAULT_MAX_CHUNK: usize = 1024 * 1024;

    /// Create a config for a region of `capacity` bytes with default chunk bounds.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            min_chunk: Self::DEFAULT_MIN_CHUNK,
            max_chunk: Self::DEFAULT_MAX_CHUNK,
        }
    }

    /// Override the two-level refill bounds.
    pub fn with_chunk_bounds(mut self, min_chunk: usize, max_chunk: usize) -> Self {
        self.min_chunk = min_chunk;
        self.max_chunk = max_chunk;
        self
    }

    /// Check every construction invariant.
    pub fn validate(&self) -> Result<(), ArenaError> {
        validate_capacity(self.capacity)?;
        if self.min_chunk == 0 || self.min_chunk % CACHE_LINE_SIZE != 0 {
            return Err(ArenaError::invalid_config(format!(
                "min_chunk {} must be a non-zero multiple of {CACHE_LINE_SIZE}",
                self.min_chunk
            )));
        }
        if self.max_chunk % CACHE_LINE_SIZE != 0 {
            return Err(ArenaError::invalid_config(format!(
                "max_chunk {} must be a multiple of {CACHE_LINE_SIZE}",
                self.max_chunk
            )));
        }
        if self.min_chunk > self.max_chunk {
            return Err(ArenaError::invalid_config(format!(
                "min_chunk {} exceeds max_chunk {}",
                self.min_chunk, self.max_chunk
            )));
        }
        Ok(())
    }

    /// The capacity the region will actually have, after page rounding.
    pub fn region_capacity(&self) -> usize {
        page_rounded(self.capacity)
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// Configuration for a durable (file-backed) arena.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DurableConfig {
    /// Journal file. Created (and truncated) by `DurableArena::create`.
    pub path: PathBuf,

    /// File size in bytes, rounded up to a page multiple. Ignored by
    /// `DurableArena::open`, which uses the existing file length.
    pub capacity: usize,
}

impl DurableConfig {
    /// Default journal size: 64 MiB.
    pub const DEFAULT_CAPACITY: usize = 64 * 1024 * 1024;

    /// Create a config for a journal at `path` with the default capacity.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            capacity: Self::DEFAULT_CAPACITY,
        }
    }

    /// Override the journal size.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// The journal path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check every construction invariant.
    pub fn validate(&self) -> Result<(), ArenaError> {
        if self.path.as_os_str().is_empty() {
            return Err(ArenaError::invalid_config("journal path is empty"));
        }
        validate_capacity(self.capacity)
    }

    /// The file size the journal will actually have, after page rounding.
    pub fn region_capacity(&self) -> usize {
        page_rounded(self.capacity)
    }
}

pub(crate) fn validate_capacity(capacity: usize) -> Result<(), ArenaError> {
    if capacity == 0 {
        return Err(ArenaError::invalid_config("capacity must be non-zero"));
    }
    if capacity > MAX_REGION_CAPACITY {
        return Err(ArenaError::invalid_config(format!(
            "capacity {capacity} exceeds the 32-bit handle limit {MAX_REGION_CAPACITY}"
        )));
    }
    Ok(())
}

/// `capacity` rounded to a page. Validated capacities never overflow.
fn page_rounded(capacity: usize) -> usize {
    round_up(capacity, PAGE_SIZE).unwrap_or(MAX_REGION_CAPACITY)
}
