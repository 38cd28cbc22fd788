//! Single-level bump arena.
//!
//! Every allocation is one `fetch_add` on the shared [`GlobalCounter`].
//! Simple and O(1), but every thread contends on the same cache line; see
//! [`TwoLevelArena`](crate::TwoLevelArena) for the chunked variant.

use std::mem::{align_of, size_of};

use tessera_core::{round_up, ArenaError};
use tracing::debug;

use crate::config::ArenaConfig;
use crate::counter::{ArenaStats, GlobalCounter};
use crate::handle::Handle;
use crate::region::BackingRegion;

/// Allocation granularity. Every allocation starts 16-byte aligned.
pub const SINGLE_LEVEL_ALIGN: usize = 16;

/// A bump allocator over one region with a single shared cursor.
///
/// `allocate` takes `&self` and may be called from any number of threads
/// at once. Ranges returned by concurrent calls never overlap.
#[derive(Debug)]
pub struct SingleLevelArena {
    region: BackingRegion,
    counter: GlobalCounter,
}

impl SingleLevelArena {
    /// Allocate a volatile region described by `config`.
    pub fn new(config: &ArenaConfig) -> Result<Self, ArenaError> {
        config.validate()?;
        let region = BackingRegion::volatile(config.capacity)?;
        Ok(Self::from_region(region))
    }

    /// Serve allocations out of an existing region, starting at offset 0.
    pub fn from_region(region: BackingRegion) -> Self {
        let counter = GlobalCounter::new(region.capacity());
        debug!(region = %region.id(), capacity = region.capacity(), "single-level arena ready");
        Self { region, counter }
    }

    /// Allocate room for `count` contiguous `T`s.
    ///
    /// Returns the null handle when the request does not fit. A failed
    /// request leaves the arena exhausted until [`reset`](Self::reset).
    /// The memory is not re-zeroed after a reset.
    #[must_use]
    #[inline]
    pub fn allocate<T>(&self, count: usize) -> Handle<T> {
        const {
            assert!(
                align_of::<T>() <= SINGLE_LEVEL_ALIGN,
                "single-level allocations are only 16-byte aligned"
            )
        };
        debug_assert!(count >= 1, "allocate called with count 0");
        let Some(size) = size_of::<T>()
            .checked_mul(count)
            .and_then(|bytes| round_up(bytes, SINGLE_LEVEL_ALIGN))
        else {
            return Handle::NULL;
        };
        match self.counter.claim(size as u64) {
            Some(offset) => Handle::new(offset as u32, self.region.id()),
            None => Handle::NULL,
        }
    }

    /// Allocate `len` raw bytes.
    #[must_use]
    pub fn allocate_bytes(&self, len: usize) -> Handle<u8> {
        self.allocate::<u8>(len.max(1))
    }

    /// Rewind to offset 0. Every handle issued before the reset still
    /// resolves, but its bytes will be reused by later allocations.
    pub fn reset(&mut self) {
        let stats = self.counter.stats();
        self.counter.reset();
        debug!(region = %self.region.id(), used = stats.used, exhausted = stats.exhausted, "single-level arena reset");
    }

    /// The region handles resolve against.
    pub fn region(&self) -> &BackingRegion {
        &self.region
    }

    /// Whether an allocation has failed since the last reset.
    pub fn is_exhausted(&self) -> bool {
        self.counter.is_exhausted()
    }

    /// Usage snapshot.
    pub fn stats(&self) -> ArenaStats {
        self.counter.stats()
    }
}

const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<SingleLevelArena>();
};
