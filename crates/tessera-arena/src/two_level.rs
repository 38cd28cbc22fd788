//! Two-level bump arena: private chunks refilled from a shared counter.
//!
//! Each allocating thread owns a [`ChunkCache`], a sub-range of the region
//! it claimed with one `fetch_add` on the [`GlobalCounter`]. Allocations
//! bump the cache's private cursor with no atomic read-modify-write at
//! all; only an exhausted chunk goes back to the counter for more.
//!
//! Chunk sizes adapt to the request that triggered the refill:
//! `max(min_chunk, min(2 * size, max_chunk))`, rounded up to 64 bytes. A
//! request between `min_chunk` and `max_chunk / 2` therefore always gets
//! room for at least two copies of itself. Requests larger than
//! `max_chunk` skip the cache and claim exactly what they need.
//!
//! Caches are explicit values rather than thread-locals. A cache records
//! which arena (by [`RegionId`]) and which reset generation it was filled
//! under; presenting a cache from another arena, or one filled before a
//! [`reset`](TwoLevelArena::reset), simply triggers a refill.

use std::mem::{align_of, size_of};

use tessera_core::{round_up, ArenaError, RegionId, CACHE_LINE_SIZE};
use tracing::{debug, trace};

use crate::config::ArenaConfig;
use crate::counter::{ArenaStats, GlobalCounter};
use crate::handle::Handle;
use crate::region::BackingRegion;
use crate::registry::ChunkRegistry;

/// Largest alignment a two-level allocation can satisfy. Chunks start on
/// cache-line boundaries, so anything up to a cache line works.
pub const CHUNK_ALIGN: usize = CACHE_LINE_SIZE;

/// One thread's private slice of a [`TwoLevelArena`].
///
/// Owned by one thread and passed to the arena by `&mut`. A fresh cache
/// holds no chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkCache {
    region: RegionId,
    generation: u64,
    cursor: usize,
    end: usize,
    global_claims: u64,
}

impl ChunkCache {
    /// An empty cache with no chunk.
    pub const fn new() -> Self {
        Self {
            region: RegionId::NONE,
            generation: 0,
            cursor: 0,
            end: 0,
            global_claims: 0,
        }
    }

    /// How many times this cache has claimed from the shared counter
    /// (chunk refills plus oversized direct claims).
    pub fn global_claims(&self) -> u64 {
        self.global_claims
    }

    /// Bytes left in the current chunk.
    pub fn remaining(&self) -> usize {
        self.end - self.cursor
    }

    /// Whether the cache currently holds a chunk (possibly a stale one).
    pub fn has_chunk(&self) -> bool {
        !self.region.is_none()
    }

    /// Drop the current chunk. The next allocation refills.
    ///
    /// The unused tail of the chunk is not returned to the arena.
    pub fn invalidate(&mut self) {
        self.region = RegionId::NONE;
        self.cursor = 0;
        self.end = 0;
    }

    fn bump(&mut self, size: usize, align: usize) -> Option<usize> {
        let start = round_up(self.cursor, align)?;
        let end = start.checked_add(size)?;
        if end > self.end {
            return None;
        }
        self.cursor = end;
        Some(start)
    }
}

impl Default for ChunkCache {
    fn default() -> Self {
        Self::new()
    }
}

/// A bump allocator that serves most requests from per-thread chunks.
///
/// `allocate` takes `&self`; any number of threads may call it at once,
/// each with its own [`ChunkCache`]. Chunks claimed by different caches
/// never overlap.
#[derive(Debug)]
pub struct TwoLevelArena {
    region: BackingRegion,
    counter: GlobalCounter,
    generation: u64,
    min_chunk: usize,
    max_chunk: usize,
}

impl TwoLevelArena {
    /// Allocate a volatile region and chunk bounds from `config`.
    pub fn new(config: &ArenaConfig) -> Result<Self, ArenaError> {
        config.validate()?;
        let region = BackingRegion::volatile(config.capacity)?;
        let arena = Self {
            counter: GlobalCounter::new(region.capacity()),
            region,
            generation: 0,
            min_chunk: config.min_chunk,
            max_chunk: config.max_chunk,
        };
        debug!(
            region = %arena.region.id(),
            capacity = arena.region.capacity(),
            min_chunk = arena.min_chunk,
            max_chunk = arena.max_chunk,
            "two-level arena ready"
        );
        Ok(arena)
    }

    /// Allocate room for `count` contiguous `T`s out of `cache`.
    ///
    /// Refills the cache from the shared counter when it is empty, stale
    /// or too small. Returns the null handle when the refill does not
    /// fit; the failed claim leaves the arena exhausted until
    /// [`reset`](Self::reset) and the cache keeps its previous chunk.
    #[must_use]
    #[inline]
    pub fn allocate<T>(&self, cache: &mut ChunkCache, count: usize) -> Handle<T> {
        const {
            assert!(
                align_of::<T>() <= CHUNK_ALIGN,
                "two-level allocations are at most cache-line aligned"
            )
        };
        debug_assert!(count >= 1, "allocate called with count 0");
        let align = align_of::<T>();
        let Some(size) = size_of::<T>()
            .checked_mul(count)
            .and_then(|bytes| round_up(bytes, align))
        else {
            return Handle::NULL;
        };
        if size > self.max_chunk {
            return self.allocate_direct(cache, size);
        }

        if !self.owns(cache) {
            cache.invalidate();
        }
        if let Some(offset) = cache.bump(size, align) {
            return Handle::new(offset as u32, self.region.id());
        }
        if !self.refill(cache, size) {
            return Handle::NULL;
        }
        match cache.bump(size, align) {
            Some(offset) => Handle::new(offset as u32, self.region.id()),
            None => Handle::NULL,
        }
    }

    /// Allocate `len` raw bytes.
    #[must_use]
    pub fn allocate_bytes(&self, cache: &mut ChunkCache, len: usize) -> Handle<u8> {
        self.allocate::<u8>(cache, len.max(1))
    }

    /// The refill size for a request of `size` bytes.
    pub fn chunk_size_for(&self, size: usize) -> usize {
        let wanted = size.saturating_mul(2).min(self.max_chunk).max(self.min_chunk);
        // Bounds are validated multiples of 64, so this only rounds `2 * size`.
        round_up(wanted, CHUNK_ALIGN).unwrap_or(self.max_chunk)
    }

    /// Rewind the shared counter and invalidate every cache filled so far.
    ///
    /// Caches are not touched here; each one notices the new generation
    /// on its next allocation and refills. Use
    /// [`reset_all`](Self::reset_all) to also clear a registry eagerly.
    pub fn reset(&mut self) {
        let stats = self.counter.stats();
        self.counter.reset();
        self.generation += 1;
        debug!(
            region = %self.region.id(),
            generation = self.generation,
            used = stats.used,
            exhausted = stats.exhausted,
            "two-level arena reset"
        );
    }

    /// [`reset`](Self::reset), then drop every chunk held in `registry`.
    pub fn reset_all<K>(&mut self, registry: &mut ChunkRegistry<K>)
    where
        K: std::hash::Hash + Eq,
    {
        self.reset();
        registry.invalidate_all();
    }

    /// The region handles resolve against.
    pub fn region(&self) -> &BackingRegion {
        &self.region
    }

    /// Reset generation; starts at 0 and increments on every reset.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Smallest refill chunk.
    pub fn min_chunk(&self) -> usize {
        self.min_chunk
    }

    /// Largest refill chunk; bigger requests bypass the cache.
    pub fn max_chunk(&self) -> usize {
        self.max_chunk
    }

    /// Whether a claim has failed since the last reset.
    pub fn is_exhausted(&self) -> bool {
        self.counter.is_exhausted()
    }

    /// Usage snapshot of the shared counter. Unused chunk tails count as used.
    pub fn stats(&self) -> ArenaStats {
        self.counter.stats()
    }

    fn owns(&self, cache: &ChunkCache) -> bool {
        cache.region == self.region.id() && cache.generation == self.generation
    }

    fn refill(&self, cache: &mut ChunkCache, size: usize) -> bool {
        let chunk = self.chunk_size_for(size);
        let Some(offset) = self.counter.claim(chunk as u64) else {
            return false;
        };
        cache.global_claims += 1;
        cache.region = self.region.id();
        cache.generation = self.generation;
        cache.cursor = offset as usize;
        cache.end = offset as usize + chunk;
        trace!(region = %self.region.id(), offset, chunk, requested = size, "chunk refill");
        true
    }

    fn allocate_direct<T>(&self, cache: &mut ChunkCache, size: usize) -> Handle<T> {
        let Some(claim) = round_up(size, CHUNK_ALIGN) else {
            return Handle::NULL;
        };
        match self.counter.claim(claim as u64) {
            Some(offset) => {
                cache.global_claims += 1;
                trace!(region = %self.region.id(), offset, size = claim, "direct claim");
                Handle::new(offset as u32, self.region.id())
            }
            None => Handle::NULL,
        }
    }
}

const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<TwoLevelArena>();
    assert::<ChunkCache>();
};

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: usize = 1024;
    const MAX: usize = 16 * 1024;

    fn arena(capacity: usize) -> TwoLevelArena {
        TwoLevelArena::new(&ArenaConfig::new(capacity).with_chunk_bounds(MIN, MAX)).unwrap()
    }

    #[test]
    fn first_allocation_refills_then_stays_local() {
        let arena = arena(1 << 20);
        let mut cache = ChunkCache::new();
        assert!(!cache.has_chunk());
        let a = arena.allocate::<u64>(&mut cache, 1);
        let b = arena.allocate::<u64>(&mut cache, 1);
        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 8);
        assert_eq!(cache.global_claims(), 1);
        assert_eq!(cache.remaining(), MIN - 16);
        assert_eq!(arena.stats().used, MIN as u64);
    }

    #[test]
    fn chunk_size_adapts_to_request() {
        let arena = arena(1 << 20);
        assert_eq!(arena.chunk_size_for(8), MIN);
        assert_eq!(arena.chunk_size_for(MIN), 2 * MIN);
        assert_eq!(arena.chunk_size_for(1000), 2048);
        assert_eq!(arena.chunk_size_for(MAX), MAX);
        assert_eq!(arena.chunk_size_for(usize::MAX), MAX);
    }

    #[test]
    fn cursor_aligns_for_each_type() {
        let arena = arena(1 << 20);
        let mut cache = ChunkCache::new();
        let a = arena.allocate::<u8>(&mut cache, 3);
        let b = arena.allocate::<u64>(&mut cache, 1);
        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 8);
        assert!(b.resolve(arena.region()).is_some());
    }

    #[repr(align(64))]
    struct Line([u8; 64]);

    #[test]
    fn cache_line_aligned_types() {
        let arena = arena(1 << 20);
        let mut cache = ChunkCache::new();
        let _ = arena.allocate::<u8>(&mut cache, 1);
        let h = arena.allocate::<Line>(&mut cache, 2);
        assert_eq!(h.offset(), 64);
        assert!(h.resolve_slice(arena.region(), 2).is_some());
    }

    #[test]
    fn separate_caches_get_disjoint_chunks() {
        let arena = arena(1 << 20);
        let mut a = ChunkCache::new();
        let mut b = ChunkCache::new();
        let ha = arena.allocate::<u32>(&mut a, 1);
        let hb = arena.allocate::<u32>(&mut b, 1);
        assert_eq!(ha.offset(), 0);
        assert_eq!(hb.offset() as usize, MIN);
    }

    #[test]
    fn oversized_requests_bypass_the_chunk() {
        let arena = arena(1 << 20);
        let mut cache = ChunkCache::new();
        let small = arena.allocate::<u8>(&mut cache, 16);
        let remaining = cache.remaining();
        let big = arena.allocate::<u8>(&mut cache, MAX + 1);
        assert_eq!(big.offset() as usize, MIN);
        assert_eq!(cache.remaining(), remaining);
        assert_eq!(cache.global_claims(), 2);
        let next = arena.allocate::<u8>(&mut cache, 16);
        assert_eq!(next.offset(), small.offset() + 16);
        assert_eq!(arena.stats().used as usize, MIN + MAX + 64);
    }

    #[test]
    fn refill_amortises_over_two_allocations() {
        let arena = arena(1 << 20);
        let mut cache = ChunkCache::new();
        let size = MIN + 64;
        let m: usize = 9;
        for _ in 0..m {
            assert!(!arena.allocate::<u8>(&mut cache, size).is_null());
        }
        assert_eq!(cache.global_claims(), m.div_ceil(2) as u64);
    }

    #[test]
    fn exhaustion_returns_null_and_sticks() {
        let arena = arena(8 * 1024);
        let mut cache = ChunkCache::new();
        let mut count = 0;
        while !arena.allocate::<[u8; 512]>(&mut cache, 1).is_null() {
            count += 1;
        }
        assert_eq!(count, 16);
        assert!(arena.is_exhausted());
        let mut fresh = ChunkCache::new();
        assert!(arena.allocate::<u8>(&mut fresh, 1).is_null());
    }

    #[test]
    fn failed_refill_keeps_old_chunk() {
        // One page holds four minimum chunks.
        let arena = arena(4 * MIN);
        let mut cache = ChunkCache::new();
        let _ = arena.allocate::<u8>(&mut cache, 480);
        let _ = arena.allocate::<u8>(&mut cache, 480);
        assert_eq!(cache.global_claims(), 1);
        for _ in 0..3 {
            let _ = arena.allocate::<u8>(&mut ChunkCache::new(), 1);
        }
        assert_eq!(arena.stats().remaining, 0);
        // Next request does not fit the 64-byte tail and the refill fails.
        assert!(arena.allocate::<u8>(&mut cache, 128).is_null());
        assert_eq!(cache.remaining(), 64);
        // The tail is still usable.
        assert!(!arena.allocate::<u8>(&mut cache, 64).is_null());
    }

    #[test]
    fn stale_cache_refills_after_reset() {
        let mut arena = arena(1 << 20);
        let mut cache = ChunkCache::new();
        let _ = arena.allocate::<u8>(&mut cache, 100);
        let _ = arena.allocate::<u8>(&mut ChunkCache::new(), 100);
        assert_eq!(arena.stats().used as usize, 2 * MIN);

        arena.reset();
        assert_eq!(arena.generation(), 1);
        let h = arena.allocate::<u8>(&mut cache, 8);
        assert_eq!(h.offset(), 0);
        assert_eq!(cache.global_claims(), 2);
    }

    #[test]
    fn cache_from_another_arena_is_ignored() {
        let a = arena(1 << 20);
        let b = arena(1 << 20);
        let mut cache = ChunkCache::new();
        let _ = a.allocate::<u8>(&mut cache, 8);
        let _ = a.allocate::<u8>(&mut ChunkCache::new(), 8);
        let h = b.allocate::<u8>(&mut cache, 8);
        assert_eq!(h.region(), b.region().id());
        assert_eq!(h.offset(), 0);
        assert!(h.resolve(a.region()).is_none());
    }

    #[test]
    fn reset_all_clears_registry() {
        let mut arena = arena(1 << 20);
        let mut registry = ChunkRegistry::new();
        for key in 0..3u32 {
            let _ = arena.allocate::<u8>(registry.context(key), 8);
        }
        arena.reset_all(&mut registry);
        assert!(registry.iter().all(|(_, cache)| !cache.has_chunk()));
        let h = arena.allocate::<u8>(registry.context(2), 8);
        assert_eq!(h.offset(), 0);
    }

    #[test]
    fn real_threads_get_disjoint_ranges() {
        use std::thread;

        let arena = arena(4 << 20);
        let per_thread: Vec<Vec<(u32, u32)>> = thread::scope(|s| {
            let workers: Vec<_> = (0..4)
                .map(|t| {
                    let arena = &arena;
                    s.spawn(move || {
                        let mut cache = ChunkCache::new();
                        (0..2000)
                            .map(|i| {
                                let len = 1 + (i * 7 + t * 13) % 200;
                                let h = arena.allocate::<u8>(&mut cache, len);
                                assert!(!h.is_null());
                                (h.offset(), h.offset() + len as u32)
                            })
                            .collect()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });
        let mut ranges: Vec<_> = per_thread.into_iter().flatten().collect();
        ranges.sort_unstable();
        assert!(ranges.windows(2).all(|w| w[0].1 <= w[1].0));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn virtual_threads_never_overlap(
                ops in prop::collection::vec((0u8..4, 1usize..3000), 1..200),
            ) {
                let arena = arena(4 << 20);
                let mut registry = ChunkRegistry::new();
                let mut ranges = Vec::new();
                for (thread, len) in ops {
                    let h = arena.allocate::<u8>(registry.context(thread), len);
                    prop_assert!(!h.is_null());
                    prop_assert!(h.resolve_slice(arena.region(), len).is_some());
                    ranges.push((h.offset() as usize, h.offset() as usize + len));
                }
                ranges.sort_unstable();
                for pair in ranges.windows(2) {
                    prop_assert!(pair[0].1 <= pair[1].0);
                }
            }

            #[test]
            fn refills_bounded_by_half_for_large_objects(
                size in (MIN + 1)..=(MAX / 2),
                m in 1usize..40,
            ) {
                let arena = arena(4 << 20);
                let mut cache = ChunkCache::new();
                for _ in 0..m {
                    prop_assert!(!arena.allocate::<u8>(&mut cache, size).is_null());
                }
                prop_assert!(cache.global_claims() <= m.div_ceil(2) as u64);
            }
        }
    }
}
