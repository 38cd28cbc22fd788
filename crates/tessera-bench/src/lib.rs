//! Benchmark profiles for the Tessera arena subsystem.
//!
//! - [`bench_config`]: a region large enough that no benchmark iteration
//!   batch exhausts it before the arena is reset.
//! - [`RECORD_SIZES`]: payload sizes spanning one cache line to one page.

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use tessera_arena::ArenaConfig;

/// Region size for allocation benchmarks: 256 MiB.
pub const BENCH_CAPACITY: usize = 256 * 1024 * 1024;

/// Payload sizes exercised by the allocation benchmarks.
pub const RECORD_SIZES: [usize; 4] = [16, 64, 512, 4096];

/// Arena config used by every allocation benchmark.
///
/// Chunk bounds are the library defaults (64 KiB / 1 MiB).
pub fn bench_config() -> ArenaConfig {
    ArenaConfig::new(BENCH_CAPACITY)
}

/// Allocations per measured batch before the arena is reset.
pub fn batch_len(record_size: usize) -> usize {
    (BENCH_CAPACITY / 4 / record_size.max(1)).min(100_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bench_config_is_valid() {
        assert!(bench_config().validate().is_ok());
    }

    #[test]
    fn batches_fit_in_capacity() {
        for size in RECORD_SIZES {
            assert!(batch_len(size) * size * 2 <= BENCH_CAPACITY);
        }
    }

    #[test]
    fn one_batch_never_exhausts_either_arena() {
        use tessera_arena::{ChunkCache, SingleLevelArena, TwoLevelArena};

        for size in [RECORD_SIZES[0], RECORD_SIZES[3]] {
            let single = SingleLevelArena::new(&bench_config()).unwrap();
            assert!((0..batch_len(size)).all(|_| !single.allocate::<u8>(size).is_null()));

            let two = TwoLevelArena::new(&bench_config()).unwrap();
            let mut cache = ChunkCache::new();
            assert!((0..batch_len(size)).all(|_| !two.allocate::<u8>(&mut cache, size).is_null()));
        }
    }
}
