//! File-backed arena with crash-recoverable records.
//!
//! A [`DurableArena`] is a single-level bump allocator over a mapped
//! journal file. Every allocation is a record: a [`RecordHeader`] followed
//! by the payload, padded to 64 bytes. The allocation itself is the same
//! single `fetch_add` as [`SingleLevelArena`](crate::SingleLevelArena).
//!
//! # Commit protocol
//!
//! [`allocate`](DurableArena::allocate) clears the slot's magic word and
//! hands out a [`PendingRecord`] with exclusive access to the payload.
//! [`commit`](PendingRecord::commit) writes the header fields, then
//! stores the magic word last with `Release` ordering. A crash before the
//! magic store leaves a zero-magic slot that recovery treats as the end of
//! the journal. The payload CRC catches records whose pages only partly
//! reached the disk. A header is 64-byte aligned and never straddles a
//! page.
//!
//! Records become durable only after [`flush`](DurableArena::flush).

#![allow(unsafe_code)]

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tessera_core::ArenaError;
use tracing::{debug, warn};

use crate::config::DurableConfig;
use crate::counter::{ArenaStats, GlobalCounter};
use crate::handle::Handle;
use crate::record::{checksum, record_size, RecordHeader, HEADER_SIZE, MAGIC, MAGIC_OFFSET};
use crate::recovery::{highest_generation, scan, RecoveryReport, Scan};
use crate::region::{BackingRegion, FlushMode};

/// A bump arena whose records survive process exit once flushed.
#[derive(Debug)]
pub struct DurableArena {
    region: BackingRegion,
    counter: GlobalCounter,
    generation: u32,
}

impl DurableArena {
    /// Create (or truncate) the journal at `config.path`, pre-extended to
    /// the page-rounded capacity.
    pub fn create(config: &DurableConfig) -> Result<Self, ArenaError> {
        config.validate()?;
        let region = BackingRegion::create_mapped(config.path(), config.capacity)?;
        Ok(Self {
            counter: GlobalCounter::new(region.capacity()),
            region,
            generation: 0,
        })
    }

    /// Reopen an existing journal and recover its write cursor.
    ///
    /// `config.capacity` is ignored; the file length is the capacity. New
    /// records are stamped with a generation above every intact record in
    /// the file, recovered or not, so leftovers past the recovered cursor
    /// can never be mistaken for new data. This holds after a
    /// [`reset`](Self::reset) too, where nothing is recovered but the old
    /// generation's records are still on disk.
    pub fn open(config: &DurableConfig) -> Result<(Self, RecoveryReport), ArenaError> {
        if config.path().as_os_str().is_empty() {
            return Err(ArenaError::invalid_config("journal path is empty"));
        }
        let mut region = BackingRegion::open_mapped(config.path())?;
        let bytes = region.as_mut_slice();
        let report = scan(bytes).finish();
        let generation = report
            .generation
            .max(highest_generation(bytes))
            .map_or(0, |g| g.saturating_add(1));
        debug!(
            path = %config.path().display(),
            records = report.records,
            cursor = report.cursor,
            generation,
            stop = ?report.stop,
            "journal recovered"
        );
        if !report.stop.is_clean() {
            warn!(
                path = %config.path().display(),
                offset = report.cursor,
                stop = ?report.stop,
                "discarding damaged journal tail"
            );
        }
        let arena = Self {
            counter: GlobalCounter::with_start(region.capacity(), report.cursor),
            region,
            generation,
        };
        Ok((arena, report))
    }

    /// Reserve a record with a `payload_len`-byte payload.
    ///
    /// Returns `None` when the record does not fit; like the volatile
    /// arenas, the failed claim leaves the journal exhausted until
    /// [`reset`](Self::reset).
    pub fn allocate(&self, payload_len: usize) -> Option<PendingRecord<'_>> {
        let size = record_size(payload_len)?;
        let offset = self.counter.claim(size as u64)? as usize;
        // SAFETY: the claim gave this call exclusive ownership of
        // `offset..offset + size`, which lies inside the region. The slot
        // offset is a multiple of 64, so the magic word is 4-byte aligned.
        let magic = unsafe { self.magic_word(offset) };
        magic.store(0, Ordering::Relaxed);
        Some(PendingRecord {
            region: &self.region,
            generation: self.generation,
            offset,
            len: payload_len,
        })
    }

    /// Allocate, copy `payload`, and commit in one step.
    pub fn append(&self, payload: &[u8]) -> Option<Handle<u8>> {
        let mut record = self.allocate(payload.len())?;
        record.payload_mut().copy_from_slice(payload);
        Some(record.commit())
    }

    /// Write dirty pages back to the journal file.
    pub fn flush(&self, mode: FlushMode) -> Result<(), ArenaError> {
        self.region.flush(mode)
    }

    /// Write back only `[offset, offset + len)`.
    pub fn flush_range(&self, offset: usize, len: usize, mode: FlushMode) -> Result<(), ArenaError> {
        self.region.flush_range(offset, len, mode)
    }

    /// Iterate the records currently recoverable from the journal.
    ///
    /// Takes `&mut self` so no allocation can race the scan.
    pub fn records(&mut self) -> Scan<'_> {
        scan(self.region.as_mut_slice())
    }

    /// Rewind to offset 0 and start a new generation.
    ///
    /// Clears the first slot's magic so a crash right after the reset
    /// recovers an empty journal. Records from the previous generation
    /// past the new cursor are never recovered.
    pub fn reset(&mut self) {
        let stats = self.counter.stats();
        self.counter.reset();
        self.generation = self.generation.saturating_add(1);
        self.region.as_mut_slice()[MAGIC_OFFSET..MAGIC_OFFSET + 4].fill(0);
        debug!(
            path = ?self.region.path(),
            generation = self.generation,
            used = stats.used,
            "durable arena reset"
        );
    }

    /// Generation stamped into new records.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// The mapped region; committed handles resolve against it.
    pub fn region(&self) -> &BackingRegion {
        &self.region
    }

    /// The journal file.
    pub fn path(&self) -> Option<&Path> {
        self.region.path()
    }

    /// Whether an allocation has failed since the last reset.
    pub fn is_exhausted(&self) -> bool {
        self.counter.is_exhausted()
    }

    /// Usage snapshot.
    pub fn stats(&self) -> ArenaStats {
        self.counter.stats()
    }

    /// # Safety
    ///
    /// `offset` must be the start of a record slot inside the region.
    unsafe fn magic_word(&self, offset: usize) -> &AtomicU32 {
        // SAFETY: the caller guarantees the slot lies inside the region;
        // slot offsets are multiples of 64 on a page-aligned base, so the
        // word at +28 is aligned for `AtomicU32`.
        unsafe {
            let ptr = self.region.base_ptr().as_ptr().add(offset + MAGIC_OFFSET);
            AtomicU32::from_ptr(ptr.cast::<u32>())
        }
    }
}

const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<DurableArena>();
    assert::<PendingRecord<'static>>();
};

/// A reserved but not yet committed record.
///
/// Dropping it without [`commit`](Self::commit) leaves a zero-magic slot,
/// which recovery reads as the end of the journal.
#[derive(Debug)]
#[must_use = "an uncommitted record is lost on recovery"]
pub struct PendingRecord<'a> {
    region: &'a BackingRegion,
    generation: u32,
    offset: usize,
    len: usize,
}

impl PendingRecord<'_> {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of the record header in the journal.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The payload. Holds whatever bytes the slot had before; zero on a
    /// fresh journal.
    pub fn payload(&self) -> &[u8] {
        // SAFETY: the payload range was claimed exclusively by `allocate`
        // and lies inside the region; this record is its only accessor.
        unsafe { std::slice::from_raw_parts(self.payload_ptr(), self.len) }
    }

    /// Mutable access to the payload.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `payload`; `&mut self` makes the borrow unique.
        unsafe { std::slice::from_raw_parts_mut(self.payload_ptr(), self.len) }
    }

    /// Commit with the current wall-clock time.
    pub fn commit(self) -> Handle<u8> {
        let timestamp_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));
        self.commit_at(timestamp_ns)
    }

    /// Write the header with `timestamp_ns`, then publish the magic word.
    ///
    /// Returns a handle to the first payload byte.
    pub fn commit_at(self, timestamp_ns: u64) -> Handle<u8> {
        let mut header = RecordHeader::new(self.payload(), timestamp_ns, self.generation);
        header.magic = 0;
        let bytes = bytemuck::bytes_of(&header);
        let base = self.region.base_ptr().as_ptr();
        // SAFETY: the header range is part of the exclusively claimed slot.
        // Everything up to the magic word is written plainly; the magic
        // word is then published with a release store so any reader that
        // sees it also sees the header and payload.
        unsafe {
            let dst = base.add(self.offset);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, MAGIC_OFFSET);
            AtomicU32::from_ptr(dst.add(MAGIC_OFFSET).cast::<u32>()).store(MAGIC, Ordering::Release);
        }
        debug_assert_eq!(checksum(self.payload()), header.checksum);
        Handle::new((self.offset + HEADER_SIZE) as u32, self.region.id())
    }

    fn payload_ptr(&self) -> *mut u8 {
        self.region
            .base_ptr()
            .as_ptr()
            .wrapping_add(self.offset + HEADER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RECORD_ALIGN;
    use crate::recovery::ScanStop;
    use tessera_core::PAGE_SIZE;

    fn config(dir: &tempfile::TempDir, capacity: usize) -> DurableConfig {
        DurableConfig::new(dir.path().join("journal.bin")).with_capacity(capacity)
    }

    #[test]
    fn create_preextends_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir, 5000);
        let arena = DurableArena::create(&config).unwrap();
        assert_eq!(std::fs::metadata(config.path()).unwrap().len(), 2 * PAGE_SIZE as u64);
        assert_eq!(arena.path(), Some(config.path()));
        assert_eq!(arena.generation(), 0);
    }

    #[test]
    fn append_returns_payload_handle() {
        let dir = tempfile::tempdir().unwrap();
        let arena = DurableArena::create(&config(&dir, PAGE_SIZE)).unwrap();
        let a = arena.append(b"hello").unwrap();
        let b = arena.append(b"world").unwrap();
        assert_eq!(a.offset() as usize, HEADER_SIZE);
        assert_eq!(b.offset() as usize, RECORD_ALIGN + HEADER_SIZE);
        // SAFETY: single-threaded test; both records are committed.
        unsafe {
            assert_eq!(arena.region().bytes(a, 5).unwrap(), b"hello");
            assert_eq!(arena.region().bytes(b, 5).unwrap(), b"world");
        }
    }

    #[test]
    fn records_round_trip_through_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir, 4 * PAGE_SIZE);
        {
            let arena = DurableArena::create(&config).unwrap();
            let mut record = arena.allocate(3).unwrap();
            record.payload_mut().copy_from_slice(&[1, 2, 3]);
            record.commit_at(42);
            arena.append(&[9u8; 200]).unwrap();
            arena.flush(FlushMode::Sync).unwrap();
        }
        let (mut arena, report) = DurableArena::open(&config).unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.stop, ScanStop::EndOfData);
        assert_eq!(report.cursor, 64 + 256);
        assert_eq!(arena.generation(), 1);

        let records: Vec<_> = arena.records().collect();
        assert_eq!(records[0].header.timestamp_ns, 42);
        assert_eq!(records[0].header.payload_len, 3);
        assert_eq!(records[0].payload, &[1u8, 2, 3]);
        assert_eq!(records[1].payload, &[9u8; 200][..]);
        assert!(records[1].header.timestamp_ns > 0);
    }

    #[test]
    fn reopened_arena_appends_after_recovered_records() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir, PAGE_SIZE);
        DurableArena::create(&config).unwrap().append(b"one").unwrap();
        let (arena, _) = DurableArena::open(&config).unwrap();
        let h = arena.append(b"two").unwrap();
        assert_eq!(h.offset() as usize, RECORD_ALIGN + HEADER_SIZE);
        drop(arena);

        let (mut arena, report) = DurableArena::open(&config).unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.generation, Some(1));
        let payloads: Vec<_> = arena.records().map(|r| r.payload.to_vec()).collect();
        assert_eq!(payloads, [b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn uncommitted_record_ends_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir, PAGE_SIZE);
        {
            let arena = DurableArena::create(&config).unwrap();
            arena.append(b"kept").unwrap();
            let mut pending = arena.allocate(4).unwrap();
            pending.payload_mut().copy_from_slice(b"lost");
            drop(pending);
            arena.append(b"after gap").unwrap();
        }
        let (_, report) = DurableArena::open(&config).unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(report.cursor, RECORD_ALIGN as u64);
    }

    #[test]
    fn torn_payload_ends_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir, PAGE_SIZE);
        {
            let arena = DurableArena::create(&config).unwrap();
            arena.append(b"intact").unwrap();
            let torn = arena.append(b"torn record").unwrap();
            // SAFETY: single-threaded test; simulates a partial page write.
            unsafe { arena.region().bytes_mut(torn, 1).unwrap()[0] ^= 0xFF };
        }
        let (_, report) = DurableArena::open(&config).unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(report.stop, ScanStop::ChecksumMismatch);
    }

    #[test]
    fn reset_does_not_resurrect_old_records() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir, PAGE_SIZE);
        {
            let mut arena = DurableArena::create(&config).unwrap();
            for i in 0..5u8 {
                arena.append(&[i; 40]).unwrap();
            }
            arena.reset();
            assert_eq!(arena.generation(), 1);
            assert_eq!(arena.records().count(), 0);
            // Same slot size as the old records, so the next slot holds a
            // complete record from generation 0.
            arena.append(&[0xAA; 40]).unwrap();
        }
        let (mut arena, report) = DurableArena::open(&config).unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(report.stop, ScanStop::StaleGeneration);
        assert_eq!(report.generation, Some(1));
        assert_eq!(arena.records().next().unwrap().payload, &[0xAAu8; 40][..]);
    }

    #[test]
    fn reopen_after_reset_keeps_new_generation() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir, PAGE_SIZE);
        {
            let mut arena = DurableArena::create(&config).unwrap();
            for i in 0..5u8 {
                arena.append(&[i; 40]).unwrap();
            }
            arena.reset();
            arena.flush(FlushMode::Sync).unwrap();
        }
        let (mut arena, report) = DurableArena::open(&config).unwrap();
        assert_eq!(report.records, 0);
        assert_eq!(report.generation, None);
        assert_eq!(arena.generation(), 1);
        arena.append(&[0xAA; 40]).unwrap();
        assert_eq!(arena.records().count(), 1);
    }

    #[test]
    fn exhaustion_is_sticky_until_reset() {
        let dir = tempfile::tempdir().unwrap();
        let mut arena = DurableArena::create(&config(&dir, PAGE_SIZE)).unwrap();
        // Exactly fills the page: 32 + 4064 = 4096.
        assert!(arena.append(&[1u8; PAGE_SIZE - HEADER_SIZE]).is_some());
        assert!(arena.allocate(0).is_none());
        assert!(arena.is_exhausted());
        arena.reset();
        assert!(arena.append(b"again").is_some());
    }

    #[test]
    fn concurrent_appends_all_recover() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir, 1 << 20);
        {
            let arena = DurableArena::create(&config).unwrap();
            std::thread::scope(|s| {
                for t in 0..4u8 {
                    let arena = &arena;
                    s.spawn(move || {
                        for i in 0..100u8 {
                            assert!(arena.append(&[t, i, 0, 0, 0, 0, 0, 0]).is_some());
                        }
                    });
                }
            });
            arena.flush(FlushMode::Async).unwrap();
        }
        let (_, report) = DurableArena::open(&config).unwrap();
        assert_eq!(report.records, 400);
    }

    #[test]
    fn flush_range_checks_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let arena = DurableArena::create(&config(&dir, PAGE_SIZE)).unwrap();
        arena.append(b"x").unwrap();
        assert!(arena.flush_range(0, 64, FlushMode::Sync).is_ok());
        assert!(arena.flush_range(0, PAGE_SIZE + 1, FlushMode::Sync).is_err());
    }

    #[test]
    fn open_missing_journal_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = DurableArena::open(&config(&dir, PAGE_SIZE)).unwrap_err();
        assert!(matches!(err, ArenaError::Io { .. }));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;
        use tessera_test_utils::{payload, TempJournal};

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn reopen_recovers_every_flushed_record(
                lens in prop::collection::vec(0usize..300, 1..40),
            ) {
                let journal = TempJournal::new().unwrap();
                let config = DurableConfig::new(journal.path()).with_capacity(64 * 1024);
                let written: Vec<Vec<u8>> = lens
                    .iter()
                    .enumerate()
                    .map(|(i, &len)| payload(i as u64, len))
                    .collect();
                {
                    let arena = DurableArena::create(&config).unwrap();
                    for (i, bytes) in written.iter().enumerate() {
                        let mut record = arena.allocate(bytes.len()).unwrap();
                        record.payload_mut().copy_from_slice(bytes);
                        record.commit_at(i as u64);
                    }
                    arena.flush(FlushMode::Sync).unwrap();
                }
                let (mut arena, report) = DurableArena::open(&config).unwrap();
                prop_assert_eq!(report.records, written.len());
                for (i, (record, bytes)) in arena.records().zip(&written).enumerate() {
                    prop_assert_eq!(record.header.timestamp_ns, i as u64);
                    prop_assert_eq!(record.payload, bytes.as_slice());
                }
            }
        }
    }
}
