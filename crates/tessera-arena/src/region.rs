//! Contiguous, page-aligned backing memory.
//!
//! A [`BackingRegion`] owns the bytes every handle points into. It is
//! either volatile (a zeroed heap block) or durable (a file mapped shared
//! read/write). The base address is fixed for the region's whole life:
//! regions are never moved, grown or shrunk, which is what lets a
//! [`Handle`] be a bare offset.
//!
//! # Shared access
//!
//! Regions are `Send + Sync` and hand out raw access through `&self`.
//! Nothing synchronises writers: each allocation owns a disjoint byte
//! range (the counter guarantees that), and the typed accessors here are
//! `unsafe` because only the caller can promise that nobody else is
//! reading or writing the same range at the same time.

#![allow(unsafe_code)]

use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use memmap2::{MmapMut, MmapOptions};
use tessera_core::{round_up, ArenaError, RegionId, MAX_REGION_CAPACITY, PAGE_SIZE};
use tracing::{debug, trace, warn};

use crate::config::validate_capacity;
use crate::handle::Handle;
use crate::raw::PageBlock;

/// How [`BackingRegion::flush`] hands dirty pages to the kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushMode {
    /// Block until the pages are written (`msync(MS_SYNC)`).
    Sync,
    /// Schedule write-back and return immediately (`msync(MS_ASYNC)`).
    Async,
}

enum Storage {
    Heap {
        // Owns the allocation `base` points into.
        _block: PageBlock,
    },
    Mapped {
        mmap: MmapMut,
        path: PathBuf,
        // Keeps the descriptor open for the life of the mapping.
        _file: File,
    },
}

/// A fixed-size block of memory that handles resolve against.
pub struct BackingRegion {
    id: RegionId,
    base: NonNull<u8>,
    capacity: usize,
    storage: Storage,
}

// SAFETY: the region owns its storage outright; `base` points into memory
// that lives exactly as long as `self`. All byte access goes through
// `unsafe` methods whose contracts require callers to own disjoint ranges,
// so sharing `&BackingRegion` across threads adds no unsynchronised access
// that the caller has not explicitly taken responsibility for.
unsafe impl Send for BackingRegion {}
// SAFETY: see `Send` above.
unsafe impl Sync for BackingRegion {}

impl BackingRegion {
    /// Allocate a zero-filled volatile region of at least `capacity` bytes.
    ///
    /// The capacity is rounded up to a page multiple.
    pub fn volatile(capacity: usize) -> Result<Self, ArenaError> {
        validate_capacity(capacity)?;
        let rounded = page_round(capacity)?;
        let block = PageBlock::alloc_zeroed(rounded)?;
        let region = Self {
            id: RegionId::next(),
            base: block.as_ptr(),
            capacity: block.len(),
            storage: Storage::Heap { _block: block },
        };
        debug!(region = %region.id, capacity = region.capacity, "volatile region allocated");
        Ok(region)
    }

    /// Create (or truncate) `path`, pre-extend it to `capacity` bytes
    /// rounded up to a page, and map it shared read/write.
    pub fn create_mapped(path: &Path, capacity: usize) -> Result<Self, ArenaError> {
        validate_capacity(capacity)?;
        let rounded = page_round(capacity)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| ArenaError::io("open", path, e))?;
        file.set_len(rounded as u64)
            .map_err(|e| ArenaError::io("set_len", path, e))?;
        let region = Self::map(file, path, rounded)?;
        debug!(region = %region.id, path = %path.display(), capacity = rounded, "durable region created");
        Ok(region)
    }

    /// Map an existing file shared read/write, using its current length as
    /// the capacity.
    pub fn open_mapped(path: &Path) -> Result<Self, ArenaError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| ArenaError::io("open", path, e))?;
        let len = file
            .metadata()
            .map_err(|e| ArenaError::io("metadata", path, e))?
            .len();
        let capacity = usize::try_from(len).unwrap_or(usize::MAX);
        if capacity == 0 || capacity % PAGE_SIZE != 0 || capacity > MAX_REGION_CAPACITY {
            return Err(ArenaError::Corrupt {
                offset: 0,
                reason: format!(
                    "journal length {len} is not a non-zero page multiple within the handle limit"
                ),
            });
        }
        let region = Self::map(file, path, capacity)?;
        debug!(region = %region.id, path = %path.display(), capacity, "durable region reopened");
        Ok(region)
    }

    fn map(file: File, path: &Path, capacity: usize) -> Result<Self, ArenaError> {
        // SAFETY: the file was just opened read/write by us and sized to
        // `capacity`. Concurrent truncation by another process is outside
        // the raw mapping contract this region offers.
        let mut mmap = unsafe { MmapOptions::new().len(capacity).map_mut(&file) }
            .map_err(|e| ArenaError::io("mmap", path, e))?;
        let base = NonNull::new(mmap.as_mut_ptr()).ok_or_else(|| ArenaError::Corrupt {
            offset: 0,
            reason: "mapping returned a null base".into(),
        })?;
        Ok(Self {
            id: RegionId::next(),
            base,
            capacity,
            storage: Storage::Mapped {
                mmap,
                path: path.to_path_buf(),
                _file: file,
            },
        })
    }

    /// This region's process-unique identity.
    pub fn id(&self) -> RegionId {
        self.id
    }

    /// Size in bytes (always a page multiple).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The stable base address.
    pub fn base_ptr(&self) -> NonNull<u8> {
        self.base
    }

    /// Whether this region is backed by a mapped file.
    pub fn is_durable(&self) -> bool {
        matches!(self.storage, Storage::Mapped { .. })
    }

    /// The backing file of a durable region.
    pub fn path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::Heap { .. } => None,
            Storage::Mapped { path, .. } => Some(path),
        }
    }

    /// Whether `[offset, offset + len)` lies inside the region.
    pub fn contains(&self, offset: usize, len: usize) -> bool {
        offset
            .checked_add(len)
            .is_some_and(|end| end <= self.capacity)
    }

    /// Resolve a handle to a pointer. Same as [`Handle::resolve`].
    pub fn resolve<T>(&self, handle: Handle<T>) -> Option<NonNull<T>> {
        handle.resolve(self)
    }

    /// Store `value` at `handle`. Returns `false` if the handle does not
    /// resolve against this region.
    ///
    /// # Safety
    ///
    /// The caller must own the handle's range: no other thread may read
    /// or write those bytes until this call returns.
    pub unsafe fn write<T: Copy>(&self, handle: Handle<T>, value: T) -> bool {
        match handle.resolve(self) {
            Some(ptr) => {
                // SAFETY: `resolve` checked bounds and alignment; the
                // caller guarantees exclusive access to the range.
                unsafe { ptr.as_ptr().write(value) };
                true
            }
            None => false,
        }
    }

    /// Copy the value at `handle` out of the region.
    ///
    /// `T: Pod` makes every byte pattern (including unwritten zeroes) a
    /// valid `T`, so a read never produces an invalid value.
    ///
    /// # Safety
    ///
    /// No other thread may be writing the handle's range concurrently.
    pub unsafe fn read<T: bytemuck::Pod>(&self, handle: Handle<T>) -> Option<T> {
        let ptr = handle.resolve(self)?;
        // SAFETY: in bounds and aligned per `resolve`; `T: Pod` accepts
        // any bytes; the caller excludes concurrent writers.
        Some(unsafe { ptr.as_ptr().read() })
    }

    /// Borrow `len` bytes starting at `handle`.
    ///
    /// # Safety
    ///
    /// No other thread may write the range while the slice is alive.
    pub unsafe fn bytes<T>(&self, handle: Handle<T>, len: usize) -> Option<&[u8]> {
        let ptr = self.byte_range(handle, len)?;
        // SAFETY: `byte_range` checked the range; the caller excludes
        // writers for the slice lifetime.
        Some(unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) })
    }

    /// Mutably borrow `len` bytes starting at `handle`.
    ///
    /// # Safety
    ///
    /// The caller must own the range: no other slice, reference or raw
    /// access to these bytes may be live while the returned slice is.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn bytes_mut<T>(&self, handle: Handle<T>, len: usize) -> Option<&mut [u8]> {
        let ptr = self.byte_range(handle, len)?;
        // SAFETY: `byte_range` checked the range; the caller guarantees
        // exclusivity for the slice lifetime.
        Some(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), len) })
    }

    /// View the whole region. `&mut self` proves no shared borrower is
    /// allocating or writing.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `base..base + capacity` is owned by `self` and the
        // exclusive borrow rules out concurrent access through `&self`.
        unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr(), self.capacity) }
    }

    /// Push dirty pages of a durable region to its file. A no-op for
    /// volatile regions.
    pub fn flush(&self, mode: FlushMode) -> Result<(), ArenaError> {
        self.flush_range(0, self.capacity, mode)
    }

    /// Flush only `[offset, offset + len)`.
    pub fn flush_range(&self, offset: usize, len: usize, mode: FlushMode) -> Result<(), ArenaError> {
        let Storage::Mapped { mmap, path, .. } = &self.storage else {
            return Ok(());
        };
        if !self.contains(offset, len) {
            return Err(ArenaError::invalid_config(format!(
                "flush range {offset}+{len} exceeds capacity {}",
                self.capacity
            )));
        }
        trace!(region = %self.id, offset, len, ?mode, "flush");
        let result = match mode {
            FlushMode::Sync => mmap.flush_range(offset, len),
            FlushMode::Async => mmap.flush_async_range(offset, len),
        };
        result.map_err(|e| ArenaError::io("flush", path.as_path(), e))
    }

    fn byte_range<T>(&self, handle: Handle<T>, len: usize) -> Option<NonNull<u8>> {
        if handle.is_null() || handle.region() != self.id {
            return None;
        }
        let offset = handle.offset() as usize;
        if !self.contains(offset, len) {
            return None;
        }
        NonNull::new(self.base.as_ptr().wrapping_add(offset))
    }
}

impl Drop for BackingRegion {
    fn drop(&mut self) {
        if let Storage::Mapped { mmap, path, .. } = &self.storage {
            if let Err(e) = mmap.flush() {
                warn!(region = %self.id, path = %path.display(), error = %e, "flush on close failed");
            }
        }
    }
}

impl fmt::Debug for BackingRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackingRegion")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("durable", &self.is_durable())
            .finish()
    }
}

fn page_round(capacity: usize) -> Result<usize, ArenaError> {
    round_up(capacity, PAGE_SIZE)
        .filter(|&c| c <= MAX_REGION_CAPACITY)
        .ok_or_else(|| ArenaError::invalid_config(format!("capacity {capacity} overflows page rounding")))
}
