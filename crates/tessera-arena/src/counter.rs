//! The shared bump cursor.
//!
//! [`GlobalCounter`] is the only piece of state every allocating thread
//! writes. Each claim is a single relaxed `fetch_add`; two claims can
//! never observe overlapping ranges because the hardware serialises the
//! read-modify-write. Nothing else is published through the counter, so
//! no stronger ordering is needed.

use std::sync::atomic::{AtomicU64, Ordering};

use tessera_core::CachePadded;
use tracing::warn;

/// Monotonic atomic byte offset into a region.
///
/// The raw position may run past `capacity`: a failed claim still
/// advances it, which marks the counter exhausted for every later caller
/// until [`reset`](Self::reset).
#[derive(Debug)]
pub struct GlobalCounter {
    position: CachePadded<AtomicU64>,
    capacity: u64,
}

impl GlobalCounter {
    /// A counter starting at zero.
    pub fn new(capacity: usize) -> Self {
        Self::with_start(capacity, 0)
    }

    /// A counter resuming at `start`, used when reopening a journal.
    pub fn with_start(capacity: usize, start: u64) -> Self {
        Self {
            position: CachePadded::new(AtomicU64::new(start)),
            capacity: capacity as u64,
        }
    }

    /// Claim `size` bytes. Returns the start offset, or `None` if the
    /// claim does not fit in the remaining capacity.
    #[inline]
    pub fn claim(&self, size: u64) -> Option<u64> {
        // An exhausted counter stops advancing, so repeated failing claims
        // cannot wrap the position back into range.
        if self.position.load(Ordering::Relaxed) > self.capacity {
            return None;
        }
        let size = size.min(self.capacity + 1);
        let old = self.position.fetch_add(size, Ordering::Relaxed);
        match old.checked_add(size) {
            Some(end) if end <= self.capacity => Some(old),
            _ => {
                // Only the claim that crosses the boundary sees old <= capacity.
                if old <= self.capacity {
                    warn!(
                        capacity = self.capacity,
                        requested = size,
                        used = old,
                        "arena exhausted"
                    );
                }
                None
            }
        }
    }

    /// Rewind to zero. `&mut self` guarantees no claim is in flight.
    pub fn reset(&mut self) {
        *self.position.get_mut() = 0;
    }

    /// Raw cursor position, possibly past capacity.
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes handed out, clamped to capacity.
    pub fn used(&self) -> u64 {
        self.position().min(self.capacity)
    }

    /// Bytes still claimable.
    pub fn remaining(&self) -> u64 {
        self.capacity - self.used()
    }

    /// Whether a claim has already failed since the last reset.
    pub fn is_exhausted(&self) -> bool {
        self.position() > self.capacity
    }

    /// Point-in-time usage snapshot.
    pub fn stats(&self) -> ArenaStats {
        let position = self.position();
        let used = position.min(self.capacity);
        ArenaStats {
            capacity: self.capacity,
            used,
            remaining: self.capacity - used,
            exhausted: position > self.capacity,
        }
    }
}

/// Usage snapshot of an arena.
///
/// Values are read with relaxed ordering and may be stale by the time
/// they are inspected if other threads keep allocating.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaStats {
    /// Region capacity in bytes.
    pub capacity: u64,
    /// Bytes claimed from the shared counter (including unused chunk tails).
    pub used: u64,
    /// Bytes still available to claim.
    pub remaining: u64,
    /// Whether a claim has failed since the last reset.
    pub exhausted: bool,
}
