//! Bounded SPSC ring buffer.
//!
//! # Protocol
//!
//! `tail` is written only by the producer and `head` only by the
//! consumer. Each side reads its own cursor `Relaxed` and the other
//! side's cursor `Acquire`, and publishes its own cursor `Release` after
//! touching the slot. The release/acquire pair on `tail` makes a written
//! slot visible before the consumer can observe it; the pair on `head`
//! keeps the producer from overwriting a slot the consumer is still
//! reading.
//!
//! One slot always stays empty so full (`next(tail) == head`) and empty
//! (`tail == head`) are distinguishable: a ring of capacity `N` holds at
//! most `N - 1` values.
//!
//! Each half also caches the last value it saw of the other side's cursor
//! and re-reads the shared atomic only when the cached value says the
//! ring is full (producer) or empty (consumer).

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tessera_core::{is_power_of_two, CachePadded, RingError};
use tracing::debug;

struct Shared<T> {
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    mask: usize,
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// SAFETY: slots are accessed by at most one thread at a time. The producer
// only writes slots in `[tail, head - 1)` and the consumer only reads
// slots in `[head, tail)`; the acquire/release protocol on the cursors
// hands each slot from one side to the other. `T: Send` is required
// because values cross threads.
unsafe impl<T: Send> Send for Shared<T> {}
// SAFETY: see `Send` above.
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head) & self.mask
    }
}

/// Constructor namespace for a producer/consumer pair.
pub struct SpscRing<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: Copy + Send> SpscRing<T> {
    /// Create a ring with `capacity` slots and split it into its halves.
    ///
    /// `capacity` must be a power of two and at least 2; the ring holds
    /// `capacity - 1` values.
    pub fn with_capacity(capacity: usize) -> Result<(Producer<T>, Consumer<T>), RingError> {
        if capacity < 2 {
            return Err(RingError::CapacityTooSmall { capacity });
        }
        if !is_power_of_two(capacity) {
            return Err(RingError::CapacityNotPowerOfTwo { capacity });
        }
        let buffer = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();
        let shared = Arc::new(Shared {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            mask: capacity - 1,
            buffer,
        });
        debug!(
            capacity,
            slot_size = std::mem::size_of::<T>(),
            "spsc ring created"
        );
        Ok((
            Producer {
                shared: Arc::clone(&shared),
                cached_head: 0,
            },
            Consumer {
                shared,
                cached_tail: 0,
            },
        ))
    }
}

/// The writing half of an SPSC ring.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    cached_head: usize,
}

impl<T: Copy> Producer<T> {
    /// Append `value`. Returns `false`, leaving the ring unchanged, if it
    /// is full.
    #[inline]
    pub fn enqueue(&mut self, value: T) -> bool {
        let shared = &*self.shared;
        let tail = shared.tail.load(Ordering::Relaxed);
        let next = (tail + 1) & shared.mask;
        if next == self.cached_head {
            self.cached_head = shared.head.load(Ordering::Acquire);
            if next == self.cached_head {
                return false;
            }
        }
        // SAFETY: `tail` is in bounds (masked) and the slot is not readable
        // by the consumer until the release store below; the acquire load
        // of `head` guarantees the consumer has finished with it.
        unsafe { (*shared.buffer[tail].get()).write(value) };
        shared.tail.store(next, Ordering::Release);
        true
    }

    /// Values currently queued.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the next `enqueue` would fail.
    pub fn is_full(&self) -> bool {
        let tail = self.shared.tail.load(Ordering::Relaxed);
        (tail + 1) & self.shared.mask == self.shared.head.load(Ordering::Acquire)
    }

    /// Slot count (a power of two).
    pub fn capacity(&self) -> usize {
        self.shared.mask + 1
    }

    /// Values the ring can hold at once: `capacity() - 1`.
    pub fn usable_capacity(&self) -> usize {
        self.shared.mask
    }

    /// Whether the consumer has been dropped.
    pub fn is_abandoned(&self) -> bool {
        Arc::strong_count(&self.shared) == 1
    }
}

/// The reading half of an SPSC ring.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
    cached_tail: usize,
}

impl<T: Copy> Consumer<T> {
    /// Remove the oldest value, or `None` if the ring is empty.
    #[inline]
    pub fn dequeue(&mut self) -> Option<T> {
        let shared = &*self.shared;
        let head = shared.head.load(Ordering::Relaxed);
        if head == self.cached_tail {
            self.cached_tail = shared.tail.load(Ordering::Acquire);
            if head == self.cached_tail {
                return None;
            }
        }
        // SAFETY: `head != tail`, so the producer initialised this slot and
        // published it with the release store of `tail` we acquired.
        let value = unsafe { (*shared.buffer[head].get()).assume_init_read() };
        shared.head.store((head + 1) & shared.mask, Ordering::Release);
        Some(value)
    }

    /// Move every currently visible value into `out`, oldest first.
    /// Returns how many were moved.
    ///
    /// Publishes the freed slots with a single release store.
    pub fn drain_into(&mut self, out: &mut Vec<T>) -> usize {
        let shared = &*self.shared;
        let mut head = shared.head.load(Ordering::Relaxed);
        let tail = shared.tail.load(Ordering::Acquire);
        self.cached_tail = tail;
        let count = tail.wrapping_sub(head) & shared.mask;
        out.reserve(count);
        while head != tail {
            // SAFETY: every slot in `[head, tail)` was published by the
            // producer's release store of `tail`, acquired above.
            out.push(unsafe { (*shared.buffer[head].get()).assume_init_read() });
            head = (head + 1) & shared.mask;
        }
        shared.head.store(head, Ordering::Release);
        count
    }

    /// Values currently queued.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.shared.head.load(Ordering::Relaxed) == self.shared.tail.load(Ordering::Acquire)
    }

    /// Whether the ring holds `capacity() - 1` values.
    pub fn is_full(&self) -> bool {
        self.len() == self.shared.mask
    }

    /// Slot count (a power of two).
    pub fn capacity(&self) -> usize {
        self.shared.mask + 1
    }

    /// Values the ring can hold at once: `capacity() - 1`.
    pub fn usable_capacity(&self) -> usize {
        self.shared.mask
    }

    /// Whether the producer has been dropped. Values it queued before
    /// dropping can still be dequeued.
    pub fn is_abandoned(&self) -> bool {
        Arc::strong_count(&self.shared) == 1
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &(self.shared.mask + 1))
            .field("len", &self.shared.len())
            .finish()
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("capacity", &(self.shared.mask + 1))
            .field("len", &self.shared.len())
            .finish()
    }
}

const _: fn() = || {
    fn assert<T: Send>() {}
    assert::<Producer<u64>>();
    assert::<Consumer<u64>>();
};
