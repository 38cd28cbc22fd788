//! Size and alignment arithmetic shared by every allocator.

/// Page granularity for backing regions, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Cache line size assumed for padding and chunk alignment.
///
/// 64 bytes covers x86-64 and most ARM cores. Cursor padding in the ring
/// uses 128 to also cover adjacent-line prefetching.
pub const CACHE_LINE_SIZE: usize = 64;

/// Largest region a 32-bit handle offset can address.
///
/// `u32::MAX` is the null sentinel, so the usable range is rounded down to
/// the last whole page below it.
pub const MAX_REGION_CAPACITY: usize = (u32::MAX as usize) & !(PAGE_SIZE - 1);

/// Pads and aligns `T` to its own 128-byte block.
///
/// 128 bytes covers both 64-byte lines and the adjacent-line prefetcher
/// on x86, and the 128-byte lines of Apple M-series cores. Two padded
/// values never share a cache line, so a writer of one never invalidates
/// a reader of the other.
#[derive(Debug, Default)]
#[repr(align(128))]
pub struct CachePadded<T>(pub T);

impl<T> CachePadded<T> {
    /// Wrap `value`.
    pub const fn new(value: T) -> Self {
        Self(value)
    }
}

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> std::ops::DerefMut for CachePadded<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// Round `value` up to the next multiple of `align`.
///
/// `align` must be a power of two. Returns `None` on overflow.
#[inline]
pub fn round_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(is_power_of_two(align), "alignment {align} is not a power of two");
    let mask = align - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

/// Whether `value` is a non-zero power of two.
#[inline]
pub const fn is_power_of_two(value: usize) -> bool {
    value != 0 && value & (value - 1) == 0
}
