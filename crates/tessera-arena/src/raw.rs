//! Page-aligned heap blocks backing volatile regions.
//!
//! The only `unsafe` here is the allocator call pair; every other module
//! sees a [`PageBlock`] as an owned base pointer plus a length.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use tessera_core::{ArenaError, PAGE_SIZE};

/// A zero-filled, page-aligned heap allocation, freed on drop.
pub(crate) struct PageBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl PageBlock {
    /// Allocate `size` zeroed bytes aligned to [`PAGE_SIZE`].
    ///
    /// `size` must be non-zero; callers round it to a page multiple first.
    pub(crate) fn alloc_zeroed(size: usize) -> Result<Self, ArenaError> {
        let layout = Layout::from_size_align(size, PAGE_SIZE).map_err(|_| {
            ArenaError::RegionAlloc {
                size,
                align: PAGE_SIZE,
            }
        })?;
        debug_assert!(layout.size() > 0, "zero-sized page block");
        // SAFETY: `layout` has non-zero size (validated by the caller and
        // asserted above) and a power-of-two alignment.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(ArenaError::RegionAlloc {
            size,
            align: PAGE_SIZE,
        })?;
        Ok(Self { ptr, layout })
    }

    pub(crate) fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub(crate) fn len(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for PageBlock {
    fn drop(&mut self) {
        // SAFETY: `ptr` was returned by `alloc_zeroed` with exactly this
        // layout and is freed only here.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_is_page_aligned_and_zeroed() {
        let block = PageBlock::alloc_zeroed(2 * PAGE_SIZE).unwrap();
        assert_eq!(block.as_ptr().as_ptr() as usize % PAGE_SIZE, 0);
        assert_eq!(block.len(), 2 * PAGE_SIZE);
        // SAFETY: the block is live and `len()` bytes long.
        let bytes = unsafe { std::slice::from_raw_parts(block.as_ptr().as_ptr(), block.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }
}
