//! Compact, position-independent references into a backing region.
//!
//! A [`Handle<T>`] is 8 bytes: a 32-bit byte offset from the region base
//! and the [`RegionId`] it was issued by. Handles are `Copy`, hold no
//! borrow, and can be stored inside arena memory, sent across threads or
//! written to a durable journal. Turning one into a pointer requires the
//! region, and resolution fails (returns `None`) instead of producing a
//! pointer into the wrong memory.

#![allow(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ptr::NonNull;

use tessera_core::RegionId;

use crate::region::BackingRegion;

/// Offset reserved for the null handle.
const NULL_OFFSET: u32 = u32::MAX;

/// A typed offset into a [`BackingRegion`].
///
/// The null handle (offset `u32::MAX`, region [`RegionId::NONE`]) marks a
/// failed allocation and is the `Default`.
#[repr(C)]
pub struct Handle<T> {
    offset: u32,
    region: RegionId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// The null handle.
    pub const NULL: Self = Self {
        offset: NULL_OFFSET,
        region: RegionId::NONE,
        _marker: PhantomData,
    };

    /// Build a handle from its raw parts.
    ///
    /// Nothing is validated here; [`resolve`](Self::resolve) checks the
    /// handle against a concrete region.
    pub const fn new(offset: u32, region: RegionId) -> Self {
        Self {
            offset,
            region,
            _marker: PhantomData,
        }
    }

    /// The null handle.
    pub const fn null() -> Self {
        Self::NULL
    }

    /// Whether this is the null handle.
    pub const fn is_null(&self) -> bool {
        self.offset == NULL_OFFSET
    }

    /// Byte offset from the region base.
    pub const fn offset(&self) -> u32 {
        self.offset
    }

    /// The region this handle was issued by.
    pub const fn region(&self) -> RegionId {
        self.region
    }

    /// `None` for the null handle, `Some(self)` otherwise.
    pub fn into_option(self) -> Option<Self> {
        (!self.is_null()).then_some(self)
    }

    /// Reinterpret the pointee type. The offset and region are unchanged,
    /// so alignment is rechecked at the next `resolve`.
    pub const fn cast<U>(self) -> Handle<U> {
        Handle::new(self.offset, self.region)
    }

    /// Resolve to a pointer into `region`.
    ///
    /// Returns `None` if the handle is null, was issued by a different
    /// region, would run past the end of the region, or is misaligned for
    /// `T`. The returned pointer is valid for reads and writes of one `T`
    /// for as long as `region` lives; what may be done through it
    /// concurrently is the caller's business.
    #[inline]
    pub fn resolve(self, region: &BackingRegion) -> Option<NonNull<T>> {
        if self.is_null() || self.region != region.id() {
            return None;
        }
        let offset = self.offset as usize;
        if !region.contains(offset, size_of::<T>()) {
            return None;
        }
        let addr = region.base_ptr().as_ptr().wrapping_add(offset);
        if (addr as usize) % align_of::<T>() != 0 {
            return None;
        }
        NonNull::new(addr.cast::<T>())
    }

    /// Resolve without any checks.
    ///
    /// # Safety
    ///
    /// The handle must have been issued by `region` for a `T`, and must not
    /// be null. Violating this yields an out-of-bounds or misaligned
    /// pointer.
    #[inline]
    pub unsafe fn resolve_unchecked(self, region: &BackingRegion) -> NonNull<T> {
        debug_assert!(self.resolve(region).is_some(), "unchecked resolve of invalid handle");
        // SAFETY: the caller guarantees `offset` is in bounds of `region`,
        // so the sum stays within the same allocation and is non-null.
        unsafe {
            NonNull::new_unchecked(region.base_ptr().as_ptr().add(self.offset as usize).cast::<T>())
        }
    }

    /// Resolve to a pointer to the first of `count` contiguous `T`s.
    ///
    /// Same checks as [`resolve`](Self::resolve), with the bounds check
    /// covering the whole run.
    pub fn resolve_slice(self, region: &BackingRegion, count: usize) -> Option<NonNull<T>> {
        let len = size_of::<T>().checked_mul(count)?;
        if self.is_null() || self.region != region.id() {
            return None;
        }
        if !region.contains(self.offset as usize, len) {
            return None;
        }
        let addr = region.base_ptr().as_ptr().wrapping_add(self.offset as usize);
        if (addr as usize) % align_of::<T>() != 0 {
            return None;
        }
        NonNull::new(addr.cast::<T>())
    }

    /// Compare the values two handles point at.
    ///
    /// `None` if either handle fails to resolve against `region`.
    ///
    /// # Safety
    ///
    /// Both pointees must be initialized `T`s and neither may be written
    /// concurrently.
    pub unsafe fn cmp_pointee(self, other: Self, region: &BackingRegion) -> Option<Ordering>
    where
        T: Ord,
    {
        let a = self.resolve(region)?;
        let b = other.resolve(region)?;
        // SAFETY: both pointers passed `resolve`; the caller guarantees the
        // pointees are initialized and not being mutated.
        Some(unsafe { a.as_ref().cmp(b.as_ref()) })
    }
}

// Manual impls: derives would bound them on `T`, which handles never hold.

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset && self.region == other.region
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.offset.hash(state);
        self.region.hash(state);
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::NULL
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("Handle(null)")
        } else {
            write!(f, "Handle({}+{:#x})", self.region, self.offset)
        }
    }
}

const _: () = assert!(size_of::<Handle<u64>>() == 8);
