//! Region identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Counter for unique [`RegionId`] allocation. Zero is reserved for
/// [`RegionId::NONE`].
static REGION_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Process-unique identity of a backing region.
///
/// Every handle records the id of the region it was allocated from, so
/// resolving a handle against the wrong region is detected instead of
/// silently producing a pointer into unrelated memory. Two live regions
/// never share an id, even if one was dropped and another mapped at the
/// same address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(u32);

impl RegionId {
    /// The id carried by null handles. Never assigned to a region.
    pub const NONE: RegionId = RegionId(0);

    /// Allocate a fresh, unique region id.
    ///
    /// Wraps after `u32::MAX` regions; the zero id is skipped.
    pub fn next() -> Self {
        loop {
            let id = REGION_COUNTER.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return Self(id);
            }
        }
    }

    /// The raw id value.
    pub fn get(self) -> u32 {
        self.0
    }

    /// Whether this is the reserved [`RegionId::NONE`].
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region#{}", self.0)
    }
}
