//! Tessera: bump arenas and lock-free handoff for producer/consumer pipelines.
//!
//! This is the facade crate re-exporting the public API of the Tessera
//! sub-crates.
//!
//! # Quick start
//!
//! ```rust
//! use tessera::prelude::*;
//!
//! let arena = SingleLevelArena::new(&ArenaConfig::new(64 * 1024)).unwrap();
//! let (mut tx, mut rx) = SpscRing::<Handle<u8>>::with_capacity(16).unwrap();
//!
//! // Producer: allocate, fill, publish.
//! let handle = arena.allocate::<u8>(5);
//! // SAFETY: the allocation is owned by this thread until it is enqueued.
//! let dst = unsafe { arena.region().bytes_mut(handle, 5).unwrap() };
//! dst.copy_from_slice(b"hello");
//! assert!(tx.enqueue(handle));
//!
//! // Consumer: receive and resolve against the same region.
//! let received = rx.dequeue().unwrap();
//! // SAFETY: the producer no longer touches the allocation.
//! let bytes = unsafe { arena.region().bytes(received, 5).unwrap() };
//! assert_eq!(bytes, b"hello");
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`arena`] | `tessera-arena` | Regions, handles, single/two-level and durable arenas |
//! | [`ring`] | `tessera-ring` | SPSC ring halves and the inline `RingSlot` |
//! | [`types`] | `tessera-core` | Region ids, layout helpers, error types |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Arenas, regions and handles (`tessera-arena`).
///
/// Most users only need [`arena::Handle`] and one of the arena types;
/// they are also available in the [`prelude`].
pub use tessera_arena as arena;

/// SPSC handoff (`tessera-ring`).
///
/// [`ring::SpscRing::with_capacity`] returns a [`ring::Producer`] /
/// [`ring::Consumer`] pair.
pub use tessera_ring as ring;

/// Identifiers, layout constants and errors (`tessera-core`).
pub use tessera_core as types;

/// Common imports for typical Tessera usage.
///
/// ```rust
/// use tessera::prelude::*;
/// ```
pub mod prelude {
    // Arenas
    pub use tessera_arena::{
        ArenaConfig, ArenaStats, ChunkCache, ChunkRegistry, DurableArena, DurableConfig,
        SingleLevelArena, TwoLevelArena,
    };

    // Memory and handles
    pub use tessera_arena::{BackingRegion, FlushMode, Handle};

    // Recovery
    pub use tessera_arena::{JournalReader, RecoveryReport, ScanStop};

    // Handoff
    pub use tessera_ring::{Consumer, Producer, RingSlot, SpscRing};

    // Errors
    pub use tessera_core::{ArenaError, RingError};
}
