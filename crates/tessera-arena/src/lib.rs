//! Bump-allocated arenas with relocatable handles.
//!
//! Every arena serves allocations out of one fixed [`BackingRegion`] by
//! advancing a cursor; nothing is ever freed individually, only reset
//! wholesale. Allocations come back as [`Handle<T>`]s: 8-byte offsets
//! tagged with the id of the region that issued them, resolved to
//! pointers only against that region.
//!
//! # Architecture
//!
//! ```text
//! SingleLevelArena ──┐
//! TwoLevelArena ─────┼── GlobalCounter (one fetch_add per claim)
//! DurableArena ──────┘         │
//!   │                          ▼
//!   │                    BackingRegion (heap block or mapped file)
//!   └── RecordHeader + recovery scan
//!
//! TwoLevelArena ── ChunkCache (one per thread, optionally in a ChunkRegistry)
//! ```
//!
//! - **[`SingleLevelArena`]**: every allocation hits the shared counter.
//! - **[`TwoLevelArena`]**: threads bump private chunks and touch the
//!   shared counter only to refill.
//! - **[`DurableArena`]**: single-level allocation of framed records in a
//!   mapped journal, recoverable after a crash.
//!
//! # Failure model
//!
//! Running out of space is not an error: allocation returns the null
//! handle (or `None`) and the arena stays exhausted until `reset`.
//! Resets take `&mut self`, so the borrow checker proves no other thread
//! is mid-allocation. Only construction and file I/O return
//! [`ArenaError`].
//!
//! # Unsafe code
//!
//! The crate denies `unsafe` except in `raw`, `region`, `handle`,
//! `durable` and `recovery`, each of which opts in explicitly.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod config;
pub mod counter;
pub mod durable;
pub mod handle;
mod raw;
pub mod record;
pub mod recovery;
pub mod region;
pub mod registry;
pub mod single;
pub mod two_level;

// Public re-exports for the primary API surface.
pub use config::{ArenaConfig, DurableConfig};
pub use counter::{ArenaStats, GlobalCounter};
pub use durable::{DurableArena, PendingRecord};
pub use handle::Handle;
pub use record::RecordHeader;
pub use recovery::{JournalReader, RecoveredRecord, RecoveryReport, ScanStop};
pub use region::{BackingRegion, FlushMode};
pub use registry::ChunkRegistry;
pub use single::SingleLevelArena;
pub use tessera_core::ArenaError;
pub use two_level::{ChunkCache, TwoLevelArena};
