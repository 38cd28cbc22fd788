//! Core types for the Tessera arena subsystem.
//!
//! This is the leaf crate with zero internal dependencies. It defines the
//! identifiers, layout arithmetic and error types shared by the arena and
//! ring crates. Nothing here touches raw memory.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod id;
pub mod layout;

pub use error::{ArenaError, RingError};
pub use id::RegionId;
pub use layout::{
    is_power_of_two, round_up, CachePadded, CACHE_LINE_SIZE, MAX_REGION_CAPACITY, PAGE_SIZE,
};
