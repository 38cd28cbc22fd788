//! Lock-free single-producer/single-consumer handoff.
//!
//! [`SpscRing::with_capacity`] returns a connected [`Producer`] and
//! [`Consumer`]. Each half is unique and `Send`, and every operation that
//! moves a cursor takes `&mut self`, so "exactly one producer and one
//! consumer" is enforced by ownership rather than by convention.
//!
//! Elements are `Copy`: typically arena handles, indices, or the 64-byte
//! inline [`RingSlot`]. Queue full and queue empty are ordinary outcomes
//! (`false` / `None`); nothing here blocks.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod slot;
pub mod spsc;

pub use slot::RingSlot;
pub use spsc::{Consumer, Producer, SpscRing};
pub use tessera_core::RingError;
