//! Test utilities for Tessera development.
//!
//! Provides Pod sample records ([`SampleRecord`]), deterministic payload
//! generation ([`payload`]) and scratch journal files
//! ([`TempJournal`]).

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

pub use fixtures::{payload, SampleRecord, TempJournal};
