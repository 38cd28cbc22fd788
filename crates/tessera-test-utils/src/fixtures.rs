//! Reusable test fixtures.
//!
//! - [`SampleRecord`]: a 24-byte Pod value for typed allocation tests.
//! - [`payload`]: reproducible pseudo-random bytes keyed by a seed.
//! - [`TempJournal`]: a journal path inside a directory removed on drop.

use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use tempfile::TempDir;

/// A fixed-layout record with a sequence number and a self-check word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct SampleRecord {
    pub seq: u64,
    pub value: u64,
    pub producer: u32,
    /// `seq ^ value` folded to 32 bits; lets a reader spot torn values.
    pub check: u32,
}

impl SampleRecord {
    pub fn new(producer: u32, seq: u64) -> Self {
        let value = mix(seq ^ (u64::from(producer) << 32));
        Self {
            seq,
            value,
            producer,
            check: fold(seq ^ value),
        }
    }

    /// Whether `check` still matches the other fields.
    pub fn is_intact(&self) -> bool {
        self.check == fold(self.seq ^ self.value)
    }
}

/// `len` deterministic bytes derived from `seed`.
///
/// Same seed, same bytes, on every platform.
pub fn payload(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed;
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let word = mix(state).to_le_bytes();
        let take = (len - out.len()).min(word.len());
        out.extend_from_slice(&word[..take]);
    }
    out
}

/// A scratch directory holding one journal path.
///
/// The file itself is not created; the directory and anything in it are
/// removed when this value is dropped.
pub struct TempJournal {
    dir: TempDir,
    path: PathBuf,
}

impl TempJournal {
    pub fn new() -> std::io::Result<Self> {
        Self::named("journal.bin")
    }

    pub fn named(name: &str) -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(name);
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

// splitmix64 finaliser
fn mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn fold(x: u64) -> u32 {
    (x ^ (x >> 32)) as u32
}
