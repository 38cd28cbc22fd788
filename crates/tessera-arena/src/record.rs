//! On-disk record framing for durable journals.
//!
//! A journal is a flat run of records, each a [`RecordHeader`] followed
//! by its payload, padded so the next record starts on a 64-byte
//! boundary:
//!
//! ```text
//! offset  0  timestamp_ns  u64   nanoseconds since the Unix epoch
//! offset  8  payload_len   u32
//! offset 12  checksum      u32   CRC-32 of the payload bytes
//! offset 16  generation    u32   arena reset generation
//! offset 20  reserved      [u32; 2]
//! offset 28  magic         u32   0xDEAD_BEEF once committed
//! offset 32  payload ...
//! ```
//!
//! All fields are native-endian. `magic` is the last field and the last
//! word written; a slot whose magic is zero was never committed.

use bytemuck::{Pod, Zeroable};
use tessera_core::round_up;

/// Commit marker stored in [`RecordHeader::magic`].
pub const MAGIC: u32 = 0xDEAD_BEEF;

/// Size of [`RecordHeader`] in bytes.
pub const HEADER_SIZE: usize = std::mem::size_of::<RecordHeader>();

/// Every record starts on a multiple of this.
pub const RECORD_ALIGN: usize = 64;

/// Byte offset of `magic` within the header.
pub(crate) const MAGIC_OFFSET: usize = 28;

/// Fixed header preceding every durable payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct RecordHeader {
    /// Commit time, nanoseconds since the Unix epoch.
    pub timestamp_ns: u64,
    /// Payload length in bytes.
    pub payload_len: u32,
    /// CRC-32 of the payload.
    pub checksum: u32,
    /// Reset generation of the arena that wrote the record.
    pub generation: u32,
    /// Zero.
    pub reserved: [u32; 2],
    /// [`MAGIC`] for a committed record.
    pub magic: u32,
}

impl RecordHeader {
    /// Header for `payload`, with the magic already set.
    pub fn new(payload: &[u8], timestamp_ns: u64, generation: u32) -> Self {
        Self {
            timestamp_ns,
            payload_len: payload.len() as u32,
            checksum: checksum(payload),
            generation,
            reserved: [0; 2],
            magic: MAGIC,
        }
    }

    /// Whether the commit marker is present.
    pub fn is_committed(&self) -> bool {
        self.magic == MAGIC
    }

    /// Total slot size this record occupies.
    pub fn record_size(&self) -> Option<usize> {
        record_size(self.payload_len as usize)
    }
}

/// Bytes a record with a `payload_len`-byte payload occupies, header and
/// padding included. `None` on overflow.
pub fn record_size(payload_len: usize) -> Option<usize> {
    HEADER_SIZE
        .checked_add(payload_len)
        .and_then(|len| round_up(len, RECORD_ALIGN))
}

/// CRC-32 (IEEE) of `payload`.
pub fn checksum(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

const _: () = assert!(HEADER_SIZE == 32);
const _: () = assert!(std::mem::offset_of!(RecordHeader, magic) == MAGIC_OFFSET);
