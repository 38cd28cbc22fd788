//! Fixed-size inline record for by-value handoff.

use bytemuck::{Pod, Zeroable};

/// One cache line carrying a small packet by value.
///
/// For payloads up to [`RingSlot::PAYLOAD_CAPACITY`] bytes this avoids an
/// arena allocation altogether: the whole record travels through the ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C, align(64))]
pub struct RingSlot {
    /// Receive time, nanoseconds.
    pub timestamp_ns: u64,
    /// Producer-measured latency, nanoseconds.
    pub latency_ns: u32,
    /// Caller-assigned packet id.
    pub packet_id: u32,
    /// Valid bytes in `payload`.
    pub payload_len: u32,
    /// Zero.
    pub reserved: [u8; 4],
    /// Inline payload storage.
    pub payload: [u8; 40],
}

impl RingSlot {
    /// Bytes of inline payload a slot can carry.
    pub const PAYLOAD_CAPACITY: usize = 40;

    /// Build a slot, or `None` if `payload` does not fit inline.
    pub fn new(packet_id: u32, timestamp_ns: u64, latency_ns: u32, payload: &[u8]) -> Option<Self> {
        if payload.len() > Self::PAYLOAD_CAPACITY {
            return None;
        }
        let mut slot = Self::zeroed();
        slot.timestamp_ns = timestamp_ns;
        slot.latency_ns = latency_ns;
        slot.packet_id = packet_id;
        slot.payload_len = payload.len() as u32;
        slot.payload[..payload.len()].copy_from_slice(payload);
        Some(slot)
    }

    /// The valid payload bytes.
    pub fn payload(&self) -> &[u8] {
        let len = (self.payload_len as usize).min(Self::PAYLOAD_CAPACITY);
        &self.payload[..len]
    }
}

const _: () = assert!(std::mem::size_of::<RingSlot>() == 64);
const _: () = assert!(std::mem::align_of::<RingSlot>() == 64);
