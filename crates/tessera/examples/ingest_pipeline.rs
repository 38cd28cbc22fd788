//! Tessera ingest pipeline: receive, hand off, persist, recover.
//!
//! Demonstrates:
//!   1. A producer thread filling a TwoLevelArena with "packets"
//!   2. Handing their handles to a consumer through an SPSC ring
//!   3. The consumer appending each packet to a durable journal
//!   4. Reopening the journal and recovering every record
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example ingest_pipeline

use std::thread;
use std::time::Instant;

use tessera::prelude::*;
use tessera_test_utils::{payload, TempJournal};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ─── Pipeline parameters ────────────────────────────────────────

const PACKETS: u64 = 50_000;
const MAX_PACKET: usize = 1_400;
const RING_CAPACITY: usize = 1_024;
const FLUSH_EVERY: u64 = 10_000;

/// A received packet in flight: where it lives and how long it is.
#[derive(Clone, Copy)]
struct Packet {
    handle: Handle<u8>,
    len: u32,
}

fn packet_len(seq: u64) -> usize {
    64 + (seq as usize * 7919) % (MAX_PACKET - 64)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let journal = TempJournal::new()?;
    let rx_arena = TwoLevelArena::new(&ArenaConfig::new(128 * 1024 * 1024))?;
    let store = DurableArena::create(&DurableConfig::new(journal.path()).with_capacity(128 * 1024 * 1024))?;
    let (mut tx, mut rx) = SpscRing::<Packet>::with_capacity(RING_CAPACITY)?;

    let started = Instant::now();
    thread::scope(|s| {
        // ─── Producer: the "network receive loop" ───────────────
        let arena = &rx_arena;
        s.spawn(move || {
            let mut cache = ChunkCache::new();
            for seq in 0..PACKETS {
                let bytes = payload(seq, packet_len(seq));
                let handle = arena.allocate::<u8>(&mut cache, bytes.len());
                if handle.is_null() {
                    tracing::warn!(seq, "receive arena full, dropping packet");
                    continue;
                }
                // SAFETY: the allocation is private until enqueued.
                if let Some(dst) = unsafe { arena.region().bytes_mut(handle, bytes.len()) } {
                    dst.copy_from_slice(&bytes);
                }
                let packet = Packet {
                    handle,
                    len: bytes.len() as u32,
                };
                while !tx.enqueue(packet) {
                    std::hint::spin_loop();
                }
            }
            info!(refills = cache.global_claims(), "producer done");
        });

        // ─── Consumer: persist to the journal ───────────────────
        let mut persisted = 0u64;
        while persisted < PACKETS && !(rx.is_abandoned() && rx.is_empty()) {
            let Some(packet) = rx.dequeue() else {
                std::hint::spin_loop();
                continue;
            };
            // SAFETY: the producer never writes a packet after publishing it.
            let Some(bytes) = (unsafe { rx_arena.region().bytes(packet.handle, packet.len as usize) })
            else {
                continue;
            };
            if store.append(bytes).is_none() {
                tracing::warn!(persisted, "journal full");
                break;
            }
            persisted += 1;
            if persisted % FLUSH_EVERY == 0 {
                if let Err(e) = store.flush(FlushMode::Async) {
                    tracing::warn!(error = %e, "async flush failed");
                }
            }
        }
        info!(persisted, "consumer done");
    });
    store.flush(FlushMode::Sync)?;
    let elapsed = started.elapsed();

    let stats = store.stats();
    info!(
        packets = PACKETS,
        elapsed_ms = elapsed.as_millis() as u64,
        journal_used = stats.used,
        receive_used = rx_arena.stats().used,
        "pipeline finished"
    );
    drop(store);

    // ─── Recovery: reopen and verify ────────────────────────────
    let (mut reopened, report) = DurableArena::open(&DurableConfig::new(journal.path()))?;
    info!(records = report.records, cursor = report.cursor, stop = ?report.stop, "journal reopened");
    let mismatches = reopened
        .records()
        .enumerate()
        .filter(|(seq, record)| record.payload != payload(*seq as u64, packet_len(*seq as u64)).as_slice())
        .count();
    info!(mismatches, "verification complete");
    Ok(())
}
