//! Linear-scan recovery of durable journals.
//!
//! The write cursor of a durable arena is not stored anywhere; it is
//! rebuilt on open by walking records from offset 0. A slot is accepted
//! when all of these hold:
//!
//! - `magic` equals [`MAGIC`],
//! - `generation` is not lower than the previous accepted record's,
//! - the padded record fits inside the journal,
//! - the payload CRC matches `checksum`.
//!
//! The scan stops at the first slot that fails, and the recovered cursor
//! is the end of the last accepted record. Anything after a gap (a torn
//! write, an abandoned allocation, or leftovers from before a reset) is
//! treated as free space and will be overwritten.
//!
//! Leftovers past the gap still matter for one thing: their generations.
//! [`highest_generation`] sweeps every 64-byte slot of the journal so a
//! reopened arena can stamp new records above all of them, even when the
//! valid prefix is empty.

#![allow(unsafe_code)]

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tessera_core::ArenaError;
use tracing::debug;

use crate::record::{checksum, RecordHeader, HEADER_SIZE, MAGIC, RECORD_ALIGN};

/// Why a scan stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanStop {
    /// Reached the end of the journal.
    EndOfRegion,
    /// Found an unwritten (zero-magic) slot.
    EndOfData,
    /// The slot holds a non-zero value that is not [`MAGIC`].
    BadMagic,
    /// The record belongs to an older generation than its predecessor.
    StaleGeneration,
    /// The declared payload runs past the end of the journal.
    Truncated,
    /// The payload does not match its checksum.
    ChecksumMismatch,
}

impl ScanStop {
    /// Whether the scan ended on unwritten space rather than damage.
    pub fn is_clean(self) -> bool {
        matches!(self, Self::EndOfRegion | Self::EndOfData)
    }
}

/// One committed record found by a scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecoveredRecord<'a> {
    /// Offset of the header from the start of the journal.
    pub offset: usize,
    /// The record header.
    pub header: RecordHeader,
    /// The payload bytes.
    pub payload: &'a [u8],
}

impl RecoveredRecord<'_> {
    /// Offset of the first payload byte.
    pub fn payload_offset(&self) -> usize {
        self.offset + HEADER_SIZE
    }

    /// Offset just past this record's padded slot.
    pub fn end(&self) -> usize {
        self.offset + self.header.record_size().unwrap_or(0)
    }
}

/// Summary of a completed scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Number of valid records.
    pub records: usize,
    /// End of the last valid record; where the next append goes.
    pub cursor: u64,
    /// Highest generation seen, `None` for an empty journal.
    pub generation: Option<u32>,
    /// Why the scan stopped.
    pub stop: ScanStop,
}

/// Iterator over the valid prefix of a journal.
#[derive(Clone, Debug)]
pub struct Scan<'a> {
    bytes: &'a [u8],
    offset: usize,
    records: usize,
    generation: Option<u32>,
    stop: Option<ScanStop>,
}

/// Highest generation of any intact record anywhere in `bytes`.
///
/// Unlike [`scan`], this does not stop at the first gap: every
/// record-aligned slot whose magic, length and checksum are valid counts.
/// `None` if no slot holds an intact record.
pub fn highest_generation(bytes: &[u8]) -> Option<u32> {
    (0..bytes.len())
        .step_by(RECORD_ALIGN)
        .filter_map(|offset| read_slot(bytes, offset).ok())
        .map(|record| record.header.generation)
        .max()
}

/// Validate the record at `offset`, ignoring generation ordering.
fn read_slot(bytes: &[u8], offset: usize) -> Result<RecoveredRecord<'_>, ScanStop> {
    let header_end = offset
        .checked_add(HEADER_SIZE)
        .filter(|&end| end <= bytes.len())
        .ok_or(ScanStop::EndOfRegion)?;
    let header: RecordHeader = bytemuck::pod_read_unaligned(&bytes[offset..header_end]);
    match header.magic {
        0 => return Err(ScanStop::EndOfData),
        MAGIC => {}
        _ => return Err(ScanStop::BadMagic),
    }
    header
        .record_size()
        .and_then(|size| offset.checked_add(size))
        .filter(|&end| end <= bytes.len())
        .ok_or(ScanStop::Truncated)?;
    let payload = &bytes[header_end..header_end + header.payload_len as usize];
    if checksum(payload) != header.checksum {
        return Err(ScanStop::ChecksumMismatch);
    }
    Ok(RecoveredRecord {
        offset,
        header,
        payload,
    })
}

/// Scan `bytes` from offset 0.
pub fn scan(bytes: &[u8]) -> Scan<'_> {
    Scan {
        bytes,
        offset: 0,
        records: 0,
        generation: None,
        stop: None,
    }
}

impl<'a> Scan<'a> {
    /// Why the scan stopped, once it has.
    pub fn stop(&self) -> Option<ScanStop> {
        self.stop
    }

    /// Consume the remaining records and summarise.
    pub fn finish(mut self) -> RecoveryReport {
        for _ in self.by_ref() {}
        RecoveryReport {
            records: self.records,
            cursor: self.offset as u64,
            generation: self.generation,
            stop: self.stop.unwrap_or(ScanStop::EndOfRegion),
        }
    }

    fn check(&self) -> Result<RecoveredRecord<'a>, ScanStop> {
        let record = read_slot(self.bytes, self.offset)?;
        if self
            .generation
            .is_some_and(|g| record.header.generation < g)
        {
            return Err(ScanStop::StaleGeneration);
        }
        Ok(record)
    }
}

impl<'a> Iterator for Scan<'a> {
    type Item = RecoveredRecord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stop.is_some() {
            return None;
        }
        match self.check() {
            Ok(record) => {
                self.offset = record.end();
                self.records += 1;
                self.generation = Some(record.header.generation);
                Some(record)
            }
            Err(stop) => {
                self.stop = Some(stop);
                None
            }
        }
    }
}

/// Read-only view of a journal file, for inspection tools.
///
/// Maps the file without taking any lock; reading a journal that another
/// process is appending to sees whatever prefix has been committed.
#[derive(Debug)]
pub struct JournalReader {
    mmap: Mmap,
    path: PathBuf,
}

impl JournalReader {
    /// Map `path` read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArenaError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ArenaError::io("open", path, e))?;
        let len = file
            .metadata()
            .map_err(|e| ArenaError::io("metadata", path, e))?
            .len();
        if len == 0 {
            return Err(ArenaError::Corrupt {
                offset: 0,
                reason: "journal is empty".into(),
            });
        }
        // SAFETY: the mapping is read-only. A concurrent writer can change
        // the bytes underneath, but every read goes through `&[u8]` of
        // plain integers and is revalidated by checksum.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| ArenaError::io("mmap", path, e))?;
        debug!(path = %path.display(), len, "journal mapped for reading");
        Ok(Self {
            mmap,
            path: path.to_path_buf(),
        })
    }

    /// The journal's raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// Journal length in bytes.
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Always `false`; empty journals are rejected by [`open`](Self::open).
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// The mapped file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Iterate the valid records.
    pub fn records(&self) -> Scan<'_> {
        scan(&self.mmap)
    }

    /// Scan the whole journal.
    pub fn recover(&self) -> RecoveryReport {
        self.records().finish()
    }
}
