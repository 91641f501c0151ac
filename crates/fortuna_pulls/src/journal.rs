//! # Pull Journal
//!
//! **Crash-safe record of every committed pull**
//!
//! A commit is appended and synced before the in-memory store changes. On restart
//! the journal is replayed in order. Only a final record whose declared length runs
//! past the end of the file is a torn tail from a crash mid-append; it is cut off.
//! A complete record that fails its CRC or does not decode is damage, and opening
//! fails with [`StoreError::Corrupt`] rather than dropping the records after it.
//!
//! ## Guarantees
//!
//! 1. **Durability**: once `append()` returns, the record is on disk
//! 2. **Atomicity**: a record is either replayed whole or not at all
//! 3. **No poisoning**: a failed append is rolled back before the next one
//!
//! ## Format
//!
//! ```text
//! [4 bytes: magic "FJNL"]
//! [4 bytes: version]
//!
//! Entry format:
//! [8 bytes: LSN (Log Sequence Number)]
//! [1 byte: record type (PULL/GRANT)]
//! [4 bytes: payload length]
//! [N bytes: payload]
//! [4 bytes: CRC32 of above]
//! ```

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use fortuna_odds::{ItemId, PityState, Tier};

use crate::error::{StoreError, StoreResult};
use crate::request::PullResult;
use crate::store::PullCommit;

/// Magic bytes identifying a journal file.
const JOURNAL_MAGIC: &[u8; 4] = b"FJNL";

/// Current journal format version.
const JOURNAL_VERSION: u32 = 1;

/// Header length in bytes.
const HEADER_LEN: u64 = 8;

/// Bytes around a payload: LSN, type, length, CRC.
const FRAME_OVERHEAD: usize = 8 + 1 + 4 + 4;

/// Largest payload accepted on replay.
const MAX_PAYLOAD: usize = 1 << 20;

/// Durable destination for store mutations.
///
/// `append` must not return until the entry would survive a crash. Callers never
/// hold store locks across it.
pub trait CommitLog: Send + Sync {
    /// Appends one entry. Returns its LSN.
    ///
    /// # Errors
    ///
    /// [`StoreError`] if the entry is not durable.
    fn append(&self, entry: &JournalEntry) -> StoreResult<u64>;
}

impl CommitLog for Journal {
    fn append(&self, entry: &JournalEntry) -> StoreResult<u64> {
        Journal::append(self, entry)
    }
}

/// What replay found at one position.
enum Frame {
    /// A complete, checksummed record.
    Record { lsn: u64, entry: JournalEntry, len: usize },
    /// The frame runs past the end of the file.
    Incomplete,
    /// The frame is complete but cannot be trusted.
    Damaged(&'static str),
}

/// Journal record types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum RecordType {
    /// A committed pull.
    Pull = 1,
    /// An administrative collection grant.
    Grant = 2,
}

impl RecordType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Pull),
            2 => Some(Self::Grant),
            _ => None,
        }
    }
}

/// A replayable journal record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JournalEntry {
    /// Result, ledger after-state and ownership grant of one pull.
    Pull(PullCommit),
    /// Items granted outside of pulls.
    Grant {
        /// Recipient.
        user_id: String,
        /// Items granted.
        items: Vec<ItemId>,
    },
}

impl JournalEntry {
    fn record_type(&self) -> RecordType {
        match self {
            Self::Pull(_) => RecordType::Pull,
            Self::Grant { .. } => RecordType::Grant,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        match self {
            Self::Pull(commit) => {
                let result = &commit.result;
                put_str(&mut buf, &result.request_id);
                put_str(&mut buf, &result.user_id);
                put_str(&mut buf, &result.pool_id);
                buf.extend_from_slice(&result.table_version.to_le_bytes());
                buf.extend_from_slice(&result.pool_version.to_le_bytes());
                buf.push(result.outcome_tier as u8);
                buf.extend_from_slice(&result.item_id.to_le_bytes());
                buf.push(u8::from(result.pity_triggered));
                buf.push(u8::from(result.converted));
                buf.extend_from_slice(&result.timestamp.to_le_bytes());
                buf.extend_from_slice(&result.sequence_number.to_le_bytes());

                put_ledger(&mut buf, &commit.ledger);
                buf.extend_from_slice(&commit.expected_lifetime.to_le_bytes());
                match commit.grant {
                    Some(item_id) => {
                        buf.push(1);
                        buf.extend_from_slice(&item_id.to_le_bytes());
                    }
                    None => buf.push(0),
                }
            }
            Self::Grant { user_id, items } => {
                put_str(&mut buf, user_id);
                put_len(&mut buf, items.len());
                for item_id in items {
                    buf.extend_from_slice(&item_id.to_le_bytes());
                }
            }
        }
        buf
    }

    fn decode(record_type: RecordType, data: &[u8]) -> Option<Self> {
        let mut reader = Cursor { data, pos: 0 };
        let entry = match record_type {
            RecordType::Pull => {
                let result = PullResult {
                    request_id: reader.string()?,
                    user_id: reader.string()?,
                    pool_id: reader.string()?,
                    table_version: reader.u64()?,
                    pool_version: reader.u64()?,
                    outcome_tier: Tier::from_u8(reader.u8()?)?,
                    item_id: reader.u32()?,
                    pity_triggered: reader.flag()?,
                    converted: reader.flag()?,
                    timestamp: reader.u64()?,
                    sequence_number: reader.u64()?,
                };
                let ledger = reader.ledger()?;
                let expected_lifetime = reader.u64()?;
                let grant = if reader.flag()? { Some(reader.u32()?) } else { None };
                Self::Pull(PullCommit {
                    result,
                    ledger,
                    expected_lifetime,
                    grant,
                })
            }
            RecordType::Grant => {
                let user_id = reader.string()?;
                let count = reader.u32()? as usize;
                let items = (0..count).map(|_| reader.u32()).collect::<Option<Vec<_>>>()?;
                Self::Grant { user_id, items }
            }
        };
        // Trailing bytes mean a different layout than the one we understand.
        (reader.pos == data.len()).then_some(entry)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn put_len(buf: &mut Vec<u8>, len: usize) {
    buf.extend_from_slice(&(len as u32).to_le_bytes());
}

fn put_str(buf: &mut Vec<u8>, value: &str) {
    put_len(buf, value.len());
    buf.extend_from_slice(value.as_bytes());
}

fn put_ledger(buf: &mut Vec<u8>, ledger: &PityState) {
    put_len(buf, ledger.pulls_since.len());
    for (&tier, &count) in &ledger.pulls_since {
        buf.push(tier as u8);
        buf.extend_from_slice(&count.to_le_bytes());
    }
    buf.extend_from_slice(&ledger.lifetime_pulls.to_le_bytes());
    match ledger.table_version {
        Some(version) => {
            buf.push(1);
            buf.extend_from_slice(&version.to_le_bytes());
        }
        None => buf.push(0),
    }
}

/// Bounds-checked little-endian reader.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let data: &'a [u8] = self.data;
        let bytes = data.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|bytes| bytes[0])
    }

    fn flag(&mut self) -> Option<bool> {
        match self.u8()? {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }
    }

    fn u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    fn u64(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    fn string(&mut self) -> Option<String> {
        let len = self.u32()? as usize;
        String::from_utf8(self.take(len)?.to_vec()).ok()
    }

    fn ledger(&mut self) -> Option<PityState> {
        let count = self.u32()? as usize;
        let mut pulls_since = BTreeMap::new();
        for _ in 0..count {
            let tier = Tier::from_u8(self.u8()?)?;
            pulls_since.insert(tier, self.u32()?);
        }
        let lifetime_pulls = self.u64()?;
        let table_version = if self.flag()? { Some(self.u64()?) } else { None };
        Some(PityState {
            pulls_since,
            lifetime_pulls,
            table_version,
        })
    }
}

/// Open file plus the length of its intact prefix.
struct JournalFile {
    file: File,
    len: u64,
    /// Set when a failed append could not be rolled back.
    poisoned: bool,
}

/// Append-only journal of committed pulls.
pub struct Journal {
    /// Path to the journal file.
    path: PathBuf,
    /// Next Log Sequence Number.
    next_lsn: AtomicU64,
    /// File handle (protected by mutex for writes).
    file: Mutex<JournalFile>,
}

impl Journal {
    /// Opens or creates a journal and returns the intact records in it.
    ///
    /// A torn tail is truncated away with a warning.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Io`] if the file cannot be opened or read
    /// - [`StoreError::Corrupt`] if the header is not a journal header, or a
    ///   complete record is damaged or out of order; the file is left untouched
    pub fn open(path: impl AsRef<Path>) -> StoreResult<(Self, Vec<JournalEntry>)> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| io_error("open journal", &e))?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents).map_err(|e| io_error("read journal", &e))?;

        if contents.is_empty() {
            let mut header = Vec::with_capacity(8);
            header.extend_from_slice(JOURNAL_MAGIC);
            header.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
            file.write_all(&header).map_err(|e| io_error("write journal header", &e))?;
            file.sync_all().map_err(|e| io_error("sync journal header", &e))?;
            contents = header;
        }

        let (entries, intact_len, last_lsn) = Self::replay(&path, &contents)?;

        if intact_len < contents.len() as u64 {
            tracing::warn!(
                path = %path.display(),
                kept = entries.len(),
                discarded_bytes = contents.len() as u64 - intact_len,
                "journal has a torn tail, truncating"
            );
            file.set_len(intact_len).map_err(|e| io_error("truncate journal", &e))?;
            file.sync_all().map_err(|e| io_error("sync journal", &e))?;
        }
        file.seek(SeekFrom::Start(intact_len)).map_err(|e| io_error("seek journal", &e))?;

        let journal = Self {
            path,
            next_lsn: AtomicU64::new(last_lsn.map_or(0, |lsn| lsn + 1)),
            file: Mutex::new(JournalFile {
                file,
                len: intact_len,
                poisoned: false,
            }),
        };
        Ok((journal, entries))
    }

    /// Parses `contents`, returning the intact entries, the intact length and the last LSN.
    fn replay(path: &Path, contents: &[u8]) -> StoreResult<(Vec<JournalEntry>, u64, Option<u64>)> {
        if contents.len() < 8 || &contents[0..4] != JOURNAL_MAGIC {
            return Err(StoreError::Corrupt(format!("{} is not a pull journal", path.display())));
        }
        let version = u32::from_le_bytes([contents[4], contents[5], contents[6], contents[7]]);
        if version != JOURNAL_VERSION {
            return Err(StoreError::Corrupt(format!("unsupported journal version: {version}")));
        }

        let mut entries = Vec::new();
        let mut pos = 8usize;
        let mut last_lsn: Option<u64> = None;
        while pos < contents.len() {
            match Self::read_record(&contents[pos..]) {
                Frame::Record { lsn, entry, len } => {
                    if let Some(last) = last_lsn.filter(|&last| lsn <= last) {
                        return Err(StoreError::Corrupt(format!(
                            "{}: record at offset {pos} has LSN {lsn} after {last}",
                            path.display()
                        )));
                    }
                    last_lsn = Some(lsn);
                    entries.push(entry);
                    pos += len;
                }
                Frame::Incomplete => break,
                Frame::Damaged(reason) => {
                    return Err(StoreError::Corrupt(format!(
                        "{}: {reason} in record at offset {pos}",
                        path.display()
                    )));
                }
            }
        }

        Ok((entries, pos as u64, last_lsn))
    }

    /// Reads one framed record from the front of `data`.
    fn read_record(data: &[u8]) -> Frame {
        let mut cursor = Cursor { data, pos: 0 };
        let (Some(lsn), Some(raw_type), Some(payload_len)) = (cursor.u64(), cursor.u8(), cursor.u32()) else {
            return Frame::Incomplete;
        };
        let payload_len = payload_len as usize;
        if payload_len > MAX_PAYLOAD {
            return Frame::Damaged("oversized payload length");
        }
        let frame_len = payload_len + FRAME_OVERHEAD;
        if data.len() < frame_len {
            return Frame::Incomplete;
        }
        let Some(payload) = cursor.take(payload_len) else {
            return Frame::Incomplete;
        };
        let body_end = cursor.pos;
        let Some(stored_crc) = cursor.u32() else {
            return Frame::Incomplete;
        };

        if crc32fast::hash(&data[..body_end]) != stored_crc {
            return Frame::Damaged("checksum mismatch");
        }
        let Some(record_type) = RecordType::from_u8(raw_type) else {
            return Frame::Damaged("unknown record type");
        };
        match JournalEntry::decode(record_type, payload) {
            Some(entry) => Frame::Record {
                lsn,
                entry,
                len: frame_len,
            },
            None => Frame::Damaged("undecodable payload"),
        }
    }

    /// Appends and syncs one record. Returns its LSN.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Io`] if the write or sync failed; the record was rolled back
    /// - [`StoreError::Corrupt`] if an earlier failure could not be rolled back
    pub fn append(&self, entry: &JournalEntry) -> StoreResult<u64> {
        let mut journal = self.file.lock();
        if journal.poisoned {
            return Err(StoreError::Corrupt(format!(
                "journal {} has an unrecoverable partial write",
                self.path.display()
            )));
        }

        let lsn = self.next_lsn.load(Ordering::SeqCst);
        let payload = entry.encode();
        let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
        frame.extend_from_slice(&lsn.to_le_bytes());
        frame.push(entry.record_type() as u8);
        put_len(&mut frame, payload.len());
        frame.extend_from_slice(&payload);
        let crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        let written = journal
            .file
            .write_all(&frame)
            .and_then(|()| journal.file.sync_data());

        if let Err(e) = written {
            let intact_len = journal.len;
            let rolled_back = journal
                .file
                .set_len(intact_len)
                .and_then(|()| journal.file.seek(SeekFrom::Start(intact_len)).map(|_| ()));
            if let Err(rollback) = rolled_back {
                journal.poisoned = true;
                tracing::error!(path = %self.path.display(), error = %rollback, "journal rollback failed");
            }
            return Err(io_error("append journal record", &e));
        }

        journal.len += frame.len() as u64;
        self.next_lsn.store(lsn + 1, Ordering::SeqCst);
        Ok(lsn)
    }

    /// Path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes of intact records, header included.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.file.lock().len
    }

    /// True if the journal holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() <= HEADER_LEN
    }
}

fn io_error(action: &str, err: &std::io::Error) -> StoreError {
    StoreError::Io(format!("{action}: {err}"))
}
