//! Message cache.
//!
//! Parallel to the queue: one entry per known message holding the
//! metadata the dispatcher needs without opening the job description in
//! the spool. Cache entries outlive their queue entries so retry logic
//! can re-enqueue a failed message without re-reading the spool.

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;

use bytes::{Buf, BufMut};

use super::msg::MsgName;
use super::QueueError;

const CACHE_MAGIC: u32 = 0x4351_4D41; // "AMQC"
const CACHE_VERSION: u8 = 1;

/// Last transfer outcome recorded per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LastError {
    #[default]
    Ok = 0,
    Timeout = 1,
    ConnectRefused = 2,
    AuthFailed = 3,
    PartialTransfer = 4,
    ProtocolViolation = 5,
    Permanent = 6,
    Killed = 7,
}

impl LastError {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Timeout,
            2 => Self::ConnectRefused,
            3 => Self::AuthFailed,
            4 => Self::PartialTransfer,
            5 => Self::ProtocolViolation,
            6 => Self::Permanent,
            7 => Self::Killed,
            _ => Self::Ok,
        }
    }
}

/// Metadata for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub msg_name: MsgName,
    /// Index of the destination host in the FSA.
    pub fsa_pos: u32,
    pub job_id: u32,
    pub dir_id: u32,
    pub files: u32,
    pub bytes: u64,
    pub retry_interval: u32,
    /// Seconds after which unsent files are dropped; 0 disables ageing.
    pub age_limit: u32,
    pub last_error: LastError,
    pub last_retry_time: i64,
    /// Set when this message is a remote-directory retrieval.
    pub is_retrieve: bool,
}

impl CacheEntry {
    pub fn new(msg_name: MsgName, fsa_pos: u32, job_id: u32) -> Self {
        Self {
            msg_name,
            fsa_pos,
            job_id,
            dir_id: 0,
            files: 0,
            bytes: 0,
            retry_interval: 0,
            age_limit: 0,
            last_error: LastError::Ok,
            last_retry_time: 0,
            is_retrieve: false,
        }
    }

    /// Whether the retry back-off still holds at `now`.
    pub fn in_backoff(&self, now: i64) -> bool {
        self.last_error != LastError::Ok
            && now < self.last_retry_time + self.retry_interval as i64
    }
}

/// Positional cache of message metadata, persisted alongside the queue.
///
/// Queue entries reference cache entries by position; positions stay
/// stable until [`MessageCache::remove`] compacts them, which the
/// dispatcher only does after the queue entry is gone.
pub struct MessageCache {
    path: PathBuf,
    entries: Vec<CacheEntry>,
}

impl MessageCache {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let path = path.into();
        let mut cache = Self {
            path,
            entries: Vec::new(),
        };
        if cache.path.exists() {
            cache.load()?;
        }
        Ok(cache)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds an entry, returning its position.
    pub fn add(&mut self, entry: CacheEntry) -> Result<usize, QueueError> {
        self.entries.push(entry);
        self.store()?;
        Ok(self.entries.len() - 1)
    }

    pub fn get(&self, pos: usize) -> Option<&CacheEntry> {
        self.entries.get(pos)
    }

    /// Mutates the entry at `pos` and persists.
    pub fn update(
        &mut self,
        pos: usize,
        f: impl FnOnce(&mut CacheEntry),
    ) -> Result<(), QueueError> {
        let entry = self
            .entries
            .get_mut(pos)
            .ok_or(QueueError::BadPosition(pos))?;
        f(entry);
        self.store()
    }

    pub fn position(&self, msg_name: &MsgName) -> Option<usize> {
        self.entries.iter().position(|e| &e.msg_name == msg_name)
    }

    /// Removes the entry for `msg_name`. Positions above it shift down;
    /// callers re-resolve positions through the queue afterwards.
    pub fn remove(&mut self, msg_name: &MsgName) -> Result<CacheEntry, QueueError> {
        let pos = self
            .position(msg_name)
            .ok_or_else(|| QueueError::UnknownMessage(msg_name.to_string()))?;
        let entry = self.entries.remove(pos);
        self.store()?;
        Ok(entry)
    }

    /// Positions of all retrieve entries bound to `dir_id`.
    pub fn retrieves_for_dir(&self, dir_id: u32) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_retrieve && e.dir_id == dir_id)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.iter()
    }

    // -- persistence -------------------------------------------------------

    fn load(&mut self) -> Result<(), QueueError> {
        let mut raw = Vec::new();
        File::open(&self.path)?.read_to_end(&mut raw)?;
        let mut buf = raw.as_slice();
        if buf.remaining() < 9 || buf.get_u32_le() != CACHE_MAGIC {
            return Err(QueueError::Corrupt);
        }
        let version = buf.get_u8();
        if version != CACHE_VERSION {
            return Err(QueueError::VersionMismatch {
                found: version,
                expected: CACHE_VERSION,
            });
        }
        let count = buf.get_u32_le() as usize;
        self.entries.clear();
        for _ in 0..count {
            if buf.remaining() < 2 {
                return Err(QueueError::Corrupt);
            }
            let name_len = buf.get_u16_le() as usize;
            if buf.remaining() < name_len {
                return Err(QueueError::Corrupt);
            }
            let name = std::str::from_utf8(&buf[..name_len])
                .map_err(|_| QueueError::Corrupt)?
                .to_string();
            buf.advance(name_len);
            let msg_name = MsgName::parse(&name).map_err(|_| QueueError::Corrupt)?;
            if buf.remaining() < 4 * 5 + 8 + 4 + 1 + 8 + 1 {
                return Err(QueueError::Corrupt);
            }
            self.entries.push(CacheEntry {
                msg_name,
                fsa_pos: buf.get_u32_le(),
                job_id: buf.get_u32_le(),
                dir_id: buf.get_u32_le(),
                files: buf.get_u32_le(),
                bytes: buf.get_u64_le(),
                retry_interval: buf.get_u32_le(),
                age_limit: buf.get_u32_le(),
                last_error: LastError::from_u8(buf.get_u8()),
                last_retry_time: buf.get_i64_le(),
                is_retrieve: buf.get_u8() != 0,
            });
        }
        Ok(())
    }

    fn store(&self) -> Result<(), QueueError> {
        let mut out = Vec::new();
        out.put_u32_le(CACHE_MAGIC);
        out.put_u8(CACHE_VERSION);
        out.put_u32_le(self.entries.len() as u32);
        for e in &self.entries {
            let name = e.msg_name.as_str().as_bytes();
            out.put_u16_le(name.len() as u16);
            out.put_slice(name);
            out.put_u32_le(e.fsa_pos);
            out.put_u32_le(e.job_id);
            out.put_u32_le(e.dir_id);
            out.put_u32_le(e.files);
            out.put_u64_le(e.bytes);
            out.put_u32_le(e.retry_interval);
            out.put_u32_le(e.age_limit);
            out.put_u8(e.last_error as u8);
            out.put_i64_le(e.last_retry_time);
            out.put_u8(e.is_retrieve as u8);
        }
        let tmp = self.path.with_extension("tmp");
        {
            let mut f = File::create(&tmp)?;
            f.write_all(&out)?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
