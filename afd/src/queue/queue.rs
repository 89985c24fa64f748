//! The message queue.
//!
//! Durable, insertion-ordered list of outstanding jobs. Every entry is a
//! `{msg_name, cache position}` pair; membership operations compare by
//! message name. Removal shifts the tail down one slot, so iteration
//! order is always the original insertion order.
//!
//! Mutations rewrite the backing file while holding a whole-file
//! exclusive advisory lock; readers in other processes reload the file
//! and are framed by the same lock.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;

use bytes::{Buf, BufMut};
use fs2::FileExt;

use super::msg::MsgName;
use super::QueueError;

const QUEUE_MAGIC: u32 = 0x5551_4D41; // "AMQU"
const QUEUE_VERSION: u8 = 1;

/// One queue slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub msg_name: MsgName,
    /// Position of the metadata in the message cache.
    pub pos: u32,
}

/// Insertion-ordered durable queue of outstanding messages.
pub struct MessageQueue {
    path: PathBuf,
    entries: Vec<QueueEntry>,
}

impl MessageQueue {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let path = path.into();
        let mut q = Self {
            path,
            entries: Vec::new(),
        };
        if q.path.exists() {
            q.load()?;
        }
        Ok(q)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends an entry. The name must already be validated; duplicate
    /// names are rejected so a message appears exactly once.
    pub fn enqueue(&mut self, msg_name: MsgName, cache_pos: u32) -> Result<(), QueueError> {
        if self.find(&msg_name).is_some() {
            return Err(QueueError::Duplicate(msg_name.to_string()));
        }
        self.entries.push(QueueEntry {
            msg_name,
            pos: cache_pos,
        });
        self.store()
    }

    /// Index of `msg_name`, or `None`.
    pub fn find(&self, msg_name: &MsgName) -> Option<usize> {
        self.entries.iter().position(|e| &e.msg_name == msg_name)
    }

    /// Removes the entry at `index`, shifting the tail down.
    pub fn remove_at(&mut self, index: usize) -> Result<QueueEntry, QueueError> {
        if index >= self.entries.len() {
            return Err(QueueError::BadPosition(index));
        }
        let entry = self.entries.remove(index);
        self.store()?;
        Ok(entry)
    }

    /// Removes the entry named `msg_name`.
    pub fn remove_by_name(&mut self, msg_name: &MsgName) -> Result<QueueEntry, QueueError> {
        let idx = self
            .find(msg_name)
            .ok_or_else(|| QueueError::UnknownMessage(msg_name.to_string()))?;
        self.remove_at(idx)
    }

    /// Stable forward iteration in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    pub fn get(&self, index: usize) -> Option<&QueueEntry> {
        self.entries.get(index)
    }

    /// Re-reads the file (another process may have edited it while the
    /// dispatcher was not running).
    pub fn reload(&mut self) -> Result<(), QueueError> {
        if self.path.exists() {
            self.load()
        } else {
            self.entries.clear();
            Ok(())
        }
    }

    // -- persistence -------------------------------------------------------

    fn load(&mut self) -> Result<(), QueueError> {
        let mut file = File::open(&self.path)?;
        file.lock_shared()?;
        let mut raw = Vec::new();
        let result = file.read_to_end(&mut raw);
        let _ = fs2::FileExt::unlock(&file);
        result?;

        let mut buf = raw.as_slice();
        if buf.remaining() < 9 || buf.get_u32_le() != QUEUE_MAGIC {
            return Err(QueueError::Corrupt);
        }
        let version = buf.get_u8();
        if version != QUEUE_VERSION {
            return Err(QueueError::VersionMismatch {
                found: version,
                expected: QUEUE_VERSION,
            });
        }
        let count = buf.get_u32_le() as usize;
        self.entries.clear();
        for _ in 0..count {
            if buf.remaining() < 2 {
                return Err(QueueError::Corrupt);
            }
            let len = buf.get_u16_le() as usize;
            if buf.remaining() < len + 4 {
                return Err(QueueError::Corrupt);
            }
            let name = std::str::from_utf8(&buf[..len])
                .map_err(|_| QueueError::Corrupt)?
                .to_string();
            buf.advance(len);
            let pos = buf.get_u32_le();
            self.entries.push(QueueEntry {
                msg_name: MsgName::parse(&name).map_err(|_| QueueError::Corrupt)?,
                pos,
            });
        }
        Ok(())
    }

    fn store(&self) -> Result<(), QueueError> {
        let mut out = Vec::new();
        out.put_u32_le(QUEUE_MAGIC);
        out.put_u8(QUEUE_VERSION);
        out.put_u32_le(self.entries.len() as u32);
        for e in &self.entries {
            let name = e.msg_name.as_str().as_bytes();
            out.put_u16_le(name.len() as u16);
            out.put_slice(name);
            out.put_u32_le(e.pos);
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.path)?;
        file.lock_exclusive()?;
        let result = (|| {
            file.set_len(0)?;
            let mut f = &file;
            f.write_all(&out)?;
            f.sync_all()
        })();
        let _ = fs2::FileExt::unlock(&file);
        result?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn name(s: &str) -> MsgName {
        MsgName::parse(s).unwrap()
    }

    fn queue_with(tmp: &TempDir, names: &[&str]) -> MessageQueue {
        let mut q = MessageQueue::open(tmp.path().join("msg_queue")).unwrap();
        for (i, n) in names.iter().enumerate() {
            q.enqueue(name(n), i as u32).unwrap();
        }
        q
    }

    #[test]
    fn insertion_order_is_stable() {
        let tmp = TempDir::new().unwrap();
        let q = queue_with(&tmp, &["1_1_0", "2_2_0", "3_3_0"]);
        let order: Vec<&str> = q.iter().map(|e| e.msg_name.as_str()).collect();
        assert_eq!(order, vec!["1_1_0", "2_2_0", "3_3_0"]);
    }

    #[test]
    fn duplicate_enqueue_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut q = queue_with(&tmp, &["1_1_0"]);
        assert!(matches!(
            q.enqueue(name("1_1_0"), 9),
            Err(QueueError::Duplicate(_))
        ));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn remove_first_position() {
        let tmp = TempDir::new().unwrap();
        let mut q = queue_with(&tmp, &["1_1_0", "2_2_0", "3_3_0"]);
        q.remove_at(0).unwrap();
        assert_eq!(q.len(), 2);
        assert_eq!(q.get(0).unwrap().msg_name.as_str(), "2_2_0");
    }

    #[test]
    fn remove_last_position() {
        let tmp = TempDir::new().unwrap();
        let mut q = queue_with(&tmp, &["1_1_0", "2_2_0", "3_3_0"]);
        q.remove_at(2).unwrap();
        assert_eq!(q.len(), 2);
        assert_eq!(q.get(1).unwrap().msg_name.as_str(), "2_2_0");
    }

    #[test]
    fn remove_by_name_only_first_succeeds() {
        let tmp = TempDir::new().unwrap();
        let mut q = queue_with(&tmp, &["1_1_0", "2_2_0"]);
        assert!(q.remove_by_name(&name("1_1_0")).is_ok());
        for _ in 0..3 {
            assert!(matches!(
                q.remove_by_name(&name("1_1_0")),
                Err(QueueError::UnknownMessage(_))
            ));
        }
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("msg_queue");
        {
            let mut q = MessageQueue::open(&path).unwrap();
            q.enqueue(name("aa_1_0"), 5).unwrap();
        }
        let q = MessageQueue::open(&path).unwrap();
        assert_eq!(q.len(), 1);
        assert_eq!(q.get(0).unwrap().pos, 5);
    }

    #[test]
    fn reload_picks_up_external_edits() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("msg_queue");
        let mut q1 = MessageQueue::open(&path).unwrap();
        q1.enqueue(name("aa_1_0"), 0).unwrap();

        // A second handle mutates the file behind q1's back.
        let mut q2 = MessageQueue::open(&path).unwrap();
        q2.enqueue(name("bb_2_0"), 1).unwrap();

        q1.reload().unwrap();
        assert_eq!(q1.len(), 2);
    }
}
