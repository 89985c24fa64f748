//! Duplicate detection for send jobs.
//!
//! A CRC over the file name, name+size, or content is checked against
//! a small per-host table persisted under `<work_dir>/crc`. Entries
//! expire after the host's dup_check_timeout; by default a hit
//! refreshes the entry's clock, with TIMEOUT_IS_FIXED the original
//! insertion time keeps counting.

use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut};

use crate::status::fsa::DupCheckFlags;

const DUP_MAGIC: u32 = 0x4352_4344; // "DCRC"

/// What to do with a detected duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DupAction {
    Delete,
    Store,
    Warn,
}

impl DupAction {
    pub fn from_flags(flags: DupCheckFlags) -> Option<Self> {
        if flags.contains(DupCheckFlags::DELETE) {
            Some(DupAction::Delete)
        } else if flags.contains(DupCheckFlags::STORE) {
            Some(DupAction::Store)
        } else if flags.contains(DupCheckFlags::WARN) {
            Some(DupAction::Warn)
        } else {
            None
        }
    }
}

/// Computes the check value for one file according to the configured
/// basis. CRC32 and CRC32C both map onto the same polynomial here;
/// the flag only selects the table name space.
pub fn compute_crc(
    flags: DupCheckFlags,
    path: &Path,
    file_name: &str,
    size: u64,
) -> io::Result<u32> {
    if flags.contains(DupCheckFlags::CONTENT) {
        let mut hasher = crc32fast::Hasher::new();
        let mut file = std::fs::File::open(path)?;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    } else if flags.contains(DupCheckFlags::NAME_AND_SIZE) {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(file_name.as_bytes());
        hasher.update(&size.to_le_bytes());
        Ok(hasher.finalize())
    } else {
        Ok(crc32fast::hash(file_name.as_bytes()))
    }
}

/// One persisted duplicate table; the table id is the host id, or the
/// job id with USE_RECIPIENT_ID.
pub struct DupTable {
    path: PathBuf,
    entries: HashMap<u32, i64>,
    dirty: bool,
}

impl DupTable {
    pub fn open(crc_dir: &Path, table_id: u32) -> io::Result<Self> {
        std::fs::create_dir_all(crc_dir)?;
        let path = crc_dir.join(format!("{table_id:x}"));
        let mut entries = HashMap::new();
        match std::fs::read(&path) {
            Ok(bytes) if bytes.len() >= 4 => {
                let mut buf = &bytes[..];
                if buf.get_u32_le() == DUP_MAGIC {
                    while buf.len() >= 12 {
                        let crc = buf.get_u32_le();
                        let seen = buf.get_i64_le();
                        entries.insert(crc, seen);
                    }
                }
                // Anything else is a stale or foreign file; start over.
            }
            _ => {}
        }
        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks one value, inserting it when new. Returns true on a
    /// duplicate hit within the timeout window.
    pub fn check(&mut self, crc: u32, now: i64, timeout: i64, fixed: bool) -> bool {
        self.prune(now, timeout);
        match self.entries.get_mut(&crc) {
            Some(seen) => {
                if !fixed {
                    *seen = now;
                }
                self.dirty = true;
                true
            }
            None => {
                self.entries.insert(crc, now);
                self.dirty = true;
                false
            }
        }
    }

    fn prune(&mut self, now: i64, timeout: i64) {
        if timeout <= 0 {
            return;
        }
        let before = self.entries.len();
        self.entries.retain(|_, seen| now - *seen < timeout);
        if self.entries.len() != before {
            self.dirty = true;
        }
    }

    /// Persists the table atomically. A no-op while nothing changed.
    pub fn save(&mut self) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let mut out = Vec::with_capacity(4 + self.entries.len() * 12);
        out.put_u32_le(DUP_MAGIC);
        for (crc, seen) in &self.entries {
            out.put_u32_le(*crc);
            out.put_i64_le(*seen);
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &out)?;
        std::fs::rename(&tmp, &self.path)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sight_is_not_a_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = DupTable::open(dir.path(), 0xbeef).unwrap();
        assert!(!t.check(1234, 100, 3600, false));
        assert!(t.check(1234, 200, 3600, false));
    }

    #[test]
    fn entries_expire_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = DupTable::open(dir.path(), 1).unwrap();
        assert!(!t.check(7, 100, 60, false));
        // Refreshing semantics: the hit at 150 restarts the clock.
        assert!(t.check(7, 150, 60, false));
        assert!(t.check(7, 209, 60, false));
        assert!(!t.check(7, 300, 60, false));
    }

    #[test]
    fn fixed_timeout_counts_from_first_sight() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = DupTable::open(dir.path(), 2).unwrap();
        assert!(!t.check(9, 100, 60, true));
        assert!(t.check(9, 150, 60, true));
        // 160s after first sight the entry is gone despite the hit at 150.
        assert!(!t.check(9, 260, 60, true));
    }

    #[test]
    fn table_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut t = DupTable::open(dir.path(), 3).unwrap();
            t.check(11, 100, 0, false);
            t.check(22, 100, 0, false);
            t.save().unwrap();
        }
        let mut t = DupTable::open(dir.path(), 3).unwrap();
        assert_eq!(t.len(), 2);
        assert!(t.check(11, 101, 0, false));
    }

    #[test]
    fn crc_basis_selection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"same-content").unwrap();

        let by_name =
            compute_crc(DupCheckFlags::FILENAME_ONLY, &path, "f", 12).unwrap();
        let by_name2 =
            compute_crc(DupCheckFlags::FILENAME_ONLY, &path, "g", 12).unwrap();
        assert_ne!(by_name, by_name2);

        let by_size =
            compute_crc(DupCheckFlags::NAME_AND_SIZE, &path, "f", 12).unwrap();
        let by_size2 =
            compute_crc(DupCheckFlags::NAME_AND_SIZE, &path, "f", 13).unwrap();
        assert_ne!(by_size, by_size2);

        let by_content = compute_crc(DupCheckFlags::CONTENT, &path, "f", 12).unwrap();
        assert_eq!(
            by_content,
            crc32fast::hash(b"same-content"),
            "content basis hashes the bytes"
        );
    }

    #[test]
    fn action_priority_delete_store_warn() {
        assert_eq!(
            DupAction::from_flags(DupCheckFlags::DELETE | DupCheckFlags::WARN),
            Some(DupAction::Delete)
        );
        assert_eq!(
            DupAction::from_flags(DupCheckFlags::STORE),
            Some(DupAction::Store)
        );
        assert_eq!(DupAction::from_flags(DupCheckFlags::empty()), None);
    }
}
