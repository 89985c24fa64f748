//! Shared status-area files.
//!
//! An area is a header-prefixed file of fixed-size records under
//! `fifodir/`. Exactly one process mutates an area at a time (the
//! [`ActiveArea`], which holds an exclusive advisory lock on the backing
//! file); any number of [`PassiveArea`] readers attach read-only.
//!
//! Consistency contract:
//! - The active side rewrites a record in place with a single
//!   positioned write, so single-record reads cannot tear across
//!   records.
//! - Compound passive reads are framed by the header generation id: the
//!   reader loads the generation, reads, loads it again and retries on a
//!   change (the double-read pattern).
//! - [`ActiveArea::rebuild`] replaces the file atomically (write temp,
//!   fsync, rename) with the generation bumped; passive readers notice
//!   the new generation on their next read and re-attach.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use fs2::FileExt as _;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::header::{AreaHeader, HEADER_SIZE};
use super::AreaError;

/// Byte offset of the generation id inside the header.
const GENERATION_OFFSET: u64 = 20;

/// A record type that can live in a status area.
pub trait AreaRecord: Sized + Clone {
    /// Bumped whenever the record layout changes.
    const STRUCT_VERSION: u8;
    /// Fixed on-disk size; encoded records are padded up to this.
    const RECORD_SIZE: usize;

    fn encode_record(&self, buf: &mut Vec<u8>);
    fn decode_record(buf: &[u8]) -> Result<Self, AreaError>;
    /// Key used to retain records across rebuilds.
    fn record_alias(&self) -> &str;
}

fn encode_padded<R: AreaRecord>(record: &R) -> Result<Vec<u8>, AreaError> {
    let mut buf = Vec::with_capacity(R::RECORD_SIZE);
    record.encode_record(&mut buf);
    if buf.len() > R::RECORD_SIZE {
        return Err(AreaError::RecordTooLarge {
            size: buf.len(),
            max: R::RECORD_SIZE,
        });
    }
    buf.resize(R::RECORD_SIZE, 0);
    Ok(buf)
}

fn write_area_file<R: AreaRecord>(
    path: &Path,
    header: &AreaHeader,
    records: &[R],
) -> Result<(), AreaError> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = File::create(&tmp)?;
        f.write_all(&header.encode())?;
        for r in records {
            f.write_all(&encode_padded(r)?)?;
        }
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn read_records<R: AreaRecord>(f: &File, header: &AreaHeader) -> Result<Vec<R>, AreaError> {
    let mut records = Vec::with_capacity(header.record_count as usize);
    let mut buf = vec![0u8; header.record_size as usize];
    for i in 0..header.record_count as usize {
        f.read_exact_at(&mut buf, header.record_offset(i))?;
        records.push(R::decode_record(&buf)?);
    }
    Ok(records)
}

// =============================================================================
// Active side
// =============================================================================

/// Read-write handle on a status area; exclusive among mutators.
pub struct ActiveArea<R: AreaRecord> {
    path: PathBuf,
    file: File,
    header: AreaHeader,
    records: Vec<RwLock<R>>,
}

impl<R: AreaRecord> ActiveArea<R> {
    /// Creates (or replaces) the area file from `records` and attaches
    /// to it as the mutator.
    pub fn create(path: impl Into<PathBuf>, records: Vec<R>) -> Result<Self, AreaError> {
        let path = path.into();
        let header = AreaHeader::new(
            R::STRUCT_VERSION,
            records.len() as u32,
            R::RECORD_SIZE as u32,
        );
        write_area_file(&path, &header, &records)?;
        let file = Self::open_locked(&path)?;
        info!(path = %path.display(), records = records.len(), "status area created");
        Ok(Self {
            path,
            file,
            header,
            records: records.into_iter().map(RwLock::new).collect(),
        })
    }

    /// Attaches read-write to an existing area.
    pub fn attach(path: impl Into<PathBuf>) -> Result<Self, AreaError> {
        let path = path.into();
        if !path.exists() {
            return Err(AreaError::NotFound(path));
        }
        let file = Self::open_locked(&path)?;
        let mut head = [0u8; HEADER_SIZE];
        (&file).read_exact_at(&mut head, 0)?;
        let header = AreaHeader::decode(&head, R::STRUCT_VERSION)?;
        let records: Vec<R> = read_records(&file, &header)?;
        Ok(Self {
            path,
            file,
            header,
            records: records.into_iter().map(RwLock::new).collect(),
        })
    }

    fn open_locked(path: &Path) -> Result<File, AreaError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        file.try_lock_exclusive()
            .map_err(|_| AreaError::Locked(path.to_path_buf()))?;
        Ok(file)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn generation(&self) -> u32 {
        self.header.generation
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Feature-flag byte in the header.
    pub fn feature_flags(&self) -> u8 {
        self.header.feature_flags
    }

    /// Updates the header feature flags in place (no rebuild).
    pub fn set_feature_flags(&mut self, flags: u8) -> Result<(), AreaError> {
        self.header.feature_flags = flags;
        self.file.write_all_at(&self.header.encode(), 0)?;
        Ok(())
    }

    /// Runs `f` with shared access to record `idx`.
    pub fn read<T>(&self, idx: usize, f: impl FnOnce(&R) -> T) -> T {
        f(&self.records[idx].read())
    }

    /// Runs `f` with exclusive access to record `idx` and flushes it.
    ///
    /// The closure plus positioned flush is the per-record transaction;
    /// multi-field updates are not observable half-done.
    pub fn update<T>(&self, idx: usize, f: impl FnOnce(&mut R) -> T) -> Result<T, AreaError> {
        let mut guard = self.records[idx].write();
        let out = f(&mut guard);
        let buf = encode_padded(&*guard)?;
        self.file.write_all_at(&buf, self.header.record_offset(idx))?;
        Ok(out)
    }

    /// Clone of record `idx`.
    pub fn snapshot(&self, idx: usize) -> R {
        self.records[idx].read().clone()
    }

    /// Clones every record.
    pub fn snapshot_all(&self) -> Vec<R> {
        self.records.iter().map(|r| r.read().clone()).collect()
    }

    /// Index of the record with the given alias.
    pub fn position(&self, alias: &str) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.read().record_alias() == alias)
    }

    /// Atomically replaces the whole area with `new_records`, bumping the
    /// generation id so that passive readers re-attach.
    pub fn rebuild(&mut self, new_records: Vec<R>) -> Result<(), AreaError> {
        let mut header = AreaHeader::new(
            R::STRUCT_VERSION,
            new_records.len() as u32,
            R::RECORD_SIZE as u32,
        );
        header.generation = self.header.generation.wrapping_add(1);
        header.feature_flags = self.header.feature_flags;
        write_area_file(&self.path, &header, &new_records)?;
        self.file = Self::open_locked(&self.path)?;
        self.header = header;
        self.records = new_records.into_iter().map(RwLock::new).collect();
        debug!(path = %self.path.display(), generation = self.header.generation, "status area rebuilt");
        Ok(())
    }
}

// =============================================================================
// Passive side
// =============================================================================

/// Read-only handle on a status area.
pub struct PassiveArea<R: AreaRecord> {
    path: PathBuf,
    file: File,
    header: AreaHeader,
    _marker: std::marker::PhantomData<R>,
}

impl<R: AreaRecord> PassiveArea<R> {
    /// Attaches read-only; validates magic, version and record size.
    pub fn attach(path: impl Into<PathBuf>) -> Result<Self, AreaError> {
        let path = path.into();
        if !path.exists() {
            return Err(AreaError::NotFound(path));
        }
        let mut file = File::open(&path)?;
        let mut head = [0u8; HEADER_SIZE];
        file.read_exact(&mut head)?;
        let header = AreaHeader::decode(&head, R::STRUCT_VERSION)?;
        if header.record_size as usize != R::RECORD_SIZE {
            return Err(AreaError::BadSize {
                expected: R::RECORD_SIZE as u64,
                found: header.record_size as u64,
            });
        }
        Ok(Self {
            path,
            file,
            header,
            _marker: std::marker::PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.header.record_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.header.record_count == 0
    }

    pub fn generation(&self) -> u32 {
        self.header.generation
    }

    fn read_generation(&self) -> Result<u32, AreaError> {
        let mut g = [0u8; 4];
        self.file.read_exact_at(&mut g, GENERATION_OFFSET)?;
        Ok(u32::from_le_bytes(g))
    }

    fn reattach(&mut self) -> Result<(), AreaError> {
        *self = Self::attach(self.path.clone())?;
        Ok(())
    }

    /// Reads record `idx` with generation framing; re-attaches if the
    /// area was rebuilt underneath us.
    pub fn record(&mut self, idx: usize) -> Result<R, AreaError> {
        loop {
            let before = self.read_generation()?;
            if before != self.header.generation {
                self.reattach()?;
                continue;
            }
            if idx >= self.header.record_count as usize {
                return Err(AreaError::BadSize {
                    expected: self.header.record_count as u64,
                    found: idx as u64,
                });
            }
            let mut buf = vec![0u8; self.header.record_size as usize];
            self.file.read_exact_at(&mut buf, self.header.record_offset(idx))?;
            let after = self.read_generation()?;
            if before == after {
                return R::decode_record(&buf);
            }
            // Rebuilt mid-read; retry against the new file.
            self.reattach()?;
        }
    }

    /// Consistent snapshot of all records.
    pub fn records(&mut self) -> Result<Vec<R>, AreaError> {
        loop {
            let before = self.read_generation()?;
            if before != self.header.generation {
                self.reattach()?;
                continue;
            }
            let result: Result<Vec<R>, AreaError> = (0..self.len())
                .map(|i| {
                    let mut buf = vec![0u8; self.header.record_size as usize];
                    self.file.read_exact_at(&mut buf, self.header.record_offset(i))?;
                    R::decode_record(&buf)
                })
                .collect();
            let records = result?;
            if self.read_generation()? == before {
                return Ok(records);
            }
            self.reattach()?;
        }
    }
}
