//! Identifier catalogue.
//!
//! Assigns stable 32-bit IDs to host aliases, directory aliases and
//! DIR_CONFIG paths. IDs are the CRC32 of the name; a collision is
//! resolved by mixing a counter into the hash until the ID is unique, so
//! an assigned ID never changes for the lifetime of the catalogue.
//!
//! The catalogue is persisted as a small versioned file that is
//! rewritten atomically (write temp, fsync, rename) on every mutation.
//! Readers load it once and serve lookups from two in-memory indices.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut};
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

/// `"AFDC"` little-endian.
const CATALOG_MAGIC: u32 = 0x4344_4641;
/// On-disk catalogue format version.
pub const CATALOG_VERSION: u8 = 1;
/// Longest accepted catalogue name.
pub const MAX_CATALOG_NAME: usize = 256;

/// Errors raised by catalogue operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalogue not found: {0} (run `afd init` to initialise)")]
    Missing(PathBuf),
    #[error("catalogue version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u8, expected: u8 },
    #[error("catalogue file corrupt")]
    Corrupt,
    #[error("name too long ({0} bytes)")]
    NameTooLong(usize),
    #[error("unknown name: {0}")]
    UnknownName(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One catalogue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: u32,
    pub name: String,
    /// DIR_CONFIG the name came from, when known.
    pub source: String,
}

/// Name ⇄ ID catalogue with a versioned on-disk image.
pub struct IdCatalog {
    path: PathBuf,
    by_name: DashMap<String, CatalogEntry>,
    by_id: DashMap<u32, String>,
    generation: u32,
}

impl IdCatalog {
    /// Opens an existing catalogue or starts an empty one at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let path = path.into();
        let mut catalog = Self {
            path,
            by_name: DashMap::new(),
            by_id: DashMap::new(),
            generation: 0,
        };
        if catalog.path.exists() {
            catalog.load()?;
        }
        Ok(catalog)
    }

    /// Opens a catalogue that must already exist.
    pub fn open_existing(path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let path: PathBuf = path.into();
        if !path.exists() {
            return Err(CatalogError::Missing(path));
        }
        Self::open(path)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// ID for `name`, if catalogued.
    pub fn lookup_by_name(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).map(|e| e.id)
    }

    /// Name for `id`, if catalogued.
    pub fn lookup_by_id(&self, id: u32) -> Option<String> {
        self.by_id.get(&id).map(|n| n.clone())
    }

    /// Inserts `name`, assigning a stable ID; returns the existing ID if
    /// the name is already catalogued.
    pub fn insert(&mut self, name: &str) -> Result<u32, CatalogError> {
        self.insert_with_source(name, "")
    }

    /// Like [`insert`](Self::insert) but records the DIR_CONFIG the name
    /// came from.
    pub fn insert_with_source(&mut self, name: &str, source: &str) -> Result<u32, CatalogError> {
        if name.len() > MAX_CATALOG_NAME {
            return Err(CatalogError::NameTooLong(name.len()));
        }
        if let Some(entry) = self.by_name.get(name) {
            return Ok(entry.id);
        }

        let mut id = crc32fast::hash(name.as_bytes());
        let mut salt = 0u32;
        while self.by_id.contains_key(&id) {
            // Collision: mix a counter into the hash until unique.
            salt += 1;
            let mut h = crc32fast::Hasher::new();
            h.update(name.as_bytes());
            h.update(&salt.to_le_bytes());
            id = h.finalize();
        }
        if salt > 0 {
            debug!(name, id, salt, "catalogue id collision resolved");
        }

        self.by_name.insert(
            name.to_string(),
            CatalogEntry {
                id,
                name: name.to_string(),
                source: source.to_string(),
            },
        );
        self.by_id.insert(id, name.to_string());
        self.store()?;
        Ok(id)
    }

    /// Removes `name` from the catalogue.
    pub fn remove(&mut self, name: &str) -> Result<(), CatalogError> {
        let (_, entry) = self
            .by_name
            .remove(name)
            .ok_or_else(|| CatalogError::UnknownName(name.to_string()))?;
        self.by_id.remove(&entry.id);
        self.store()
    }

    /// Writes entries to `out`, one `id<TAB>name<TAB>source` line each,
    /// optionally filtered by substring match on the name.
    pub fn print(&self, out: &mut impl Write, filter: Option<&str>) -> io::Result<()> {
        let mut entries: Vec<CatalogEntry> =
            self.by_name.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        for e in entries {
            if let Some(f) = filter {
                if !e.name.contains(f) {
                    continue;
                }
            }
            writeln!(out, "{:>10}\t{}\t{}", e.id, e.name, e.source)?;
        }
        Ok(())
    }

    // -- persistence -------------------------------------------------------

    fn load(&mut self) -> Result<(), CatalogError> {
        let mut raw = Vec::new();
        File::open(&self.path)?.read_to_end(&mut raw)?;
        let mut buf = raw.as_slice();
        if buf.remaining() < 13 {
            return Err(CatalogError::Corrupt);
        }
        if buf.get_u32_le() != CATALOG_MAGIC {
            return Err(CatalogError::Corrupt);
        }
        let version = buf.get_u8();
        if version != CATALOG_VERSION {
            return Err(CatalogError::VersionMismatch {
                found: version,
                expected: CATALOG_VERSION,
            });
        }
        let count = buf.get_u32_le();
        self.generation = buf.get_u32_le();

        self.by_name.clear();
        self.by_id.clear();
        for _ in 0..count {
            let entry = Self::read_entry(&mut buf)?;
            self.by_id.insert(entry.id, entry.name.clone());
            self.by_name.insert(entry.name.clone(), entry);
        }
        Ok(())
    }

    fn read_entry(buf: &mut &[u8]) -> Result<CatalogEntry, CatalogError> {
        if buf.remaining() < 6 {
            return Err(CatalogError::Corrupt);
        }
        let id = buf.get_u32_le();
        let name = Self::read_string(buf)?;
        let source = Self::read_string(buf)?;
        Ok(CatalogEntry { id, name, source })
    }

    fn read_string(buf: &mut &[u8]) -> Result<String, CatalogError> {
        if buf.remaining() < 2 {
            return Err(CatalogError::Corrupt);
        }
        let len = buf.get_u16_le() as usize;
        if len > MAX_CATALOG_NAME || buf.remaining() < len {
            return Err(CatalogError::Corrupt);
        }
        let s = std::str::from_utf8(&buf[..len])
            .map_err(|_| CatalogError::Corrupt)?
            .to_string();
        buf.advance(len);
        Ok(s)
    }

    fn store(&mut self) -> Result<(), CatalogError> {
        self.generation = self.generation.wrapping_add(1);
        let mut out = Vec::new();
        out.put_u32_le(CATALOG_MAGIC);
        out.put_u8(CATALOG_VERSION);
        out.put_u32_le(self.by_name.len() as u32);
        out.put_u32_le(self.generation);
        let mut entries: Vec<CatalogEntry> =
            self.by_name.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        for e in entries {
            out.put_u32_le(e.id);
            out.put_u16_le(e.name.len() as u16);
            out.put_slice(e.name.as_bytes());
            out.put_u16_le(e.source.len() as u16);
            out.put_slice(e.source.as_bytes());
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

/// Convenience for callers that only need a one-shot lookup.
pub fn lookup_id(path: &Path, name: &str) -> Result<Option<u32>, CatalogError> {
    Ok(IdCatalog::open_existing(path)?.lookup_by_name(name))
}
