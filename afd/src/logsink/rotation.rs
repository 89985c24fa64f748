//! Generation rotation for the operator log files.
//!
//! `OUTPUT_LOG` becomes `OUTPUT_LOG.0`, `.0` becomes `.1` and so on up
//! to the configured maximum; the oldest generation is dropped. The
//! shift runs from the highest suffix downwards so no generation is
//! overwritten before it has been moved.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

fn generation_path(base: &Path, n: usize) -> PathBuf {
    let mut os = base.as_os_str().to_os_string();
    os.push(format!(".{n}"));
    PathBuf::from(os)
}

/// Shifts the generation chain and retires the current file to `.0`.
/// `max_files` counts the live file plus its generations; with
/// `max_files == 1` the current file is simply removed.
pub fn rotate(base: &Path, max_files: usize) -> io::Result<()> {
    if !base.exists() {
        return Ok(());
    }
    if max_files <= 1 {
        std::fs::remove_file(base)?;
        return Ok(());
    }
    let oldest = max_files - 2;
    let drop_path = generation_path(base, oldest);
    if drop_path.exists() {
        std::fs::remove_file(&drop_path)?;
    }
    for n in (0..oldest).rev() {
        let from = generation_path(base, n);
        if from.exists() {
            std::fs::rename(&from, generation_path(base, n + 1))?;
        }
    }
    std::fs::rename(base, generation_path(base, 0))?;
    debug!(base = %base.display(), "rotated log generation");
    Ok(())
}

/// Reads generations oldest-first plus the live file, concatenated.
/// Used by tests and by tooling that replays a full log history.
pub fn read_joined(base: &Path, max_files: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    for n in (0..max_files.saturating_sub(1)).rev() {
        let p = generation_path(base, n);
        if p.exists() {
            out.extend(std::fs::read(&p)?);
        }
    }
    if base.exists() {
        out.extend(std::fs::read(base)?);
    }
    Ok(out)
}
