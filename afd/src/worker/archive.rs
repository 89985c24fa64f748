//! Archiving of successfully sent files.
//!
//! A file with `archive_time > 0` is moved into
//! `<archive>/<user>/<host>/<job_id>/<deletion_time>/<file>` where the
//! leaf directory name is the unix time after which the reaper may
//! remove it. A failed move degrades to plain unlink so the spool
//! never fills up, but the failure is logged.

use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Where one archived file ended up, relative to the archive root.
/// This subpath goes into the output log so operators can find and
/// resend the file.
pub fn archive_subpath(user: &str, host: &str, job_id: u32, deletion_time: i64) -> PathBuf {
    let user = if user.is_empty() { "none" } else { user };
    PathBuf::from(user)
        .join(host)
        .join(format!("{job_id:x}"))
        .join(deletion_time.to_string())
}

fn unique_target(dir: &Path, file_name: &str) -> PathBuf {
    let mut target = dir.join(file_name);
    let mut n = 0u32;
    while target.exists() {
        n += 1;
        target = dir.join(format!("{file_name}.{n}"));
    }
    target
}

/// Moves `source` into the archive tree. Returns the stored subpath,
/// or `None` when the file was unlinked instead (no archiving
/// requested, or the move failed).
pub fn archive_file(
    archive_root: &Path,
    source: &Path,
    user: &str,
    host: &str,
    job_id: u32,
    archive_time: u32,
    now: i64,
) -> io::Result<Option<PathBuf>> {
    if archive_time == 0 {
        std::fs::remove_file(source)?;
        return Ok(None);
    }
    let deletion_time = now + archive_time as i64;
    let sub = archive_subpath(user, host, job_id, deletion_time);
    let dir = archive_root.join(&sub);
    let file_name = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "source has no file name"))?;

    let moved = std::fs::create_dir_all(&dir).and_then(|_| {
        let target = unique_target(&dir, file_name);
        std::fs::rename(source, &target).map(|_| target)
    });
    match moved {
        Ok(target) => {
            let rel = sub.join(target.file_name().unwrap_or_default());
            Ok(Some(rel))
        }
        Err(err) => {
            warn!(
                file = %source.display(),
                %err,
                "archive move failed, removing instead"
            );
            std::fs::remove_file(source)?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archived_file_lands_under_deletion_time_leaf() {
        let spool = tempfile::tempdir().unwrap();
        let archive = tempfile::tempdir().unwrap();
        let src = spool.path().join("bulletin.txt");
        std::fs::write(&src, b"data").unwrap();

        let sub = archive_file(archive.path(), &src, "wmo", "gts", 0x2a, 600, 1_000)
            .unwrap()
            .unwrap();
        assert_eq!(sub, PathBuf::from("wmo/gts/2a/1600/bulletin.txt"));
        assert!(archive.path().join(&sub).exists());
        assert!(!src.exists());
    }

    #[test]
    fn zero_archive_time_unlinks() {
        let spool = tempfile::tempdir().unwrap();
        let archive = tempfile::tempdir().unwrap();
        let src = spool.path().join("f");
        std::fs::write(&src, b"x").unwrap();
        let sub = archive_file(archive.path(), &src, "", "h", 1, 0, 0).unwrap();
        assert!(sub.is_none());
        assert!(!src.exists());
    }

    #[test]
    fn name_collision_gets_a_numeric_suffix() {
        let spool = tempfile::tempdir().unwrap();
        let archive = tempfile::tempdir().unwrap();
        for expect in ["f", "f.1"] {
            let src = spool.path().join("f");
            std::fs::write(&src, b"x").unwrap();
            let sub = archive_file(archive.path(), &src, "u", "h", 1, 60, 100)
                .unwrap()
                .unwrap();
            assert_eq!(sub.file_name().unwrap().to_str().unwrap(), expect);
        }
    }

    #[test]
    fn empty_user_maps_to_none_directory() {
        let sub = archive_subpath("", "gts", 1, 5);
        assert!(sub.starts_with("none"));
    }
}
