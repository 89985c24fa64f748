//! Work directory layout.
//!
//! Everything AFD persists lives under a single work directory:
//!
//! ```text
//! <work_dir>/
//!   fifodir/            status areas, queue/cache files, command fifos
//!   files/outgoing/     spool: one directory per queued message
//!   files/incoming/     AMG inbox (retrieve workers rename into here)
//!   archive/            <user>/<host>/<job>/<deletion_time>/<file>
//!   log/                rotated operator log files
//! ```
//!
//! [`WorkDir`] is the single place that knows these names; every other
//! module asks it for paths instead of joining strings itself.

use std::io;
use std::path::{Path, PathBuf};

/// File name of the host status area (FSA).
pub const FSA_STAT_FILE: &str = "fsa_stat";
/// File name of the directory status area (FRA).
pub const FRA_STAT_FILE: &str = "fra_stat";
/// File name of the AFD status area.
pub const AFD_STATUS_FILE: &str = "afd_status";
/// File name of the message queue.
pub const MSG_QUEUE_FILE: &str = "msg_queue";
/// File name of the message cache.
pub const MSG_CACHE_FILE: &str = "msg_cache";
/// File name of the identifier catalogue.
pub const DC_LIST_FILE: &str = "dc_list";
/// File name of the active-processes registry.
pub const AFD_ACTIVE_FILE: &str = "afd_active";
/// Single-instance lock file.
pub const AFD_LOCK_FILE: &str = "afd.lock";

/// Supervisor command fifo.
pub const AFD_CMD_FIFO: &str = "afd_cmd.fifo";
/// Probe-response fifo (IS_ALIVE answers).
pub const AFD_RESP_FIFO: &str = "afd_resp.fifo";
/// Dispatcher command fifo (burst/worker signalling from outside).
pub const FD_CMD_FIFO: &str = "fd_cmd.fifo";
/// Dispatcher delete fifo (DELETE_MESSAGE and friends).
pub const FD_DELETE_FIFO: &str = "fd_delete.fifo";
/// Output log fifo.
pub const OUTPUT_LOG_FIFO: &str = "output_log.fifo";
/// Input log fifo.
pub const INPUT_LOG_FIFO: &str = "input_log.fifo";
/// Delete log fifo.
pub const DELETE_LOG_FIFO: &str = "delete_log.fifo";
/// Distribution log fifo.
pub const DISTRIBUTION_LOG_FIFO: &str = "distribution_log.fifo";
/// Archive watch command fifo.
pub const AW_CMD_FIFO: &str = "aw_cmd.fifo";

/// Resolved AFD work directory.
///
/// Cheap to clone; holds only the root path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    /// Wraps an existing directory without creating anything.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves the work directory from an explicit flag or the
    /// `AFD_WORK_DIR` environment variable.
    pub fn resolve(explicit: Option<&Path>) -> Option<Self> {
        if let Some(p) = explicit {
            return Some(Self::new(p));
        }
        std::env::var_os("AFD_WORK_DIR").map(|v| Self::new(PathBuf::from(v)))
    }

    /// Creates the full subdirectory layout if missing.
    pub fn ensure_layout(&self) -> io::Result<()> {
        for dir in [
            self.fifo_dir(),
            self.outgoing_dir(),
            self.incoming_dir(),
            self.archive_dir(),
            self.log_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Root of the work directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding status areas, queue files and fifos.
    pub fn fifo_dir(&self) -> PathBuf {
        self.root.join("fifodir")
    }

    /// Outgoing spool; one subdirectory per queued message name.
    pub fn outgoing_dir(&self) -> PathBuf {
        self.root.join("files").join("outgoing")
    }

    /// Spool directory for a specific message.
    pub fn msg_dir(&self, msg_name: &str) -> PathBuf {
        self.outgoing_dir().join(msg_name)
    }

    /// AMG inbox for retrieved files.
    pub fn incoming_dir(&self) -> PathBuf {
        self.root.join("files").join("incoming")
    }

    /// Archive tree root.
    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("archive")
    }

    /// Rotated operator log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.root.join("log")
    }

    /// Path of a named file inside `fifodir/`.
    pub fn fifo_file(&self, name: &str) -> PathBuf {
        self.fifo_dir().join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn layout_is_created() {
        let tmp = TempDir::new().unwrap();
        let wd = WorkDir::new(tmp.path());
        wd.ensure_layout().unwrap();

        assert!(wd.fifo_dir().is_dir());
        assert!(wd.outgoing_dir().is_dir());
        assert!(wd.incoming_dir().is_dir());
        assert!(wd.archive_dir().is_dir());
        assert!(wd.log_dir().is_dir());
    }

    #[test]
    fn msg_dir_nests_under_outgoing() {
        let wd = WorkDir::new("/var/afd");
        assert_eq!(
            wd.msg_dir("4af1b_3_0"),
            PathBuf::from("/var/afd/files/outgoing/4af1b_3_0")
        );
    }

    #[test]
    fn resolve_prefers_explicit_path() {
        let wd = WorkDir::resolve(Some(Path::new("/tmp/afd"))).unwrap();
        assert_eq!(wd.root(), Path::new("/tmp/afd"));
    }
}
