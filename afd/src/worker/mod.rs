//! Transfer workers.
//!
//! A worker runs one job against one host: send the files of a spool
//! message ([`send`]), pull files from a remote directory
//! ([`retrieve`]), or run an external command over the batch
//! ([`exec`]). Workers are blocking; the dispatcher runs each on the
//! blocking pool and talks to it through the burst link. All
//! observable progress goes through the worker's FSA job slot, so
//! monitoring tools see the same state the dispatcher does.

pub mod archive;
pub mod dupcheck;
pub mod exec;
pub mod ftp;
pub mod local;
pub mod retrieve;
pub mod send;
pub mod session;
pub mod sftp;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::logsink::{DeleteRecord, OutputRecord};
use crate::status::area::ActiveArea;
use crate::status::fsa::{ConnectStatus, HostRecord};
use crate::status::AreaError;

pub use session::{ProtocolSession, RemoteEntry, SessionError};

/// Worker exit statuses, visible in the error history and the
/// dispatcher's logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    Success = 0,
    TransferSuccess = 1,
    StillFilesToSend = 2,
    OpenFileDirError = 10,
    MkdirError = 11,
    ExecError = 12,
    AllocError = 13,
    RemoveLockfileError = 14,
    GotKilled = 30,
    IsFaulty = 40,
}

impl Default for ExitStatus {
    fn default() -> Self {
        ExitStatus::Success
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("shared area: {0}")]
    Area(#[from] AreaError),
    #[error("spool directory {0} is gone")]
    SpoolMissing(PathBuf),
    #[error("job was cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Binary log fifo producers handed to a worker. Sinks are plain
/// writers so tests can capture the byte stream directly.
pub struct LogProducers {
    output: Option<Mutex<Box<dyn Write + Send>>>,
    delete: Option<Mutex<Box<dyn Write + Send>>>,
}

impl LogProducers {
    pub fn new(
        output: Option<Box<dyn Write + Send>>,
        delete: Option<Box<dyn Write + Send>>,
    ) -> Self {
        Self {
            output: output.map(Mutex::new),
            delete: delete.map(Mutex::new),
        }
    }

    /// No log sinks at all; used by tests that only care about FSA
    /// effects.
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    /// A dead sink must not take the transfer down with it.
    pub fn write_output(&self, rec: &OutputRecord) {
        if let Some(w) = &self.output {
            if let Err(err) = w.lock().write_all(&rec.encode()) {
                warn!(%err, "output log write failed, record dropped");
            }
        }
    }

    pub fn write_delete(&self, rec: &DeleteRecord) {
        if let Some(w) = &self.delete {
            if let Err(err) = w.lock().write_all(&rec.encode()) {
                warn!(%err, "delete log write failed, record dropped");
            }
        }
    }
}

/// Everything a worker needs besides its job: the shared host area,
/// its position and slot in it, and the work-directory layout.
pub struct WorkerContext {
    pub fsa: Arc<ActiveArea<HostRecord>>,
    pub fsa_pos: usize,
    pub slot: usize,
    pub archive_root: PathBuf,
    pub crc_dir: PathBuf,
    pub logs: LogProducers,
    /// Set by the dispatcher when the job is deleted mid-flight.
    pub cancel: CancellationToken,
}

impl WorkerContext {
    /// Checked between files; a cancelled worker stops cleanly at the
    /// next file boundary.
    pub fn check_cancelled(&self) -> Result<(), WorkerError> {
        if self.cancel.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }
        Ok(())
    }

    /// Runs a closure against this worker's job slot and persists the
    /// record.
    pub fn update_slot(
        &self,
        f: impl FnOnce(&mut crate::status::fsa::JobSlot),
    ) -> Result<(), AreaError> {
        let slot = self.slot;
        self.fsa.update(self.fsa_pos, |host| {
            if let Some(s) = host.job_status.get_mut(slot) {
                f(s);
            }
        })
    }

    pub fn set_connect_status(&self, status: ConnectStatus) -> Result<(), AreaError> {
        self.update_slot(|s| s.connect_status = status)
    }

    pub fn host_snapshot(&self) -> HostRecord {
        self.fsa.snapshot(self.fsa_pos)
    }
}

/// Scoped cleanup for a worker's FSA slot.
///
/// Every exit path of a worker, including panics on the blocking pool,
/// must free the slot and drop the host's active-transfer count, or
/// the dispatcher would consider the host saturated forever. Normal
/// completion calls [`SlotGuard::finish`]; the drop path covers the
/// rest.
pub struct SlotGuard {
    fsa: Arc<ActiveArea<HostRecord>>,
    fsa_pos: usize,
    slot: usize,
    armed: bool,
}

impl SlotGuard {
    pub fn new(fsa: Arc<ActiveArea<HostRecord>>, fsa_pos: usize, slot: usize) -> Self {
        Self {
            fsa,
            fsa_pos,
            slot,
            armed: true,
        }
    }

    fn release(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        let slot = self.slot;
        let result = self.fsa.update(self.fsa_pos, |host| {
            if let Some(s) = host.job_status.get_mut(slot) {
                s.reset();
            }
            if host.active_transfers > 0 {
                host.active_transfers -= 1;
            }
        });
        if let Err(err) = result {
            warn!(%err, "failed to release job slot");
        }
    }

    /// Orderly release on the success path.
    pub fn finish(mut self) {
        self.release();
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.release();
    }
}
