//! Named-pipe plumbing for the control surface.
//!
//! Fifos live under `<work_dir>/fifodir`. Writers keep each wire
//! command within a single `write(2)` of at most [`PIPE_BUF`] bytes so
//! concurrent senders cannot interleave mid-command; longer payloads
//! are chunked and rely on the reader-side parser to reassemble.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use tokio::io::AsyncWriteExt;
use tokio::net::unix::pipe;
use tracing::debug;

/// Conservative POSIX minimum for atomic pipe writes.
pub const PIPE_BUF: usize = 512;

/// Creates the fifo if it does not exist yet. An existing fifo is left
/// untouched so restarts keep open reader/writer ends valid.
pub fn ensure_fifo(path: &Path) -> io::Result<()> {
    if path.exists() {
        return Ok(());
    }
    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "NUL in fifo path"))?;
    // rw for owner and group, like the rest of the work directory.
    let rc = unsafe { libc::mkfifo(cpath.as_ptr(), 0o660) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EEXIST) {
            return Ok(());
        }
        return Err(err);
    }
    debug!(path = %path.display(), "created fifo");
    Ok(())
}

/// Opens the reading end without blocking on a writer showing up.
pub fn open_reader(path: &Path) -> io::Result<pipe::Receiver> {
    pipe::OpenOptions::new().open_receiver(path)
}

/// Opens the writing end. Fails with ENXIO when no reader holds the
/// other end; callers that probe a possibly-dead peer handle that.
pub fn open_writer(path: &Path) -> io::Result<pipe::Sender> {
    pipe::OpenOptions::new().open_sender(path)
}

/// Writes `payload` in chunks small enough that every chunk is a
/// single atomic pipe write.
pub async fn write_chunked(tx: &mut pipe::Sender, payload: &[u8]) -> io::Result<()> {
    for chunk in payload.chunks(PIPE_BUF - 1) {
        tx.write_all(chunk).await?;
    }
    Ok(())
}
