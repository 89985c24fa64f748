//! Protocol session abstraction shared by send and retrieve workers.
//!
//! One implementation per transport (FTP, SFTP, local copy). Sessions
//! are blocking; workers own one exclusively and never share it across
//! threads. Errors classify themselves into the transfer-result
//! categories the host state machine books.

use std::io;
use std::path::Path;

use thiserror::Error;

use crate::state::TransferResult;

/// Directory entry as reported by a remote listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
    /// Unix mtime when the listing provides one.
    pub mtime: Option<i64>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("transfer timed out: {0}")]
    Timeout(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("remote refused: {0}")]
    Permanent(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SessionError {
    /// The error-history class booked against the host.
    pub fn result_class(&self) -> TransferResult {
        match self {
            SessionError::Connect(_) => TransferResult::ConnectError,
            SessionError::Auth(_) => TransferResult::AuthError,
            SessionError::Timeout(_) => TransferResult::Timeout,
            SessionError::Protocol(_) => TransferResult::ProtocolError,
            SessionError::Permanent(_) => TransferResult::Permanent,
            SessionError::Io(err) if err.kind() == io::ErrorKind::TimedOut => {
                TransferResult::Timeout
            }
            SessionError::Io(_) => TransferResult::PartialTransfer,
        }
    }

    /// Permanent errors drop the job instead of feeding the retry
    /// machinery.
    pub fn is_permanent(&self) -> bool {
        matches!(self, SessionError::Permanent(_))
    }
}

/// A live protocol connection to one host.
pub trait ProtocolSession: Send {
    /// Transport tag for log lines ("ftp", "sftp", "loc").
    fn scheme(&self) -> &'static str;

    /// Healthy enough to run another job in the same connection.
    fn is_alive(&self) -> bool;

    fn list(&mut self, remote_dir: &str) -> Result<Vec<RemoteEntry>, SessionError>;

    /// Uploads one local file; returns bytes sent.
    fn store(&mut self, local: &Path, remote_name: &str) -> Result<u64, SessionError>;

    /// Downloads one remote file; returns bytes received.
    fn retrieve(&mut self, remote_name: &str, local: &Path) -> Result<u64, SessionError>;

    fn remove_remote(&mut self, remote_name: &str) -> Result<(), SessionError>;

    /// Renames on the remote side, used for the two-step "upload under
    /// temp name then rename" convention.
    fn rename_remote(&mut self, from: &str, to: &str) -> Result<(), SessionError>;

    /// Orderly goodbye; dropping without calling this just closes the
    /// socket.
    fn quit(&mut self) -> Result<(), SessionError>;
}
