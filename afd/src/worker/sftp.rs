//! SFTP transport over ssh2.

use std::fs::File;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ssh2::{ErrorCode, Session};
use tracing::debug;

use crate::status::fsa::HostRecord;

use super::session::{ProtocolSession, RemoteEntry, SessionError};

pub struct SftpSession {
    session: Option<Session>,
    sftp: Option<ssh2::Sftp>,
    host: String,
}

fn map_err(err: ssh2::Error) -> SessionError {
    match err.code() {
        // libssh2 SFTP status codes: 2 no such file, 3 permission
        // denied.
        ErrorCode::SFTP(2) | ErrorCode::SFTP(3) => SessionError::Permanent(err.to_string()),
        // LIBSSH2_ERROR_TIMEOUT
        ErrorCode::Session(-9) => SessionError::Timeout(err.to_string()),
        _ => SessionError::Protocol(err.to_string()),
    }
}

impl SftpSession {
    /// Connects, authenticates and opens the SFTP channel. Key-file
    /// auth is preferred when a key path is given; password otherwise.
    pub fn connect(
        host: &HostRecord,
        user: &str,
        password: Option<&str>,
        key_path: Option<&Path>,
    ) -> Result<Self, SessionError> {
        let addr = format!("{}:22", host.current_hostname());
        let tcp = TcpStream::connect(&addr)
            .map_err(|e| SessionError::Connect(format!("{addr}: {e}")))?;
        if host.transfer_timeout > 0 {
            let timeout = Duration::from_secs(host.transfer_timeout as u64);
            tcp.set_read_timeout(Some(timeout))?;
            tcp.set_write_timeout(Some(timeout))?;
        }
        let mut session =
            Session::new().map_err(|e| SessionError::Connect(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        if let Some(key) = key_path {
            session
                .userauth_pubkey_file(user, None, key, password)
                .map_err(|e| SessionError::Auth(e.to_string()))?;
        } else if let Some(pw) = password {
            session
                .userauth_password(user, pw)
                .map_err(|e| SessionError::Auth(e.to_string()))?;
        } else {
            return Err(SessionError::Auth("no credentials configured".into()));
        }
        if !session.authenticated() {
            return Err(SessionError::Auth("server rejected credentials".into()));
        }
        let sftp = session.sftp().map_err(map_err)?;
        debug!(host = %host.alias, addr, "sftp session established");
        Ok(Self {
            session: Some(session),
            sftp: Some(sftp),
            host: host.alias.clone(),
        })
    }

    fn sftp(&self) -> Result<&ssh2::Sftp, SessionError> {
        self.sftp
            .as_ref()
            .ok_or_else(|| SessionError::Connect("session closed".into()))
    }
}

impl ProtocolSession for SftpSession {
    fn scheme(&self) -> &'static str {
        "sftp"
    }

    fn is_alive(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.authenticated())
            .unwrap_or(false)
    }

    fn list(&mut self, remote_dir: &str) -> Result<Vec<RemoteEntry>, SessionError> {
        let listing = self
            .sftp()?
            .readdir(Path::new(remote_dir))
            .map_err(map_err)?;
        let mut entries = Vec::with_capacity(listing.len());
        for (path, stat) in listing {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name == "." || name == ".." || stat.is_dir() {
                continue;
            }
            entries.push(RemoteEntry {
                name: name.to_string(),
                size: stat.size.unwrap_or(0),
                mtime: stat.mtime.map(|m| m as i64),
            });
        }
        Ok(entries)
    }

    fn store(&mut self, local: &Path, remote_name: &str) -> Result<u64, SessionError> {
        let mut src = File::open(local)?;
        let mut dst = self
            .sftp()?
            .create(Path::new(remote_name))
            .map_err(map_err)?;
        let sent = std::io::copy(&mut src, &mut dst)?;
        Ok(sent)
    }

    fn retrieve(&mut self, remote_name: &str, local: &Path) -> Result<u64, SessionError> {
        let mut src = self
            .sftp()?
            .open(Path::new(remote_name))
            .map_err(map_err)?;
        let mut dst = File::create(local)?;
        let mut buf = vec![0u8; 32 * 1024];
        let mut received = 0u64;
        loop {
            let n = src.read(&mut buf)?;
            if n == 0 {
                break;
            }
            dst.write_all(&buf[..n])?;
            received += n as u64;
        }
        Ok(received)
    }

    fn remove_remote(&mut self, remote_name: &str) -> Result<(), SessionError> {
        self.sftp()?
            .unlink(Path::new(remote_name))
            .map_err(map_err)
    }

    fn rename_remote(&mut self, from: &str, to: &str) -> Result<(), SessionError> {
        self.sftp()?
            .rename(Path::new(from), Path::new(to), None)
            .map_err(map_err)
    }

    fn quit(&mut self) -> Result<(), SessionError> {
        self.sftp = None;
        if let Some(session) = self.session.take() {
            session
                .disconnect(None, "done", None)
                .map_err(|e| SessionError::Protocol(e.to_string()))?;
        }
        debug!(host = %self.host, "sftp session closed");
        Ok(())
    }
}

/// Builds the remote path for a file name inside a remote directory.
pub fn remote_path(dir: &str, name: &str) -> PathBuf {
    if dir.is_empty() {
        PathBuf::from(name)
    } else {
        Path::new(dir).join(name)
    }
}
