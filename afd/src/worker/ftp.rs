//! FTP transport over suppaftp.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode, Status};
use tracing::debug;

use crate::status::fsa::{HostRecord, ProtocolOptions};

use super::session::{ProtocolSession, RemoteEntry, SessionError};

pub struct FtpSession {
    stream: Option<FtpStream>,
    host: String,
}

fn resp_text(resp: &suppaftp::types::Response) -> String {
    format!(
        "{:?} {}",
        resp.status,
        String::from_utf8_lossy(&resp.body).trim()
    )
}

fn map_err(err: FtpError) -> SessionError {
    match err {
        FtpError::ConnectionError(io) if io.kind() == std::io::ErrorKind::TimedOut => {
            SessionError::Timeout(io.to_string())
        }
        FtpError::ConnectionError(io) => SessionError::Connect(io.to_string()),
        FtpError::UnexpectedResponse(resp) => match resp.status {
            Status::InvalidCredentials | Status::NotLoggedIn | Status::StoringNeedAccount => {
                SessionError::Auth(resp_text(&resp))
            }
            Status::FileUnavailable
            | Status::PageTypeUnknown
            | Status::ExceededStorage
            | Status::BadFilename => SessionError::Permanent(resp_text(&resp)),
            Status::NotAvailable | Status::HostUnavailable => {
                SessionError::Connect(resp_text(&resp))
            }
            _ => SessionError::Protocol(resp_text(&resp)),
        },
        FtpError::BadResponse => SessionError::Protocol("unparsable reply".into()),
        FtpError::InvalidAddress(err) => SessionError::Connect(err.to_string()),
        other => SessionError::Protocol(other.to_string()),
    }
}

impl FtpSession {
    /// Connects and logs in using the host record's currently toggled
    /// real hostname.
    pub fn connect(host: &HostRecord, user: &str, password: &str) -> Result<Self, SessionError> {
        let addr = format!("{}:21", host.current_hostname());
        let mut stream = FtpStream::connect(&addr).map_err(map_err)?;
        if host.transfer_timeout > 0 {
            let timeout = Duration::from_secs(host.transfer_timeout as u64);
            stream
                .get_ref()
                .set_read_timeout(Some(timeout))
                .map_err(SessionError::Io)?;
            stream
                .get_ref()
                .set_write_timeout(Some(timeout))
                .map_err(SessionError::Io)?;
        }
        stream.login(user, password).map_err(map_err)?;
        stream
            .transfer_type(FileType::Binary)
            .map_err(map_err)?;
        if host
            .protocol_options
            .contains(ProtocolOptions::FTP_PASSIVE)
        {
            stream.set_mode(Mode::Passive);
        } else {
            stream = stream.active_mode(Duration::from_secs(60));
            stream.set_mode(Mode::Active);
        }
        debug!(host = %host.alias, addr, "ftp session established");
        Ok(Self {
            stream: Some(stream),
            host: host.alias.clone(),
        })
    }

    fn stream(&mut self) -> Result<&mut FtpStream, SessionError> {
        self.stream
            .as_mut()
            .ok_or_else(|| SessionError::Connect("session closed".into()))
    }
}

impl ProtocolSession for FtpSession {
    fn scheme(&self) -> &'static str {
        "ftp"
    }

    fn is_alive(&self) -> bool {
        self.stream.is_some()
    }

    fn list(&mut self, remote_dir: &str) -> Result<Vec<RemoteEntry>, SessionError> {
        let stream = self.stream()?;
        let names = stream.nlst(Some(remote_dir)).map_err(map_err)?;
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            if name == "." || name == ".." {
                continue;
            }
            let size = stream.size(&name).map(|s| s as u64).unwrap_or(0);
            entries.push(RemoteEntry {
                name,
                size,
                mtime: None,
            });
        }
        Ok(entries)
    }

    fn store(&mut self, local: &Path, remote_name: &str) -> Result<u64, SessionError> {
        let mut file = File::open(local)?;
        let stream = self.stream()?;
        let sent = stream
            .put_file(remote_name, &mut file)
            .map_err(map_err)?;
        Ok(sent)
    }

    fn retrieve(&mut self, remote_name: &str, local: &Path) -> Result<u64, SessionError> {
        let stream = self.stream()?;
        stream.retr(remote_name, |reader| {
            let mut file = File::create(local).map_err(FtpError::ConnectionError)?;
            std::io::copy(reader, &mut file).map_err(FtpError::ConnectionError)
        })
        .map_err(map_err)
    }

    fn remove_remote(&mut self, remote_name: &str) -> Result<(), SessionError> {
        self.stream()?.rm(remote_name).map_err(map_err)
    }

    fn rename_remote(&mut self, from: &str, to: &str) -> Result<(), SessionError> {
        self.stream()?.rename(from, to).map_err(map_err)
    }

    fn quit(&mut self) -> Result<(), SessionError> {
        if let Some(mut stream) = self.stream.take() {
            stream.quit().map_err(map_err)?;
        }
        debug!(host = %self.host, "ftp session closed");
        Ok(())
    }
}
