//! Operator control surface over named pipes.
//!
//! External tooling drives a running instance by writing opcode bytes
//! into the command fifos; the supervisor and dispatcher each read
//! their own fifo. [`opcode`] defines the wire forms, [`parser`]
//! reassembles commands from arbitrary read boundaries, and [`fifo`]
//! owns creation and atomic-write chunking.

pub mod fifo;
pub mod opcode;
pub mod parser;

use std::io;
use std::path::Path;

use thiserror::Error;

pub use fifo::{ensure_fifo, open_reader, open_writer, write_chunked, PIPE_BUF};
pub use opcode::{Command, ACKN, ACKN_STOPPED};
pub use parser::{CommandParser, ParseError};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("no process is reading {0}; is the daemon running?")]
    NoReader(String),
    #[error("malformed control stream: {0}")]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Sends one command to the fifo at `path`; the usual entry point for
/// the command-line tools.
pub async fn send_command(path: &Path, cmd: &Command) -> Result<(), ControlError> {
    let mut tx = fifo::open_writer(path).map_err(|err| {
        if err.raw_os_error() == Some(libc::ENXIO) {
            ControlError::NoReader(path.display().to_string())
        } else {
            ControlError::Io(err)
        }
    })?;
    fifo::write_chunked(&mut tx, &cmd.encode()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn send_command_reaches_a_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmd.fifo");
        fifo::ensure_fifo(&path).unwrap();
        let mut rx = fifo::open_reader(&path).unwrap();

        send_command(&path, &Command::DeleteMessage("1a_2b_0".into()))
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let n = rx.read(&mut buf).await.unwrap();
        let mut parser = CommandParser::new();
        parser.feed(&buf[..n]);
        assert_eq!(
            parser.next_command().unwrap(),
            Some(Command::DeleteMessage("1a_2b_0".into()))
        );
    }

    #[tokio::test]
    async fn send_without_reader_names_the_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmd.fifo");
        fifo::ensure_fifo(&path).unwrap();
        match send_command(&path, &Command::IsAlive).await {
            Err(ControlError::NoReader(p)) => assert!(p.contains("cmd.fifo")),
            other => panic!("expected NoReader, got {other:?}"),
        }
    }
}
