//! Incremental parser for the command fifos.
//!
//! Fifo reads are not aligned to command boundaries: a read may end in
//! the middle of a payload and the remainder arrives with the next
//! read. The parser buffers unconsumed bytes across [`feed`] calls and
//! yields complete commands one at a time, so a partial read is resumed
//! rather than misinterpreted.
//!
//! [`feed`]: CommandParser::feed

use thiserror::Error;

use super::opcode::*;
use crate::queue::MAX_MSG_NAME_LENGTH;

/// Longest accepted NUL-terminated payload.
const MAX_NAME_PAYLOAD: usize = MAX_MSG_NAME_LENGTH + 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    #[error("name payload exceeds {MAX_NAME_PAYLOAD} bytes without terminator")]
    NameTooLong,
    #[error("name payload is not valid UTF-8")]
    BadUtf8,
}

/// Buffering command parser; one instance per fifo reader.
#[derive(Debug, Default)]
pub struct CommandParser {
    buf: Vec<u8>,
}

impl CommandParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly read bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered, not yet consumed bytes.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pops the next complete command, or `None` when more bytes are
    /// needed. After an error the buffer is cleared so one corrupt
    /// writer cannot wedge the fifo forever.
    pub fn next_command(&mut self) -> Result<Option<Command>, ParseError> {
        let Some(&op) = self.buf.first() else {
            return Ok(None);
        };
        let parsed = match op {
            SHUTDOWN => Some((1, Command::Shutdown)),
            SHUTDOWN_ALL => Some((1, Command::ShutdownAll)),
            START => Some((1, Command::Start)),
            IS_ALIVE => Some((1, Command::IsAlive)),
            FORCE_REMOTE_DIR_CHECK => Some((1, Command::ForceRemoteDirCheck)),
            RETRY => Some((1, Command::Retry)),
            STOP => Some((1, Command::Stop)),
            GOT_LC | DISABLE_MON | ENABLE_MON => {
                if self.buf.len() < 5 {
                    None
                } else {
                    let idx = u32::from_le_bytes([
                        self.buf[1],
                        self.buf[2],
                        self.buf[3],
                        self.buf[4],
                    ]);
                    let cmd = match op {
                        GOT_LC => Command::GotLogCapabilities(idx),
                        DISABLE_MON => Command::DisableMon(idx),
                        _ => Command::EnableMon(idx),
                    };
                    Some((5, cmd))
                }
            }
            DELETE_MESSAGE | DELETE_RETRIEVES_FROM_DIR => {
                match self.buf[1..].iter().position(|&b| b == 0) {
                    Some(nul) => {
                        let name = match std::str::from_utf8(&self.buf[1..1 + nul]) {
                            Ok(s) => s.to_string(),
                            Err(_) => return Err(self.fail(ParseError::BadUtf8)),
                        };
                        let cmd = if op == DELETE_MESSAGE {
                            Command::DeleteMessage(name)
                        } else {
                            Command::DeleteRetrievesFromDir(name)
                        };
                        Some((nul + 2, cmd))
                    }
                    None if self.buf.len() > MAX_NAME_PAYLOAD => {
                        return Err(self.fail(ParseError::NameTooLong));
                    }
                    None => None,
                }
            }
            other => return Err(self.fail(ParseError::UnknownOpcode(other))),
        };

        match parsed {
            Some((consumed, cmd)) => {
                self.buf.drain(..consumed);
                Ok(Some(cmd))
            }
            None => Ok(None),
        }
    }

    fn fail(&mut self, err: ParseError) -> ParseError {
        self.buf.clear();
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_byte_commands() {
        let mut p = CommandParser::new();
        p.feed(&[SHUTDOWN, RETRY]);
        assert_eq!(p.next_command().unwrap(), Some(Command::Shutdown));
        assert_eq!(p.next_command().unwrap(), Some(Command::Retry));
        assert_eq!(p.next_command().unwrap(), None);
    }

    #[test]
    fn payload_split_across_reads_is_resumed() {
        let mut p = CommandParser::new();
        let full = Command::DeleteMessage("6552a1b0_3f_2".into()).encode();
        // First read stops inside the name.
        p.feed(&full[..5]);
        assert_eq!(p.next_command().unwrap(), None);
        assert_eq!(p.pending(), 5);
        p.feed(&full[5..]);
        assert_eq!(
            p.next_command().unwrap(),
            Some(Command::DeleteMessage("6552a1b0_3f_2".into()))
        );
    }

    #[test]
    fn index_split_across_reads() {
        let mut p = CommandParser::new();
        let full = Command::EnableMon(300).encode();
        p.feed(&full[..2]);
        assert_eq!(p.next_command().unwrap(), None);
        p.feed(&full[2..]);
        assert_eq!(p.next_command().unwrap(), Some(Command::EnableMon(300)));
    }

    #[test]
    fn back_to_back_mixed_commands() {
        let mut p = CommandParser::new();
        let mut bytes = Command::IsAlive.encode();
        bytes.extend(Command::DeleteRetrievesFromDir("obs-in".into()).encode());
        bytes.extend(Command::DisableMon(2).encode());
        p.feed(&bytes);
        assert_eq!(p.next_command().unwrap(), Some(Command::IsAlive));
        assert_eq!(
            p.next_command().unwrap(),
            Some(Command::DeleteRetrievesFromDir("obs-in".into()))
        );
        assert_eq!(p.next_command().unwrap(), Some(Command::DisableMon(2)));
        assert_eq!(p.next_command().unwrap(), None);
    }

    #[test]
    fn unknown_opcode_clears_buffer() {
        let mut p = CommandParser::new();
        p.feed(&[0xEE, SHUTDOWN]);
        assert_eq!(p.next_command(), Err(ParseError::UnknownOpcode(0xEE)));
        assert_eq!(p.pending(), 0);
    }

    #[test]
    fn non_utf8_name_clears_buffer() {
        let mut p = CommandParser::new();
        p.feed(&[DELETE_MESSAGE, 0xFF, 0xFE, 0, SHUTDOWN]);
        assert_eq!(p.next_command(), Err(ParseError::BadUtf8));
        assert_eq!(p.pending(), 0);
    }

    #[test]
    fn unterminated_overlong_name_is_rejected() {
        let mut p = CommandParser::new();
        let mut bytes = vec![DELETE_MESSAGE];
        bytes.extend(std::iter::repeat(b'a').take(MAX_NAME_PAYLOAD + 1));
        p.feed(&bytes);
        assert_eq!(p.next_command(), Err(ParseError::NameTooLong));
    }
}
