//! The small AFD status area.
//!
//! Records which core components are up (the "ON" flags external tools
//! check before editing queue files directly), the supervisor start time
//! and the current FSA/FRA generation ids.

use bytes::BufMut;

use super::area::AreaRecord;
use super::codec::{get_i64, get_u32, get_u64, get_u8};
use super::AreaError;

/// Component state values stored in the flag bytes.
pub const OFF: u8 = 0;
pub const ON: u8 = 1;
/// Component is being restarted by the supervisor.
pub const RESTARTING: u8 = 2;

/// Single-record status area describing the whole AFD instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AfdStatus {
    pub amg: u8,
    pub fd: u8,
    pub archive_watch: u8,
    pub sys_log: u8,
    pub start_time: i64,
    pub fsa_id: u32,
    pub fra_id: u32,
    pub jobs_in_queue: u32,
    pub files_send: u64,
    pub bytes_send: u64,
}

impl AfdStatus {
    /// True when the dispatcher owns the queue files; external operators
    /// must then go through the FD delete-fifo instead of editing them.
    pub fn fd_running(&self) -> bool {
        self.fd == ON
    }
}

impl AreaRecord for AfdStatus {
    const STRUCT_VERSION: u8 = 1;
    const RECORD_SIZE: usize = 64;

    fn encode_record(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.amg);
        buf.put_u8(self.fd);
        buf.put_u8(self.archive_watch);
        buf.put_u8(self.sys_log);
        buf.put_i64_le(self.start_time);
        buf.put_u32_le(self.fsa_id);
        buf.put_u32_le(self.fra_id);
        buf.put_u32_le(self.jobs_in_queue);
        buf.put_u64_le(self.files_send);
        buf.put_u64_le(self.bytes_send);
    }

    fn decode_record(mut buf: &[u8]) -> Result<Self, AreaError> {
        let buf = &mut buf;
        Ok(Self {
            amg: get_u8(buf)?,
            fd: get_u8(buf)?,
            archive_watch: get_u8(buf)?,
            sys_log: get_u8(buf)?,
            start_time: get_i64(buf)?,
            fsa_id: get_u32(buf)?,
            fra_id: get_u32(buf)?,
            jobs_in_queue: get_u32(buf)?,
            files_send: get_u64(buf)?,
            bytes_send: get_u64(buf)?,
        })
    }

    fn record_alias(&self) -> &str {
        "afd"
    }
}
