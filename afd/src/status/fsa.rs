//! File-transfer Status Area records.
//!
//! One [`HostRecord`] per configured destination host. The record carries
//! the host addressing (two real hostnames plus a toggle), the protocol
//! and option bitmasks, all retry/error accounting, the aggregate
//! transfer counters and one [`JobSlot`] per allowed parallel transfer.
//!
//! A host whose primary hostname begins with [`GROUP_IDENTIFIER`] is a
//! virtual group: its status bits and counters are aggregated from the
//! member hosts and it never runs transfers itself.

use bitflags::bitflags;
use bytes::BufMut;
use tracing::warn;

use super::codec::{get_i64, get_str, get_u16, get_u32, get_u64, get_u8};
use super::AreaError;

/// Maximum length of a host alias.
pub const MAX_HOSTNAME: usize = 16;
/// Maximum length of a real hostname.
pub const MAX_REAL_HOSTNAME: usize = 64;
/// Maximum length of the toggle character string.
pub const MAX_TOGGLE: usize = 8;
/// Maximum length of a proxy specification.
pub const MAX_PROXY: usize = 128;
/// Maximum length of a file name stored in a job slot.
pub const MAX_FILENAME: usize = 256;
/// Maximum length of the per-slot unique (message) name scratch field.
pub const MAX_MSG_NAME: usize = 80;
/// Length of the recent-error ring per host.
pub const ERROR_HISTORY_LENGTH: usize = 5;
/// Hard upper bound on parallel transfers per host.
pub const MAX_NO_PARALLEL_JOBS: usize = 15;

/// First character of a primary hostname that marks a virtual group.
pub const GROUP_IDENTIFIER: char = '+';

bitflags! {
    /// Protocols a host speaks. The set is closed; extending it means
    /// editing this type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ProtocolSet: u32 {
        const FTP      = 1 << 0;
        const SFTP     = 1 << 1;
        const LOC      = 1 << 2;
        const HTTP     = 1 << 3;
        const SMTP     = 1 << 4;
        const EXEC     = 1 << 5;
        const WMO      = 1 << 6;
        const SCP      = 1 << 7;
        const MAP      = 1 << 8;
        const DFAX     = 1 << 9;
        const SEND     = 1 << 10;
        const RETRIEVE = 1 << 11;
        const SSL      = 1 << 12;
    }
}

bitflags! {
    /// Per-host protocol options. Closed set, same rule as [`ProtocolSet`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ProtocolOptions: u32 {
        const FTP_PASSIVE            = 1 << 0;
        const FTP_EXTENDED           = 1 << 1;
        const TLS_STRICT_VERIFY      = 1 << 2;
        const TCP_KEEPALIVE          = 1 << 3;
        const STAT_KEEPALIVE         = 1 << 4;
        const FAST_CD                = 1 << 5;
        const FAST_MOVE              = 1 << 6;
        const CHECK_SIZE             = 1 << 7;
        const USE_LIST               = 1 << 8;
        const USE_STAT_LIST          = 1 << 9;
        const COMPRESSION            = 1 << 10;
        const STRICT_HOST_KEY        = 1 << 11;
        const TIMEOUT_TRANSFER       = 1 << 12;
        const SEQUENCE_LOCKING       = 1 << 13;
        const AGEING_DISABLE         = 1 << 14;
        const NO_BURST               = 1 << 15;
        const USE_CCC                = 1 << 16;
        const KEEP_CONNECTED_DISCONNECT = 1 << 17;
        const SORT_FILE_NAMES        = 1 << 18;
        const KEEP_TIMESTAMP         = 1 << 19;
    }
}

bitflags! {
    /// Operator- and dispatcher-driven host status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HostStatus: u32 {
        const PAUSE_QUEUE               = 1 << 0;
        const AUTO_PAUSE_QUEUE          = 1 << 1;
        const ERROR_QUEUE_SET           = 1 << 2;
        const STOP_TRANSFER             = 1 << 3;
        const HOST_CONFIG_HOST_DISABLED = 1 << 4;
        const DANGER_PAUSE_QUEUE        = 1 << 5;
        const HOST_ERROR_ACKNOWLEDGED   = 1 << 6;
        const HOST_ERROR_ACKNOWLEDGED_T = 1 << 7;
        const HOST_ERROR_OFFLINE        = 1 << 8;
        const HOST_ERROR_OFFLINE_T      = 1 << 9;
        const HOST_ERROR_OFFLINE_STATIC = 1 << 10;
        const DO_NOT_DELETE_DATA        = 1 << 11;
        const HOST_ACTION_SUCCESS       = 1 << 12;
        const STORE_IP                  = 1 << 13;
        const SIMULATE_SEND_MODE        = 1 << 14;
        const ERROR_HOSTS_IN_GROUP      = 1 << 15;
        const WARN_HOSTS_IN_GROUP       = 1 << 16;
        const HOST_WARN_TIME_REACHED    = 1 << 17;
    }
}

impl HostStatus {
    /// Bits that suppress the NOT_WORKING / WARNING projections.
    pub fn error_override(self) -> bool {
        self.intersects(
            HostStatus::HOST_ERROR_ACKNOWLEDGED
                | HostStatus::HOST_ERROR_ACKNOWLEDGED_T
                | HostStatus::HOST_ERROR_OFFLINE
                | HostStatus::HOST_ERROR_OFFLINE_T
                | HostStatus::HOST_ERROR_OFFLINE_STATIC,
        )
    }
}

bitflags! {
    /// Miscellaneous per-host flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SpecialFlags: u8 {
        const KEEP_CON_NO_FETCH  = 1 << 0;
        const KEEP_CON_NO_SEND   = 1 << 1;
        const HOST_DISABLED      = 1 << 2;
        const HOST_IN_DIR_CONFIG = 1 << 3;
    }
}

bitflags! {
    /// Duplicate-check feature flags. Dup-check as a whole is disabled
    /// iff `dup_check_timeout == 0`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DupCheckFlags: u32 {
        const FILENAME_ONLY    = 1 << 0;
        const NAME_AND_SIZE    = 1 << 1;
        const CONTENT          = 1 << 2;
        const DELETE           = 1 << 3;
        const STORE            = 1 << 4;
        const WARN             = 1 << 5;
        const CRC32            = 1 << 6;
        const CRC32C           = 1 << 7;
        const TIMEOUT_IS_FIXED = 1 << 8;
        const USE_RECIPIENT_ID = 1 << 9;
    }
}

/// What a worker slot is currently doing. Mirrors the slot's activity
/// across every blocking phase of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectStatus {
    #[default]
    NotWorking = 0,
    Connecting = 1,
    TransferActive = 2,
    Retrieving = 3,
    ExecActive = 4,
    ClosingConnection = 5,
}

impl ConnectStatus {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::TransferActive,
            3 => Self::Retrieving,
            4 => Self::ExecActive,
            5 => Self::ClosingConnection,
            _ => Self::NotWorking,
        }
    }
}

/// Host debug verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DebugMode {
    #[default]
    Normal = 0,
    Debug = 1,
    Trace = 2,
    FullTrace = 3,
}

impl DebugMode {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Debug,
            2 => Self::Trace,
            3 => Self::FullTrace,
            _ => Self::Normal,
        }
    }
}

/// Projection of a host record onto the operator-visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Normal,
    TransferActive,
    Warning,
    NotWorking,
}

/// One parallel-transfer slot inside a host record.
///
/// `proc_id == 0` means the slot is free. Slot count is fixed when the
/// record is created; resizing requires rebuilding the record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobSlot {
    pub proc_id: u32,
    pub connect_status: ConnectStatus,
    pub special_flag: u8,
    pub job_id: u32,
    pub no_of_files: u32,
    pub no_of_files_done: u32,
    pub file_size: u64,
    pub file_size_done: u64,
    pub bytes_send: u64,
    pub file_name_in_use: String,
    pub file_size_in_use: u64,
    pub file_size_in_use_done: u64,
    /// Message-name scratch used for burst handoff.
    pub unique_name: String,
}

impl JobSlot {
    /// Resets the slot to its free state.
    pub fn reset(&mut self) {
        *self = JobSlot::default();
    }

    pub fn is_free(&self) -> bool {
        self.proc_id == 0
    }
}

/// One FSA entry.
#[derive(Debug, Clone, PartialEq)]
pub struct HostRecord {
    pub alias: String,
    pub host_id: u32,
    pub display_name: String,
    pub real_hostname: [String; 2],
    pub toggle_str: String,
    pub toggle_pos: u8,
    pub original_toggle_pos: u8,
    pub auto_toggle: bool,
    pub proxy_name: String,

    pub protocols: ProtocolSet,
    pub protocol_options: ProtocolOptions,
    pub host_status: HostStatus,
    pub special_flag: SpecialFlags,
    pub dup_check_timeout: i64,
    pub dup_check_flag: DupCheckFlags,
    pub debug_mode: DebugMode,

    pub allowed_transfers: u8,
    pub max_errors: u32,
    pub error_counter: u32,
    pub total_errors: u64,
    pub successful_retries: u32,
    pub max_successful_retries: u32,
    pub retry_interval: u32,
    pub transfer_timeout: u32,
    pub socket_send_buffer: u32,
    pub socket_recv_buffer: u32,
    pub transfer_block_size: u32,
    pub file_size_offset: i16,
    pub ttl: u32,
    pub transfer_rate_limit: u64,
    pub keep_connected: u32,
    pub warn_time: u64,
    pub start_event_time: i64,
    pub end_event_time: i64,

    pub first_error_time: i64,
    pub last_retry_time: i64,
    pub last_connection: i64,

    pub total_file_counter: u32,
    pub total_file_size: u64,
    pub file_counter_done: u64,
    pub bytes_send: u64,
    pub connections: u64,
    pub jobs_queued: u32,
    pub active_transfers: u8,

    pub error_history: [u8; ERROR_HISTORY_LENGTH],
    pub job_status: Vec<JobSlot>,
}

impl HostRecord {
    /// Creates a fresh record with zeroed counters and `allowed_transfers`
    /// job slots.
    pub fn new(alias: &str, allowed_transfers: u8) -> Self {
        let allowed = (allowed_transfers as usize).clamp(1, MAX_NO_PARALLEL_JOBS) as u8;
        Self {
            alias: alias.to_string(),
            host_id: crc32fast::hash(alias.as_bytes()),
            display_name: alias.to_string(),
            real_hostname: [alias.to_string(), String::new()],
            toggle_str: String::new(),
            toggle_pos: 0,
            original_toggle_pos: 0,
            auto_toggle: false,
            proxy_name: String::new(),
            protocols: ProtocolSet::default(),
            protocol_options: ProtocolOptions::default(),
            host_status: HostStatus::default(),
            special_flag: SpecialFlags::HOST_IN_DIR_CONFIG,
            dup_check_timeout: 0,
            dup_check_flag: DupCheckFlags::default(),
            debug_mode: DebugMode::Normal,
            allowed_transfers: allowed,
            max_errors: 10,
            error_counter: 0,
            total_errors: 0,
            successful_retries: 0,
            max_successful_retries: 0,
            retry_interval: 120,
            transfer_timeout: 120,
            socket_send_buffer: 0,
            socket_recv_buffer: 0,
            transfer_block_size: 4096,
            file_size_offset: -1,
            ttl: 0,
            transfer_rate_limit: 0,
            keep_connected: 0,
            warn_time: 0,
            start_event_time: 0,
            end_event_time: 0,
            first_error_time: 0,
            last_retry_time: 0,
            last_connection: 0,
            total_file_counter: 0,
            total_file_size: 0,
            file_counter_done: 0,
            bytes_send: 0,
            connections: 0,
            jobs_queued: 0,
            active_transfers: 0,
            error_history: [0; ERROR_HISTORY_LENGTH],
            job_status: vec![JobSlot::default(); allowed as usize],
        }
    }

    /// True when this record is a virtual group rather than a leaf host.
    pub fn is_group(&self) -> bool {
        self.real_hostname[0].starts_with(GROUP_IDENTIFIER)
    }

    /// The real hostname currently selected by the toggle.
    pub fn current_hostname(&self) -> &str {
        let pos = (self.toggle_pos as usize).min(1);
        if pos == 1 && !self.real_hostname[1].is_empty() {
            &self.real_hostname[1]
        } else {
            &self.real_hostname[0]
        }
    }

    /// Flips the toggle to the alternate real hostname, if one exists.
    pub fn toggle_host(&mut self) {
        if !self.real_hostname[1].is_empty() {
            self.toggle_pos ^= 1;
        }
    }

    /// Whether dup-check is active for this host.
    pub fn dup_check_enabled(&self) -> bool {
        self.dup_check_timeout > 0
    }

    /// Derived operator-visible state.
    pub fn projected_state(&self) -> HostState {
        if self.error_counter >= self.max_errors && !self.host_status.error_override() {
            return HostState::NotWorking;
        }
        if self.host_status.contains(HostStatus::HOST_WARN_TIME_REACHED)
            && !self.host_status.error_override()
        {
            return HostState::Warning;
        }
        if self.active_transfers > 0 {
            HostState::TransferActive
        } else {
            HostState::Normal
        }
    }

    /// Whether the dispatcher may schedule new jobs for this host.
    pub fn accepts_transfers(&self) -> bool {
        !self.host_status.intersects(
            HostStatus::PAUSE_QUEUE
                | HostStatus::AUTO_PAUSE_QUEUE
                | HostStatus::DANGER_PAUSE_QUEUE
                | HostStatus::STOP_TRANSFER
                | HostStatus::HOST_CONFIG_HOST_DISABLED,
        ) && !self.special_flag.contains(SpecialFlags::HOST_DISABLED)
            && !self.is_group()
    }

    /// Lowest free job slot index, or `None` when saturated.
    pub fn free_slot(&self) -> Option<usize> {
        self.job_status.iter().position(JobSlot::is_free)
    }

    /// Pushes an error code into the history ring (newest first).
    pub fn push_error_history(&mut self, code: u8) {
        self.error_history.rotate_right(1);
        self.error_history[0] = code;
    }

    /// Removes `files`/`bytes` from the outstanding totals. An underflow
    /// resets the counter to zero and emits a warning instead of wrapping.
    pub fn sub_outstanding(&mut self, files: u32, bytes: u64) {
        if files > self.total_file_counter {
            warn!(
                host = %self.alias,
                files,
                counter = self.total_file_counter,
                "total_file_counter would underflow, resetting to 0"
            );
            self.total_file_counter = 0;
        } else {
            self.total_file_counter -= files;
        }
        if bytes > self.total_file_size {
            warn!(
                host = %self.alias,
                bytes,
                counter = self.total_file_size,
                "total_file_size would underflow, resetting to 0"
            );
            self.total_file_size = 0;
        } else {
            self.total_file_size -= bytes;
        }
    }

    /// Per-worker rate limit derived from the host total.
    pub fn trl_per_process(&self) -> u64 {
        if self.transfer_rate_limit == 0 {
            0
        } else {
            self.transfer_rate_limit / self.allowed_transfers.max(1) as u64
        }
    }

    // -- binary codec ------------------------------------------------------

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        use super::codec::put_str;

        put_str(buf, &self.alias, MAX_HOSTNAME);
        buf.put_u32_le(self.host_id);
        put_str(buf, &self.display_name, MAX_HOSTNAME);
        put_str(buf, &self.real_hostname[0], MAX_REAL_HOSTNAME);
        put_str(buf, &self.real_hostname[1], MAX_REAL_HOSTNAME);
        put_str(buf, &self.toggle_str, MAX_TOGGLE);
        buf.put_u8(self.toggle_pos);
        buf.put_u8(self.original_toggle_pos);
        buf.put_u8(self.auto_toggle as u8);
        put_str(buf, &self.proxy_name, MAX_PROXY);

        buf.put_u32_le(self.protocols.bits());
        buf.put_u32_le(self.protocol_options.bits());
        buf.put_u32_le(self.host_status.bits());
        buf.put_u8(self.special_flag.bits());
        buf.put_i64_le(self.dup_check_timeout);
        buf.put_u32_le(self.dup_check_flag.bits());
        buf.put_u8(self.debug_mode as u8);

        buf.put_u8(self.allowed_transfers);
        buf.put_u32_le(self.max_errors);
        buf.put_u32_le(self.error_counter);
        buf.put_u64_le(self.total_errors);
        buf.put_u32_le(self.successful_retries);
        buf.put_u32_le(self.max_successful_retries);
        buf.put_u32_le(self.retry_interval);
        buf.put_u32_le(self.transfer_timeout);
        buf.put_u32_le(self.socket_send_buffer);
        buf.put_u32_le(self.socket_recv_buffer);
        buf.put_u32_le(self.transfer_block_size);
        buf.put_i16_le(self.file_size_offset);
        buf.put_u32_le(self.ttl);
        buf.put_u64_le(self.transfer_rate_limit);
        buf.put_u32_le(self.keep_connected);
        buf.put_u64_le(self.warn_time);
        buf.put_i64_le(self.start_event_time);
        buf.put_i64_le(self.end_event_time);

        buf.put_i64_le(self.first_error_time);
        buf.put_i64_le(self.last_retry_time);
        buf.put_i64_le(self.last_connection);

        buf.put_u32_le(self.total_file_counter);
        buf.put_u64_le(self.total_file_size);
        buf.put_u64_le(self.file_counter_done);
        buf.put_u64_le(self.bytes_send);
        buf.put_u64_le(self.connections);
        buf.put_u32_le(self.jobs_queued);
        buf.put_u8(self.active_transfers);

        buf.put_slice(&self.error_history);

        buf.put_u8(self.job_status.len() as u8);
        for slot in &self.job_status {
            buf.put_u32_le(slot.proc_id);
            buf.put_u8(slot.connect_status as u8);
            buf.put_u8(slot.special_flag);
            buf.put_u32_le(slot.job_id);
            buf.put_u32_le(slot.no_of_files);
            buf.put_u32_le(slot.no_of_files_done);
            buf.put_u64_le(slot.file_size);
            buf.put_u64_le(slot.file_size_done);
            buf.put_u64_le(slot.bytes_send);
            put_str(buf, &slot.file_name_in_use, MAX_FILENAME);
            buf.put_u64_le(slot.file_size_in_use);
            buf.put_u64_le(slot.file_size_in_use_done);
            put_str(buf, &slot.unique_name, MAX_MSG_NAME);
        }
    }

    pub(crate) fn decode(mut buf: &[u8]) -> Result<Self, AreaError> {
        let buf = &mut buf;

        let alias = get_str(buf, MAX_HOSTNAME)?;
        let host_id = get_u32(buf)?;
        let display_name = get_str(buf, MAX_HOSTNAME)?;
        let real0 = get_str(buf, MAX_REAL_HOSTNAME)?;
        let real1 = get_str(buf, MAX_REAL_HOSTNAME)?;
        let toggle_str = get_str(buf, MAX_TOGGLE)?;
        let toggle_pos = get_u8(buf)?;
        let original_toggle_pos = get_u8(buf)?;
        let auto_toggle = get_u8(buf)? != 0;
        let proxy_name = get_str(buf, MAX_PROXY)?;

        let protocols = ProtocolSet::from_bits_truncate(get_u32(buf)?);
        let protocol_options = ProtocolOptions::from_bits_truncate(get_u32(buf)?);
        let host_status = HostStatus::from_bits_truncate(get_u32(buf)?);
        let special_flag = SpecialFlags::from_bits_truncate(get_u8(buf)?);
        let dup_check_timeout = get_i64(buf)?;
        let dup_check_flag = DupCheckFlags::from_bits_truncate(get_u32(buf)?);
        let debug_mode = DebugMode::from_u8(get_u8(buf)?);

        let allowed_transfers = get_u8(buf)?;
        let max_errors = get_u32(buf)?;
        let error_counter = get_u32(buf)?;
        let total_errors = get_u64(buf)?;
        let successful_retries = get_u32(buf)?;
        let max_successful_retries = get_u32(buf)?;
        let retry_interval = get_u32(buf)?;
        let transfer_timeout = get_u32(buf)?;
        let socket_send_buffer = get_u32(buf)?;
        let socket_recv_buffer = get_u32(buf)?;
        let transfer_block_size = get_u32(buf)?;
        let file_size_offset = get_u16(buf)? as i16;
        let ttl = get_u32(buf)?;
        let transfer_rate_limit = get_u64(buf)?;
        let keep_connected = get_u32(buf)?;
        let warn_time = get_u64(buf)?;
        let start_event_time = get_i64(buf)?;
        let end_event_time = get_i64(buf)?;

        let first_error_time = get_i64(buf)?;
        let last_retry_time = get_i64(buf)?;
        let last_connection = get_i64(buf)?;

        let total_file_counter = get_u32(buf)?;
        let total_file_size = get_u64(buf)?;
        let file_counter_done = get_u64(buf)?;
        let bytes_send = get_u64(buf)?;
        let connections = get_u64(buf)?;
        let jobs_queued = get_u32(buf)?;
        let active_transfers = get_u8(buf)?;

        let mut error_history = [0u8; ERROR_HISTORY_LENGTH];
        for e in error_history.iter_mut() {
            *e = get_u8(buf)?;
        }

        let slot_count = get_u8(buf)? as usize;
        if slot_count > MAX_NO_PARALLEL_JOBS {
            return Err(AreaError::Truncated);
        }
        let mut job_status = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            let proc_id = get_u32(buf)?;
            let connect_status = ConnectStatus::from_u8(get_u8(buf)?);
            let sp = get_u8(buf)?;
            let job_id = get_u32(buf)?;
            let no_of_files = get_u32(buf)?;
            let no_of_files_done = get_u32(buf)?;
            let file_size = get_u64(buf)?;
            let file_size_done = get_u64(buf)?;
            let slot_bytes_send = get_u64(buf)?;
            let file_name_in_use = get_str(buf, MAX_FILENAME)?;
            let file_size_in_use = get_u64(buf)?;
            let file_size_in_use_done = get_u64(buf)?;
            let unique_name = get_str(buf, MAX_MSG_NAME)?;
            job_status.push(JobSlot {
                proc_id,
                connect_status,
                special_flag: sp,
                job_id,
                no_of_files,
                no_of_files_done,
                file_size,
                file_size_done,
                bytes_send: slot_bytes_send,
                file_name_in_use,
                file_size_in_use,
                file_size_in_use_done,
                unique_name,
            });
        }

        Ok(Self {
            alias,
            host_id,
            display_name,
            real_hostname: [real0, real1],
            toggle_str,
            toggle_pos,
            original_toggle_pos,
            auto_toggle,
            proxy_name,
            protocols,
            protocol_options,
            host_status,
            special_flag,
            dup_check_timeout,
            dup_check_flag,
            debug_mode,
            allowed_transfers,
            max_errors,
            error_counter,
            total_errors,
            successful_retries,
            max_successful_retries,
            retry_interval,
            transfer_timeout,
            socket_send_buffer,
            socket_recv_buffer,
            transfer_block_size,
            file_size_offset,
            ttl,
            transfer_rate_limit,
            keep_connected,
            warn_time,
            start_event_time,
            end_event_time,
            first_error_time,
            last_retry_time,
            last_connection,
            total_file_counter,
            total_file_size,
            file_counter_done,
            bytes_send,
            connections,
            jobs_queued,
            active_transfers,
            error_history,
            job_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_host() -> HostRecord {
        let mut h = HostRecord::new("wmo-berlin", 3);
        h.real_hostname = ["ftp1.example.org".into(), "ftp2.example.org".into()];
        h.toggle_str = "{}".into();
        h.protocols = ProtocolSet::FTP | ProtocolSet::SEND;
        h.protocol_options = ProtocolOptions::FTP_PASSIVE | ProtocolOptions::SORT_FILE_NAMES;
        h.max_errors = 3;
        h.warn_time = 3600;
        h
    }

    #[test]
    fn record_codec_round_trip() {
        let mut h = sample_host();
        h.error_counter = 2;
        h.push_error_history(20);
        h.job_status[1].proc_id = 42;
        h.job_status[1].file_name_in_use = "data.grib".into();

        let mut buf = Vec::new();
        h.encode(&mut buf);
        let back = HostRecord::decode(&buf).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn host_id_is_crc32_of_alias() {
        let h = HostRecord::new("abc", 1);
        assert_eq!(h.host_id, crc32fast::hash(b"abc"));
    }

    #[test]
    fn projection_not_working_at_max_errors() {
        let mut h = sample_host();
        h.error_counter = 3;
        assert_eq!(h.projected_state(), HostState::NotWorking);

        h.host_status |= HostStatus::HOST_ERROR_ACKNOWLEDGED;
        assert_ne!(h.projected_state(), HostState::NotWorking);
    }

    #[test]
    fn projection_warning_and_active() {
        let mut h = sample_host();
        h.host_status |= HostStatus::HOST_WARN_TIME_REACHED;
        assert_eq!(h.projected_state(), HostState::Warning);

        h.host_status -= HostStatus::HOST_WARN_TIME_REACHED;
        h.active_transfers = 1;
        assert_eq!(h.projected_state(), HostState::TransferActive);

        h.active_transfers = 0;
        assert_eq!(h.projected_state(), HostState::Normal);
    }

    #[test]
    fn offline_bit_suppresses_warning() {
        let mut h = sample_host();
        h.host_status |= HostStatus::HOST_WARN_TIME_REACHED | HostStatus::HOST_ERROR_OFFLINE;
        assert_eq!(h.projected_state(), HostState::Normal);
    }

    #[test]
    fn underflow_resets_to_zero() {
        let mut h = sample_host();
        h.total_file_counter = 2;
        h.total_file_size = 100;
        h.sub_outstanding(5, 500);
        assert_eq!(h.total_file_counter, 0);
        assert_eq!(h.total_file_size, 0);
    }

    #[test]
    fn group_detection_by_primary_hostname() {
        let mut h = HostRecord::new("all-ftp", 1);
        h.real_hostname[0] = "+group".into();
        assert!(h.is_group());
        assert!(!h.accepts_transfers());
    }

    #[test]
    fn toggle_alternates_hostname() {
        let mut h = sample_host();
        assert_eq!(h.current_hostname(), "ftp1.example.org");
        h.toggle_host();
        assert_eq!(h.current_hostname(), "ftp2.example.org");
        h.toggle_host();
        assert_eq!(h.current_hostname(), "ftp1.example.org");
    }

    #[test]
    fn error_history_is_a_ring() {
        let mut h = sample_host();
        for code in 1..=7u8 {
            h.push_error_history(code);
        }
        assert_eq!(h.error_history, [7, 6, 5, 4, 3]);
    }

    #[test]
    fn trl_divided_by_allowed_transfers() {
        let mut h = sample_host();
        h.transfer_rate_limit = 9000;
        assert_eq!(h.trl_per_process(), 3000);
        h.transfer_rate_limit = 0;
        assert_eq!(h.trl_per_process(), 0);
    }
}
