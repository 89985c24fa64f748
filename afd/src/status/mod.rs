//! Shared state areas (FSA, FRA, AFD status).
//!
//! The process-wide source of truth for host and directory state. Each
//! area is a header-prefixed file of fixed-size records; see [`area`]
//! for the attach/rebuild/generation contract and [`fsa`]/[`fra`] for
//! the record layouts.

mod afd_status;
pub(crate) mod area;
mod codec;
pub(crate) mod fra;
pub(crate) mod fsa;
mod header;

use std::path::PathBuf;

use thiserror::Error;

pub use afd_status::{AfdStatus, OFF, ON, RESTARTING};
pub use area::{ActiveArea, AreaRecord, PassiveArea};
pub use fra::{DirFlags, DirRecord, TimeEntry, MAX_DIR_ALIAS, MAX_DIR_URL};
pub use fsa::{
    ConnectStatus, DebugMode, DupCheckFlags, HostRecord, HostState, HostStatus, JobSlot,
    ProtocolOptions, ProtocolSet, SpecialFlags, ERROR_HISTORY_LENGTH, GROUP_IDENTIFIER,
    MAX_FILENAME, MAX_HOSTNAME, MAX_MSG_NAME, MAX_NO_PARALLEL_JOBS, MAX_REAL_HOSTNAME,
};
pub use header::{
    AreaHeader, AREA_MAGIC, AREA_VERSION, FEATURE_DISABLE_DIR_WARN_TIME,
    FEATURE_DISABLE_RETRIEVE, HEADER_SIZE,
};

/// Errors raised by status-area operations.
///
/// A `VersionMismatch` is fatal for the attaching process; the operator
/// is expected to re-initialise the work directory with `afd init`.
#[derive(Debug, Error)]
pub enum AreaError {
    #[error("status area not found: {0} (run `afd init` to initialise)")]
    NotFound(PathBuf),
    #[error(
        "status area version mismatch: found {found}/{found_struct}, \
         expected {expected}/{expected_struct} (re-initialise with `afd init`)"
    )]
    VersionMismatch {
        found: u8,
        found_struct: u8,
        expected: u8,
        expected_struct: u8,
    },
    #[error("status area has bad size: expected {expected}, found {found}")]
    BadSize { expected: u64, found: u64 },
    #[error("status area has bad magic {0:#x}")]
    BadMagic(u32),
    #[error("status area is locked by another mutator: {0}")]
    Locked(PathBuf),
    #[error("record truncated or corrupt")]
    Truncated,
    #[error("encoded record of {size} bytes exceeds slot of {max}")]
    RecordTooLarge { size: usize, max: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AreaRecord for HostRecord {
    const STRUCT_VERSION: u8 = 2;
    const RECORD_SIZE: usize = 8192;

    fn encode_record(&self, buf: &mut Vec<u8>) {
        self.encode(buf)
    }

    fn decode_record(buf: &[u8]) -> Result<Self, AreaError> {
        Self::decode(buf)
    }

    fn record_alias(&self) -> &str {
        &self.alias
    }
}

impl AreaRecord for DirRecord {
    const STRUCT_VERSION: u8 = 2;
    const RECORD_SIZE: usize = 2048;

    fn encode_record(&self, buf: &mut Vec<u8>) {
        self.encode(buf)
    }

    fn decode_record(buf: &[u8]) -> Result<Self, AreaError> {
        Self::decode(buf)
    }

    fn record_alias(&self) -> &str {
        &self.alias
    }
}

/// Merges freshly parsed records with an existing generation, keeping
/// counters of records whose alias survives and zero-initialising the
/// rest. Used on HOST_CONFIG / DIR_CONFIG reload.
pub fn merge_retained<R: AreaRecord>(
    old: Vec<R>,
    new: Vec<R>,
    retain: impl Fn(&R, R) -> R,
) -> Vec<R> {
    new.into_iter()
        .map(|n| {
            match old
                .iter()
                .find(|o| o.record_alias() == n.record_alias())
            {
                Some(o) => retain(o, n),
                None => n,
            }
        })
        .collect()
}

/// Carries the runtime counters of an old host record into its freshly
/// parsed replacement.
pub fn retain_host_counters(old: &HostRecord, mut new: HostRecord) -> HostRecord {
    new.error_counter = old.error_counter;
    new.total_errors = old.total_errors;
    new.successful_retries = old.successful_retries;
    new.first_error_time = old.first_error_time;
    new.last_retry_time = old.last_retry_time;
    new.last_connection = old.last_connection;
    new.total_file_counter = old.total_file_counter;
    new.total_file_size = old.total_file_size;
    new.file_counter_done = old.file_counter_done;
    new.bytes_send = old.bytes_send;
    new.connections = old.connections;
    new.jobs_queued = old.jobs_queued;
    new.error_history = old.error_history;
    // Static offline survives restarts and reloads; the timed variants
    // and operator latches do too, until their deadline or the operator
    // clears them.
    new.host_status |= old.host_status
        & (HostStatus::PAUSE_QUEUE
            | HostStatus::STOP_TRANSFER
            | HostStatus::HOST_ERROR_OFFLINE_STATIC
            | HostStatus::HOST_ERROR_ACKNOWLEDGED
            | HostStatus::HOST_ERROR_OFFLINE
            | HostStatus::DO_NOT_DELETE_DATA);
    new
}

/// Carries the runtime counters of an old directory record into its
/// freshly parsed replacement.
pub fn retain_dir_counters(old: &DirRecord, mut new: DirRecord) -> DirRecord {
    new.bytes_received = old.bytes_received;
    new.files_received = old.files_received;
    new.error_counter = old.error_counter;
    new.last_retrieval = old.last_retrieval;
    new.next_check_time = old.next_check_time;
    new.no_of_process = old.no_of_process;
    new.dir_flag |= old.dir_flag & (DirFlags::DIR_STOPPED | DirFlags::DIR_DISABLED);
    new
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_old_counters_by_alias() {
        let mut old = HostRecord::new("keep", 2);
        old.error_counter = 7;
        old.connections = 99;
        old.host_status |= HostStatus::HOST_ERROR_OFFLINE_STATIC;

        let merged = merge_retained(
            vec![old],
            vec![HostRecord::new("keep", 4), HostRecord::new("fresh", 1)],
            |o, n| retain_host_counters(o, n),
        );

        assert_eq!(merged[0].error_counter, 7);
        assert_eq!(merged[0].connections, 99);
        assert_eq!(merged[0].allowed_transfers, 4);
        assert!(merged[0]
            .host_status
            .contains(HostStatus::HOST_ERROR_OFFLINE_STATIC));

        assert_eq!(merged[1].error_counter, 0);
        assert_eq!(merged[1].connections, 0);
    }
}
