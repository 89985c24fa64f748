//! Settings structs for the sections of AFD_CONFIG.
//!
//! Each struct represents one `[section]` of the INI file. Pure data,
//! no parsing; defaults live in [`super::defaults`], the INI overlay
//! in [`super::parser`].

use super::defaults::*;

/// Complete daemon configuration loaded from AFD_CONFIG.
#[derive(Debug, Clone)]
pub struct AfdConfig {
    pub dispatcher: DispatcherSettings,
    pub log: LogSettings,
    pub archive: ArchiveSettings,
    pub host_defaults: HostDefaults,
    pub supervisor: SupervisorSettings,
}

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// Hard cap on simultaneously open connections across all hosts.
    pub max_connections: u32,
    /// Scheduler tick, milliseconds.
    pub dispatch_interval_ms: u64,
    /// Default retry interval for hosts that do not set one, seconds.
    pub default_retry_interval: u32,
}

/// Operator log files: generation counts and size caps.
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub max_output_log_files: usize,
    pub max_input_log_files: usize,
    pub max_delete_log_files: usize,
    pub max_distribution_log_files: usize,
    /// Size cap per generation, bytes.
    pub max_log_file_size: u64,
    /// Rotation period, seconds.
    pub switch_file_time: u64,
}

/// Archive tree reaping.
#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    /// Sweep interval, seconds.
    pub rescan_interval: u64,
    /// Emit the removal tally once per this many seconds.
    pub report_interval: u64,
}

/// Fallbacks applied to HOST_CONFIG entries that leave a field empty.
#[derive(Debug, Clone)]
pub struct HostDefaults {
    pub max_errors: u32,
    pub retry_interval: u32,
    pub transfer_timeout: u32,
    pub transfer_block_size: u32,
    pub allowed_transfers: u8,
}

/// Supervisor loop tuning.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Config-file mtime probe interval, seconds.
    pub config_check_interval: u64,
    /// Restarts within [`Self::restart_window`] before quarantine.
    pub max_restarts: u32,
    /// Seconds.
    pub restart_window: u64,
}

impl Default for AfdConfig {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherSettings {
                max_connections: DEFAULT_MAX_CONNECTIONS,
                dispatch_interval_ms: DEFAULT_DISPATCH_INTERVAL_MS,
                default_retry_interval: DEFAULT_RETRY_INTERVAL,
            },
            log: LogSettings {
                max_output_log_files: DEFAULT_MAX_LOG_FILES,
                max_input_log_files: DEFAULT_MAX_LOG_FILES,
                max_delete_log_files: DEFAULT_MAX_LOG_FILES,
                max_distribution_log_files: DEFAULT_MAX_LOG_FILES,
                max_log_file_size: DEFAULT_MAX_LOG_FILE_SIZE,
                switch_file_time: DEFAULT_SWITCH_FILE_TIME,
            },
            archive: ArchiveSettings {
                rescan_interval: DEFAULT_ARCHIVE_RESCAN_INTERVAL,
                report_interval: DEFAULT_ARCHIVE_REPORT_INTERVAL,
            },
            host_defaults: HostDefaults {
                max_errors: DEFAULT_MAX_ERRORS,
                retry_interval: DEFAULT_RETRY_INTERVAL,
                transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
                transfer_block_size: DEFAULT_TRANSFER_BLOCK_SIZE,
                allowed_transfers: DEFAULT_ALLOWED_TRANSFERS,
            },
            supervisor: SupervisorSettings {
                config_check_interval: DEFAULT_CONFIG_CHECK_INTERVAL,
                max_restarts: DEFAULT_MAX_RESTARTS,
                restart_window: DEFAULT_RESTART_WINDOW,
            },
        }
    }
}
