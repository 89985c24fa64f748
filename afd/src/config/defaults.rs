//! Default values for AFD_CONFIG settings.

pub const DEFAULT_MAX_CONNECTIONS: u32 = 50;
pub const DEFAULT_DISPATCH_INTERVAL_MS: u64 = 1000;

pub const DEFAULT_MAX_LOG_FILES: usize = 10;
pub const DEFAULT_MAX_LOG_FILE_SIZE: u64 = 4 * 1024 * 1024;
pub const DEFAULT_SWITCH_FILE_TIME: u64 = 3600;

pub const DEFAULT_ARCHIVE_RESCAN_INTERVAL: u64 = 60;
pub const DEFAULT_ARCHIVE_REPORT_INTERVAL: u64 = 3600;

pub const DEFAULT_MAX_ERRORS: u32 = 10;
pub const DEFAULT_RETRY_INTERVAL: u32 = 120;
pub const DEFAULT_TRANSFER_TIMEOUT: u32 = 120;
pub const DEFAULT_TRANSFER_BLOCK_SIZE: u32 = 4096;
pub const DEFAULT_ALLOWED_TRANSFERS: u8 = 3;

pub const DEFAULT_CONFIG_CHECK_INTERVAL: u64 = 10;
pub const DEFAULT_MAX_RESTARTS: u32 = 20;
pub const DEFAULT_RESTART_WINDOW: u64 = 5;
