//! Configuration: the AFD_CONFIG INI file plus the textual
//! HOST_CONFIG / DIR_CONFIG rulesets.
//!
//! INI key mapping lives in [`parser`], settings structs in
//! [`settings`], constants in [`defaults`]. The rulesets have their
//! own line/block parsers producing shared-area records directly.

pub mod cron;
pub mod defaults;
pub mod dir_config;
pub mod file;
pub mod host_config;
pub mod parser;
pub mod settings;

pub use cron::parse_time_entry;
pub use dir_config::{parse_dir_config, parse_dir_config_full, Recipient};
pub use file::{config_mtime, ConfigError, AFD_CONFIG_NAME};
pub use host_config::parse_host_config;
pub use settings::{
    AfdConfig, ArchiveSettings, DispatcherSettings, HostDefaults, LogSettings,
    SupervisorSettings,
};

/// Ruleset file names under the work directory.
pub const HOST_CONFIG_NAME: &str = "HOST_CONFIG";
pub const DIR_CONFIG_NAME: &str = "DIR_CONFIG";
