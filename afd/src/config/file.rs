//! Loading of the AFD_CONFIG INI file.
//!
//! An absent file is not an error: the daemon runs on defaults until
//! an operator drops a config in place, and the supervisor's mtime
//! probe picks it up.

use std::path::Path;
use std::time::SystemTime;

use ini::Ini;
use thiserror::Error;

use super::settings::AfdConfig;

/// Configuration file name under the work directory.
pub const AFD_CONFIG_NAME: &str = "AFD_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] ini::Error),

    #[error("invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("malformed HOST_CONFIG line {line}: {reason}")]
    MalformedHostConfig { line: usize, reason: String },

    #[error("malformed DIR_CONFIG line {line}: {reason}")]
    MalformedDirConfig { line: usize, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AfdConfig {
    /// Loads configuration from `path`, returning defaults when the
    /// file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }
}

/// The file's mtime, used by the supervisor's reload probe. A missing
/// file maps to the epoch so that creating it later counts as a change.
pub fn config_mtime(path: &Path) -> SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}
