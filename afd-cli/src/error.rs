//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent
//! formatting and appropriate exit codes.

use std::fmt;
use std::process;

use afd::catalog::CatalogError;
use afd::config::ConfigError;
use afd::control::ControlError;
use afd::queue::QueueError;
use afd::status::AreaError;
use afd::supervisor::SupervisorError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// No work directory given and $AFD_WORK_DIR is not set
    NoWorkDir,
    /// No instance is running in the work directory
    NotRunning,
    /// Failed to initialize logging
    LoggingInit(std::io::Error),
    /// Configuration error
    Config(ConfigError),
    /// Supervisor failed to start or run
    Supervisor(SupervisorError),
    /// Fifo control traffic failed
    Control(ControlError),
    /// Status area access failed
    Area(AreaError),
    /// Queue file access failed
    Queue(QueueError),
    /// Catalogue access failed
    Catalog(CatalogError),
    /// Other filesystem error
    Io(std::io::Error),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::NoWorkDir => {
                eprintln!();
                eprintln!("Pass -w <dir> or export AFD_WORK_DIR.");
            }
            CliError::Supervisor(SupervisorError::AlreadyRunning(_)) => {
                eprintln!();
                eprintln!("Use 'afd stop' to shut the running instance down first.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::NoWorkDir => write!(f, "no work directory"),
            CliError::NotRunning => write!(f, "no instance is running here"),
            CliError::LoggingInit(err) => write!(f, "failed to initialize logging: {}", err),
            CliError::Config(err) => write!(f, "configuration: {}", err),
            CliError::Supervisor(err) => write!(f, "{}", err),
            CliError::Control(err) => write!(f, "{}", err),
            CliError::Area(err) => write!(f, "status area: {}", err),
            CliError::Queue(err) => write!(f, "message queue: {}", err),
            CliError::Catalog(err) => write!(f, "catalogue: {}", err),
            CliError::Io(err) => write!(f, "{}", err),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        CliError::Config(err)
    }
}

impl From<SupervisorError> for CliError {
    fn from(err: SupervisorError) -> Self {
        CliError::Supervisor(err)
    }
}

impl From<ControlError> for CliError {
    fn from(err: ControlError) -> Self {
        CliError::Control(err)
    }
}

impl From<AreaError> for CliError {
    fn from(err: AreaError) -> Self {
        CliError::Area(err)
    }
}

impl From<QueueError> for CliError {
    fn from(err: QueueError) -> Self {
        CliError::Queue(err)
    }
}

impl From<CatalogError> for CliError {
    fn from(err: CatalogError) -> Self {
        CliError::Catalog(err)
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io(err)
    }
}
