//! CLI command implementations.
//!
//! Each subcommand has its own module with its handler.
//!
//! # Command Modules
//!
//! - [`start`] - Run the supervisor until shutdown
//! - [`stop`] - Signal a running instance to shut down
//! - [`status`] - Probe the instance and print host counters
//! - [`queue`] - List outstanding messages
//! - [`catalog`] - Print the identifier catalogue
//! - [`init`] - Work directory initialization

pub mod catalog;
pub mod init;
pub mod queue;
pub mod start;
pub mod status;
pub mod stop;
