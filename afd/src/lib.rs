//! AFD - Automatic File Distributor
//!
//! This library provides the core of an unattended file distribution
//! daemon: files dropped into monitored directories are queued,
//! dispatched over FTP, SFTP, local copy or an external command, and
//! accounted for in memory-mapped status areas that other processes
//! on the same machine can observe live.
//!
//! # High-Level API
//!
//! The [`supervisor`] module is the entry point for running a full
//! instance:
//!
//! ```ignore
//! use afd::config::AfdConfig;
//! use afd::paths::WorkDir;
//! use afd::supervisor::Supervisor;
//!
//! let work_dir = WorkDir::resolve(None)?;
//! let config = AfdConfig::load_from(&work_dir)?;
//! let mut supervisor = Supervisor::start(work_dir, config).await?;
//! supervisor.run().await?;
//! ```
//!
//! Everything else is usable piecemeal: [`status`] for attaching to a
//! running instance's areas, [`control`] for talking to its fifos,
//! [`queue`] and [`catalog`] for offline inspection of the on-disk
//! state.

pub mod catalog;
pub mod config;
pub mod control;
pub mod dispatcher;
pub mod logging;
pub mod logsink;
pub mod paths;
pub mod queue;
pub mod reaper;
pub mod state;
pub mod status;
pub mod supervisor;
pub mod worker;

/// Version of the AFD library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
