//! Control-surface opcodes and their wire forms.
//!
//! Every command starts with a single opcode byte. Most are bare;
//! DELETE_MESSAGE and DELETE_RETRIEVES_FROM_DIR carry a NUL-terminated
//! name of bounded length, the MON toggles a 4-byte little-endian peer
//! index.

/// Stop mutator children; the supervisor stays alive (systemd mode) or
/// exits (daemon mode).
pub const SHUTDOWN: u8 = 1;
/// Full shutdown including the supervisor.
pub const SHUTDOWN_ALL: u8 = 2;
/// Re-initialise children after SHUTDOWN.
pub const START: u8 = 3;
/// Probe: answer ACKN / ACKN_STOPPED on the response fifo.
pub const IS_ALIVE: u8 = 4;
/// Report log capabilities for a peer index (+u32).
pub const GOT_LC: u8 = 5;
/// Disable monitoring of a peer index (+u32).
pub const DISABLE_MON: u8 = 6;
/// Enable monitoring of a peer index (+u32).
pub const ENABLE_MON: u8 = 7;
/// Remove a queued job by message name (+name NUL).
pub const DELETE_MESSAGE: u8 = 8;
/// Cancel outstanding retrievals for a directory (+alias NUL).
pub const DELETE_RETRIEVES_FROM_DIR: u8 = 9;
/// Bump a directory's next_check_time to now.
pub const FORCE_REMOTE_DIR_CHECK: u8 = 10;
/// Force a rescan (archive watch, retrieval).
pub const RETRY: u8 = 11;
/// Shut down only the receiving process.
pub const STOP: u8 = 12;

/// Probe answer: supervisor running.
pub const ACKN: u8 = 0x06;
/// Probe answer: supervisor quiescent after SHUTDOWN.
pub const ACKN_STOPPED: u8 = 0x07;

/// A fully parsed control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Shutdown,
    ShutdownAll,
    Start,
    IsAlive,
    GotLogCapabilities(u32),
    DisableMon(u32),
    EnableMon(u32),
    DeleteMessage(String),
    DeleteRetrievesFromDir(String),
    ForceRemoteDirCheck,
    Retry,
    Stop,
}

impl Command {
    /// Serialises the command into its fifo byte form.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Command::Shutdown => vec![SHUTDOWN],
            Command::ShutdownAll => vec![SHUTDOWN_ALL],
            Command::Start => vec![START],
            Command::IsAlive => vec![IS_ALIVE],
            Command::GotLogCapabilities(idx) => Self::with_index(GOT_LC, *idx),
            Command::DisableMon(idx) => Self::with_index(DISABLE_MON, *idx),
            Command::EnableMon(idx) => Self::with_index(ENABLE_MON, *idx),
            Command::DeleteMessage(name) => Self::with_name(DELETE_MESSAGE, name),
            Command::DeleteRetrievesFromDir(alias) => {
                Self::with_name(DELETE_RETRIEVES_FROM_DIR, alias)
            }
            Command::ForceRemoteDirCheck => vec![FORCE_REMOTE_DIR_CHECK],
            Command::Retry => vec![RETRY],
            Command::Stop => vec![STOP],
        }
    }

    fn with_index(op: u8, idx: u32) -> Vec<u8> {
        let mut v = vec![op];
        v.extend_from_slice(&idx.to_le_bytes());
        v
    }

    fn with_name(op: u8, name: &str) -> Vec<u8> {
        let mut v = vec![op];
        v.extend_from_slice(name.as_bytes());
        v.push(0);
        v
    }
}
