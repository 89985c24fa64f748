//! Host and directory state machines.
//!
//! Pure transition functions over the shared-area records: the
//! dispatcher feeds transfer outcomes and clock ticks in, the
//! projected states and operator-visible bits come out. Nothing in
//! here touches the area files directly.

pub mod dir;
pub mod host;

pub use dir::{check_dir_warn_time, clear_dir_error, record_dir_error, record_scan};
pub use host::{
    aggregate_group, check_warn_time, clear_cycle_flags, expire_timed_latches, record_failure,
    record_success, FailureOutcome, GroupView, TransferResult,
};
