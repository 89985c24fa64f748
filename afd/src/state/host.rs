//! Host error/recovery state transitions.
//!
//! These functions are the only writers of the error bookkeeping
//! fields on a [`HostRecord`]; the dispatcher calls them from its tick
//! and from worker-exit handling, then persists the record through the
//! active FSA. Keeping the transitions pure over the record makes the
//! whole machine testable without any shared area underneath.

use tracing::{info, warn};

use crate::status::fsa::{HostRecord, HostState, HostStatus};

/// Worker exit codes recorded into the error history ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferResult {
    Ok = 0,
    Timeout = 1,
    ConnectError = 2,
    AuthError = 3,
    PartialTransfer = 4,
    ProtocolError = 5,
    Permanent = 6,
    Killed = 7,
}

/// What a failure transition did, so the caller can log and react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    /// The host just crossed max_errors and was auto-paused.
    pub entered_not_working: bool,
}

/// Books one failed transfer. Crossing `max_errors` latches
/// AUTO_PAUSE_QUEUE unless an acknowledge/offline override is set.
pub fn record_failure(host: &mut HostRecord, result: TransferResult, now: i64) -> FailureOutcome {
    host.error_counter = host.error_counter.saturating_add(1);
    host.total_errors = host.total_errors.saturating_add(1);
    host.push_error_history(result as u8);
    if host.first_error_time == 0 {
        host.first_error_time = now;
    }

    let crossed = host.error_counter >= host.max_errors
        && !host.host_status.error_override()
        && !host.host_status.contains(HostStatus::AUTO_PAUSE_QUEUE);
    if crossed {
        host.host_status.insert(HostStatus::AUTO_PAUSE_QUEUE);
        warn!(
            host = %host.alias,
            error_counter = host.error_counter,
            max_errors = host.max_errors,
            "host entered NOT WORKING, queue auto-paused"
        );
    }
    FailureOutcome {
        entered_not_working: crossed,
    }
}

/// Books one successful transfer; a host that was in error recovers.
/// HOST_ACTION_SUCCESS stays set for one dispatcher cycle so the UI
/// can flash it, cleared by [`clear_cycle_flags`].
pub fn record_success(host: &mut HostRecord, now: i64) {
    host.successful_retries = host.successful_retries.saturating_add(1);
    if host.error_counter > 0 {
        info!(
            host = %host.alias,
            after_errors = host.error_counter,
            "host recovered"
        );
    }
    host.error_counter = 0;
    host.first_error_time = 0;
    host.host_status
        .remove(HostStatus::AUTO_PAUSE_QUEUE | HostStatus::ERROR_QUEUE_SET);
    host.host_status.insert(HostStatus::HOST_ACTION_SUCCESS);
    host.last_connection = now;
}

/// Clears the per-cycle flash bits; called once per dispatcher tick
/// after observers had a chance to see them.
pub fn clear_cycle_flags(host: &mut HostRecord) {
    host.host_status.remove(HostStatus::HOST_ACTION_SUCCESS);
}

/// Sets HOST_WARN_TIME_REACHED once the host has been silent longer
/// than its warn_time. Returns true when the bit was newly set, so the
/// caller logs the event exactly once.
pub fn check_warn_time(host: &mut HostRecord, now: i64) -> bool {
    if host.warn_time == 0
        || host.last_connection == 0
        || host
            .host_status
            .contains(HostStatus::HOST_WARN_TIME_REACHED)
    {
        return false;
    }
    if now.saturating_sub(host.last_connection) as u64 > host.warn_time {
        host.host_status.insert(HostStatus::HOST_WARN_TIME_REACHED);
        return true;
    }
    false
}

/// Clears the timed acknowledge/offline latches once their event
/// window has passed. The untimed and static variants are operator
/// latches and never expire here.
pub fn expire_timed_latches(host: &mut HostRecord, now: i64) {
    const TIMED: HostStatus = HostStatus::HOST_ERROR_ACKNOWLEDGED_T
        .union(HostStatus::HOST_ERROR_OFFLINE_T);
    if host.host_status.intersects(TIMED) && host.end_event_time != 0 && now >= host.end_event_time
    {
        host.host_status.remove(TIMED);
        host.start_event_time = 0;
        host.end_event_time = 0;
    }
}

/// Summary of a group's members, produced by [`aggregate_group`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GroupView {
    pub errors: bool,
    pub warnings: bool,
    pub active_transfers: u32,
}

/// Recomputes the group record's aggregate bits from its members'
/// projected states. Members with an error override project neither
/// error nor warning into the group.
pub fn aggregate_group<'a, I>(group: &mut HostRecord, members: I) -> GroupView
where
    I: IntoIterator<Item = &'a HostRecord>,
{
    let mut view = GroupView::default();
    for m in members {
        match m.projected_state() {
            HostState::NotWorking => view.errors = true,
            HostState::Warning => view.warnings = true,
            _ => {}
        }
        view.active_transfers += m.active_transfers as u32;
    }
    group
        .host_status
        .set(HostStatus::ERROR_HOSTS_IN_GROUP, view.errors);
    group
        .host_status
        .set(HostStatus::WARN_HOSTS_IN_GROUP, view.warnings);
    group.active_transfers = view.active_transfers.min(u8::MAX as u32) as u8;
    view
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(max_errors: u32) -> HostRecord {
        let mut h = HostRecord::new("wmo-gts", 2);
        h.max_errors = max_errors;
        h
    }

    #[test]
    fn crossing_max_errors_latches_auto_pause_once() {
        let mut h = host(2);
        let first = record_failure(&mut h, TransferResult::Timeout, 100);
        assert!(!first.entered_not_working);
        let second = record_failure(&mut h, TransferResult::Timeout, 101);
        assert!(second.entered_not_working);
        assert!(h.host_status.contains(HostStatus::AUTO_PAUSE_QUEUE));
        assert_eq!(h.first_error_time, 100);
        // Already latched: further failures report no transition.
        let third = record_failure(&mut h, TransferResult::ConnectError, 102);
        assert!(!third.entered_not_working);
        assert_eq!(h.total_errors, 3);
    }

    #[test]
    fn acknowledged_host_is_not_auto_paused() {
        let mut h = host(1);
        h.host_status.insert(HostStatus::HOST_ERROR_ACKNOWLEDGED);
        let out = record_failure(&mut h, TransferResult::AuthError, 10);
        assert!(!out.entered_not_working);
        assert!(!h.host_status.contains(HostStatus::AUTO_PAUSE_QUEUE));
        // Counters still track the underlying condition.
        assert_eq!(h.error_counter, 1);
    }

    #[test]
    fn success_resets_error_state_and_flashes() {
        let mut h = host(2);
        record_failure(&mut h, TransferResult::Timeout, 1);
        record_failure(&mut h, TransferResult::Timeout, 2);
        record_success(&mut h, 50);
        assert_eq!(h.error_counter, 0);
        assert_eq!(h.first_error_time, 0);
        assert_eq!(h.successful_retries, 1);
        assert_eq!(h.last_connection, 50);
        assert!(!h.host_status.contains(HostStatus::AUTO_PAUSE_QUEUE));
        assert!(h.host_status.contains(HostStatus::HOST_ACTION_SUCCESS));
        clear_cycle_flags(&mut h);
        assert!(!h.host_status.contains(HostStatus::HOST_ACTION_SUCCESS));
    }

    #[test]
    fn clean_first_success_counts_a_retry() {
        let mut h = host(3);
        record_success(&mut h, 10);
        assert_eq!(h.successful_retries, 1);
        record_success(&mut h, 11);
        assert_eq!(h.successful_retries, 2);
    }

    #[test]
    fn warn_time_sets_bit_exactly_once() {
        let mut h = host(10);
        h.warn_time = 60;
        h.last_connection = 1000;
        assert!(!check_warn_time(&mut h, 1059));
        assert!(check_warn_time(&mut h, 1061));
        assert!(!check_warn_time(&mut h, 2000));
        assert!(h.host_status.contains(HostStatus::HOST_WARN_TIME_REACHED));
    }

    #[test]
    fn timed_offline_expires_static_does_not() {
        let mut h = host(10);
        h.host_status
            .insert(HostStatus::HOST_ERROR_OFFLINE_T | HostStatus::HOST_ERROR_OFFLINE_STATIC);
        h.end_event_time = 500;
        expire_timed_latches(&mut h, 499);
        assert!(h.host_status.contains(HostStatus::HOST_ERROR_OFFLINE_T));
        expire_timed_latches(&mut h, 500);
        assert!(!h.host_status.contains(HostStatus::HOST_ERROR_OFFLINE_T));
        assert!(h
            .host_status
            .contains(HostStatus::HOST_ERROR_OFFLINE_STATIC));
        assert_eq!(h.end_event_time, 0);
    }

    #[test]
    fn group_aggregates_member_projections() {
        let mut group = HostRecord::new("+nwp", 1);
        group.real_hostname[0] = "+nwp".into();

        let mut broken = host(1);
        record_failure(&mut broken, TransferResult::ConnectError, 1);
        let mut slow = host(10);
        slow.host_status.insert(HostStatus::HOST_WARN_TIME_REACHED);
        let mut busy = host(10);
        busy.active_transfers = 3;

        let view = aggregate_group(&mut group, [&broken, &slow, &busy]);
        assert!(view.errors && view.warnings);
        assert_eq!(view.active_transfers, 3);
        assert!(group.host_status.contains(HostStatus::ERROR_HOSTS_IN_GROUP));
        assert!(group.host_status.contains(HostStatus::WARN_HOSTS_IN_GROUP));
        assert_eq!(group.active_transfers, 3);

        // Members recover; the next pass clears the aggregate bits.
        record_success(&mut broken, 2);
        slow.host_status.remove(HostStatus::HOST_WARN_TIME_REACHED);
        let view = aggregate_group(&mut group, [&broken, &slow, &busy]);
        assert!(!view.errors && !view.warnings);
        assert!(!group.host_status.contains(HostStatus::ERROR_HOSTS_IN_GROUP));
    }
}
