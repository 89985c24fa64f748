//! Pure per-tick scheduling decisions.
//!
//! The planner walks the queue in insertion order against a snapshot
//! of the host area and decides which messages start a worker this
//! tick. It holds no IO and no shared state, so every scheduling rule
//! is testable on plain values.

use std::collections::HashMap;

use crate::queue::{CacheEntry, MessageCache, MessageQueue};
use crate::status::fsa::{HostRecord, HostStatus};

/// One message cleared for launch this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub queue_index: usize,
    pub cache_pos: usize,
    pub fsa_pos: usize,
    /// Lowest free job slot at planning time.
    pub slot: usize,
}

/// Everything one tick decided.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickPlan {
    pub launches: Vec<Launch>,
    /// Queue indices completed without a worker (simulation mode).
    pub simulated: Vec<usize>,
}

/// Global limits applied on top of per-host saturation.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_connections: u32,
    pub active_connections: u32,
}

pub fn plan_tick(
    queue: &MessageQueue,
    cache: &MessageCache,
    hosts: &[HostRecord],
    limits: Limits,
    now: i64,
) -> TickPlan {
    let mut plan = TickPlan::default();
    // Slots and transfer counts claimed earlier in this same tick.
    let mut claimed: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut connections = limits.active_connections;

    for (queue_index, entry) in queue.iter().enumerate() {
        if connections >= limits.max_connections {
            break;
        }
        let Some(cache_pos) = cache.position(&entry.msg_name) else {
            continue;
        };
        let Some(meta) = cache.get(cache_pos) else {
            continue;
        };
        let fsa_pos = meta.fsa_pos as usize;
        let Some(host) = hosts.get(fsa_pos) else {
            continue;
        };

        if !host.accepts_transfers() {
            continue;
        }
        if in_backoff(meta, now) {
            continue;
        }

        let taken = claimed.entry(fsa_pos).or_default();
        let active = host.active_transfers as usize + taken.len();
        if active >= host.allowed_transfers as usize {
            continue;
        }

        if host.host_status.contains(HostStatus::SIMULATE_SEND_MODE) {
            plan.simulated.push(queue_index);
            continue;
        }

        let Some(slot) = free_slot_excluding(host, taken) else {
            continue;
        };
        taken.push(slot);
        connections += 1;
        plan.launches.push(Launch {
            queue_index,
            cache_pos,
            fsa_pos,
            slot,
        });
    }
    plan
}

fn in_backoff(meta: &CacheEntry, now: i64) -> bool {
    meta.in_backoff(now)
}

/// Lowest free slot not already claimed this tick.
fn free_slot_excluding(host: &HostRecord, taken: &[usize]) -> Option<usize> {
    host.job_status
        .iter()
        .take(host.allowed_transfers as usize)
        .enumerate()
        .find(|(i, s)| s.is_free() && !taken.contains(i))
        .map(|(i, _)| i)
}

/// Whether a queued message may continue on an open session to the
/// same host. Retrievals and hosts that opted out never burst.
pub fn burst_compatible(host: &HostRecord, meta: &CacheEntry, now: i64) -> bool {
    use crate::status::fsa::{ProtocolOptions, SpecialFlags};
    !meta.is_retrieve
        && !in_backoff(meta, now)
        && host.accepts_transfers()
        && !host.protocol_options.contains(ProtocolOptions::NO_BURST)
        && !host.special_flag.contains(SpecialFlags::KEEP_CON_NO_SEND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{LastError, MsgName};
    use crate::status::fsa::{JobSlot, ProtocolOptions};

    fn host(alias: &str, allowed: u8) -> HostRecord {
        HostRecord::new(alias, allowed)
    }

    fn queued(
        queue: &mut MessageQueue,
        cache: &mut MessageCache,
        n: u32,
        fsa_pos: u32,
    ) -> MsgName {
        let name = MsgName::build(1000, n, 0);
        let pos = cache
            .add(CacheEntry::new(name.clone(), fsa_pos, n))
            .unwrap();
        queue.enqueue(name.clone(), pos as u32).unwrap();
        name
    }

    fn fixtures() -> (tempfile::TempDir, MessageQueue, MessageCache) {
        let tmp = tempfile::tempdir().unwrap();
        let queue = MessageQueue::open(tmp.path().join("msg_queue")).unwrap();
        let cache = MessageCache::open(tmp.path().join("msg_cache")).unwrap();
        (tmp, queue, cache)
    }

    const LIMITS: Limits = Limits {
        max_connections: 50,
        active_connections: 0,
    };

    #[test]
    fn launches_in_queue_order_up_to_host_saturation() {
        let (_tmp, mut queue, mut cache) = fixtures();
        for n in 1..=3 {
            queued(&mut queue, &mut cache, n, 0);
        }
        let hosts = vec![host("h", 2)];
        let plan = plan_tick(&queue, &cache, &hosts, LIMITS, 5000);
        assert_eq!(plan.launches.len(), 2);
        assert_eq!(plan.launches[0].queue_index, 0);
        assert_eq!(plan.launches[0].slot, 0);
        assert_eq!(plan.launches[1].slot, 1);
    }

    #[test]
    fn paused_host_is_skipped_but_others_still_run() {
        let (_tmp, mut queue, mut cache) = fixtures();
        queued(&mut queue, &mut cache, 1, 0);
        queued(&mut queue, &mut cache, 2, 1);
        let mut paused = host("p", 2);
        paused.host_status.insert(HostStatus::PAUSE_QUEUE);
        let hosts = vec![paused, host("ok", 2)];
        let plan = plan_tick(&queue, &cache, &hosts, LIMITS, 5000);
        assert_eq!(plan.launches.len(), 1);
        assert_eq!(plan.launches[0].fsa_pos, 1);
    }

    #[test]
    fn backoff_skips_until_retry_interval_elapses() {
        let (_tmp, mut queue, mut cache) = fixtures();
        let name = queued(&mut queue, &mut cache, 1, 0);
        let pos = cache.position(&name).unwrap();
        cache
            .update(pos, |e| {
                e.last_error = LastError::Timeout;
                e.last_retry_time = 4000;
                e.retry_interval = 120;
            })
            .unwrap();
        let hosts = vec![host("h", 2)];
        assert!(plan_tick(&queue, &cache, &hosts, LIMITS, 4100)
            .launches
            .is_empty());
        assert_eq!(
            plan_tick(&queue, &cache, &hosts, LIMITS, 4121).launches.len(),
            1
        );
    }

    #[test]
    fn simulation_mode_completes_without_a_worker() {
        let (_tmp, mut queue, mut cache) = fixtures();
        queued(&mut queue, &mut cache, 1, 0);
        let mut h = host("sim", 2);
        h.host_status.insert(HostStatus::SIMULATE_SEND_MODE);
        let plan = plan_tick(&queue, &cache, &[h], LIMITS, 5000);
        assert!(plan.launches.is_empty());
        assert_eq!(plan.simulated, vec![0]);
    }

    #[test]
    fn occupied_slots_are_never_reassigned() {
        let (_tmp, mut queue, mut cache) = fixtures();
        queued(&mut queue, &mut cache, 1, 0);
        let mut h = host("h", 3);
        h.active_transfers = 1;
        h.job_status[0] = JobSlot {
            proc_id: 7,
            ..JobSlot::default()
        };
        let plan = plan_tick(&queue, &cache, &[h], LIMITS, 5000);
        assert_eq!(plan.launches[0].slot, 1);
    }

    #[test]
    fn global_connection_cap_stops_the_walk() {
        let (_tmp, mut queue, mut cache) = fixtures();
        for n in 1..=4 {
            queued(&mut queue, &mut cache, n, (n - 1) % 2);
        }
        let hosts = vec![host("a", 4), host("b", 4)];
        let limits = Limits {
            max_connections: 3,
            active_connections: 1,
        };
        let plan = plan_tick(&queue, &cache, &hosts, limits, 5000);
        assert_eq!(plan.launches.len(), 2);
    }

    #[test]
    fn no_burst_option_blocks_continuation() {
        let meta = CacheEntry::new(MsgName::build(1, 1, 0), 0, 1);
        let mut h = host("h", 2);
        assert!(burst_compatible(&h, &meta, 100));
        h.protocol_options.insert(ProtocolOptions::NO_BURST);
        assert!(!burst_compatible(&h, &meta, 100));
    }
}
