//! Reassembly buffer for multi-segment distribution messages.
//!
//! A producer may split one distribution decision across several fifo
//! records when the job list would not fit an atomic pipe write.
//! Segments are keyed by `(dir_id, unique_number)` and held until the
//! terminal segment arrives; a message whose final segment never shows
//! up is dropped with a warning after the hold deadline.

use std::collections::HashMap;

use tracing::warn;

use super::records::DistributionRecord;

/// How long an incomplete message is kept, seconds.
pub const HOLD_TIME: i64 = 3600;

struct Held {
    segments: Vec<DistributionRecord>,
    first_seen: i64,
}

#[derive(Default)]
pub struct DistributionHold {
    pending: HashMap<(u32, u32), Held>,
}

impl DistributionHold {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_messages(&self) -> usize {
        self.pending.len()
    }

    /// Offers one decoded segment. Returns the complete, ordered
    /// segment list once the terminal segment is in; single-segment
    /// messages pass straight through.
    pub fn offer(&mut self, rec: DistributionRecord, now: i64) -> Option<Vec<DistributionRecord>> {
        if rec.n_segments <= 1 {
            return Some(vec![rec]);
        }
        let key = (rec.dir_id, rec.unique_number);
        let held = self.pending.entry(key).or_insert_with(|| Held {
            segments: Vec::with_capacity(rec.n_segments as usize),
            first_seen: now,
        });
        let terminal = rec.is_terminal();
        held.segments.push(rec);
        if terminal {
            let mut done = self.pending.remove(&key)?.segments;
            done.sort_by_key(|s| s.segment_no);
            Some(done)
        } else {
            None
        }
    }

    /// Drops messages older than [`HOLD_TIME`], warning per message.
    pub fn expire(&mut self, now: i64) {
        self.pending.retain(|(dir_id, unique_number), held| {
            if now - held.first_seen < HOLD_TIME {
                return true;
            }
            warn!(
                dir_id,
                unique_number,
                segments = held.segments.len(),
                file = %held.segments[0].file_name,
                "dropping incomplete distribution message after hold deadline"
            );
            false
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(dir_id: u32, unique: u32, segment_no: u8, n_segments: u8, jid: u32) -> DistributionRecord {
        DistributionRecord {
            input_time: 1_700_000_000,
            file_size: 10,
            dir_id,
            unique_number: unique,
            no_of_dist_types: 1,
            dist_type: 0,
            n_segments,
            segment_no,
            jid_list: vec![jid],
            processing: vec![1],
            file_name: "f".into(),
        }
    }

    #[test]
    fn single_segment_passes_through() {
        let mut hold = DistributionHold::new();
        let out = hold.offer(seg(1, 2, 1, 1, 0x10), 0).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(hold.pending_messages(), 0);
    }

    #[test]
    fn terminal_segment_releases_ordered_message() {
        let mut hold = DistributionHold::new();
        assert!(hold.offer(seg(1, 2, 2, 3, 0x20), 0).is_none());
        assert!(hold.offer(seg(1, 2, 1, 3, 0x10), 1).is_none());
        let out = hold.offer(seg(1, 2, 3, 3, 0x30), 2).unwrap();
        let jids: Vec<u32> = out.iter().map(|s| s.jid_list[0]).collect();
        assert_eq!(jids, vec![0x10, 0x20, 0x30]);
        assert_eq!(hold.pending_messages(), 0);
    }

    #[test]
    fn distinct_keys_do_not_mix() {
        let mut hold = DistributionHold::new();
        assert!(hold.offer(seg(1, 2, 1, 2, 0xa), 0).is_none());
        assert!(hold.offer(seg(1, 3, 1, 2, 0xb), 0).is_none());
        let out = hold.offer(seg(1, 2, 2, 2, 0xc), 1).unwrap();
        assert_eq!(out[0].jid_list[0], 0xa);
        assert_eq!(hold.pending_messages(), 1);
    }

    #[test]
    fn stale_message_expires() {
        let mut hold = DistributionHold::new();
        assert!(hold.offer(seg(1, 2, 1, 2, 0xa), 100).is_none());
        hold.expire(100 + HOLD_TIME - 1);
        assert_eq!(hold.pending_messages(), 1);
        hold.expire(100 + HOLD_TIME);
        assert_eq!(hold.pending_messages(), 0);
    }
}
