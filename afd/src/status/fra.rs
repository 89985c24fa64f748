//! File-retrieve Status Area records.
//!
//! One [`DirRecord`] per scanned directory. Local directories only carry
//! the scan counters; remote ("retrieve") directories additionally name
//! the host they fetch from, the retrieve work directory and either a
//! fixed polling interval or a list of cron-like [`TimeEntry`] schedules
//! that drive `next_check_time`.

use bitflags::bitflags;
use bytes::BufMut;
use chrono::{Datelike, TimeZone, Timelike, Utc};

use super::codec::{get_i64, get_str, get_u32, get_u64, get_u8};
use super::fsa::{ProtocolSet, MAX_HOSTNAME};
use super::AreaError;

/// Maximum length of a directory alias.
pub const MAX_DIR_ALIAS: usize = 32;
/// Maximum length of a directory URL / path.
pub const MAX_DIR_URL: usize = 256;
/// Upper bound on time entries per directory.
pub const MAX_TIME_ENTRIES: usize = 8;

bitflags! {
    /// Directory status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DirFlags: u32 {
        const MAX_COPIED        = 1 << 0;
        const DIR_STOPPED       = 1 << 1;
        const DIR_DISABLED      = 1 << 2;
        const WARN_TIME_REACHED = 1 << 3;
        const DIR_ERROR_SET     = 1 << 4;
    }
}

/// Cron-like schedule: bit N set in a field means that value matches.
///
/// Fields follow crontab semantics (minute 0-59, hour 0-23, day of month
/// 1-31, month 1-12, day of week 0-6 with 0 = Sunday).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeEntry {
    pub minute: u64,
    pub hour: u32,
    pub day_of_month: u32,
    pub month: u16,
    pub day_of_week: u8,
}

impl TimeEntry {
    /// Schedule matching every minute.
    pub fn every_minute() -> Self {
        Self {
            minute: (1u64 << 60) - 1,
            hour: (1u32 << 24) - 1,
            day_of_month: !0u32 >> 1,
            month: (1u16 << 12) - 1,
            day_of_week: (1u8 << 7) - 1,
        }
    }

    /// Whether the given UTC timestamp matches this entry.
    pub fn matches(&self, ts: i64) -> bool {
        let Some(dt) = Utc.timestamp_opt(ts, 0).single() else {
            return false;
        };
        self.minute & (1 << dt.minute()) != 0
            && self.hour & (1 << dt.hour()) != 0
            && self.day_of_month & (1 << (dt.day() - 1)) != 0
            && self.month & (1 << (dt.month() - 1)) != 0
            && self.day_of_week & (1 << dt.weekday().num_days_from_sunday()) != 0
    }

    /// First matching minute boundary strictly after `from`.
    ///
    /// Bounded to two years of lookahead; a schedule with no match in
    /// that window returns `None`.
    pub fn next_after(&self, from: i64) -> Option<i64> {
        let mut t = from - from.rem_euclid(60) + 60;
        let limit = from + 2 * 366 * 86_400;
        while t <= limit {
            if self.matches(t) {
                return Some(t);
            }
            t += 60;
        }
        None
    }
}

/// One FRA entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DirRecord {
    pub alias: String,
    pub dir_id: u32,
    /// Real directory name; a URL for retrieve directories.
    pub url: String,
    pub retrieve_work_dir: String,
    /// Host alias when this directory fetches from a remote host.
    pub host_alias: String,
    pub protocol: ProtocolSet,

    pub dir_flag: DirFlags,
    pub bytes_received: u64,
    pub files_received: u64,
    pub files_in_dir: u32,
    pub files_queued: u32,
    pub bytes_in_dir: u64,
    pub bytes_in_queue: u64,

    pub max_process: u8,
    pub no_of_process: u8,
    pub max_copied_files: u32,
    pub max_errors: u32,
    pub error_counter: u32,

    pub last_retrieval: i64,
    pub next_check_time: i64,
    pub warn_time: u64,
    pub keep_connected: u32,
    pub remote_file_check_interval: u32,
    pub start_event_time: i64,
    pub end_event_time: i64,

    pub time_entries: Vec<TimeEntry>,
}

impl DirRecord {
    pub fn new(alias: &str, url: &str) -> Self {
        Self {
            alias: alias.to_string(),
            dir_id: crc32fast::hash(alias.as_bytes()),
            url: url.to_string(),
            retrieve_work_dir: String::new(),
            host_alias: String::new(),
            protocol: ProtocolSet::LOC,
            dir_flag: DirFlags::default(),
            bytes_received: 0,
            files_received: 0,
            files_in_dir: 0,
            files_queued: 0,
            bytes_in_dir: 0,
            bytes_in_queue: 0,
            max_process: 1,
            no_of_process: 0,
            max_copied_files: 100,
            max_errors: 10,
            error_counter: 0,
            last_retrieval: 0,
            next_check_time: 0,
            warn_time: 0,
            keep_connected: 0,
            remote_file_check_interval: 60,
            start_event_time: 0,
            end_event_time: 0,
            time_entries: Vec::new(),
        }
    }

    /// Whether retrievals may be scheduled for this directory.
    pub fn accepts_retrieves(&self) -> bool {
        !self
            .dir_flag
            .intersects(DirFlags::DIR_STOPPED | DirFlags::DIR_DISABLED)
    }

    /// Whether new work may even be enqueued. DIR_DISABLED is the
    /// stronger latch; DIR_STOPPED only blocks scheduling.
    pub fn accepts_enqueue(&self) -> bool {
        !self.dir_flag.contains(DirFlags::DIR_DISABLED)
    }

    /// Advances `next_check_time` past `now`, using the time-entry list
    /// when present, otherwise the fixed polling interval.
    pub fn advance_next_check(&mut self, now: i64) {
        if self.time_entries.is_empty() {
            let interval = self.remote_file_check_interval.max(1) as i64;
            self.next_check_time = now + interval;
            return;
        }
        self.next_check_time = self
            .time_entries
            .iter()
            .filter_map(|e| e.next_after(now))
            .min()
            .unwrap_or(now + self.remote_file_check_interval.max(1) as i64);
    }

    // -- binary codec ------------------------------------------------------

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        use super::codec::put_str;

        put_str(buf, &self.alias, MAX_DIR_ALIAS);
        buf.put_u32_le(self.dir_id);
        put_str(buf, &self.url, MAX_DIR_URL);
        put_str(buf, &self.retrieve_work_dir, MAX_DIR_URL);
        put_str(buf, &self.host_alias, MAX_HOSTNAME);
        buf.put_u32_le(self.protocol.bits());

        buf.put_u32_le(self.dir_flag.bits());
        buf.put_u64_le(self.bytes_received);
        buf.put_u64_le(self.files_received);
        buf.put_u32_le(self.files_in_dir);
        buf.put_u32_le(self.files_queued);
        buf.put_u64_le(self.bytes_in_dir);
        buf.put_u64_le(self.bytes_in_queue);

        buf.put_u8(self.max_process);
        buf.put_u8(self.no_of_process);
        buf.put_u32_le(self.max_copied_files);
        buf.put_u32_le(self.max_errors);
        buf.put_u32_le(self.error_counter);

        buf.put_i64_le(self.last_retrieval);
        buf.put_i64_le(self.next_check_time);
        buf.put_u64_le(self.warn_time);
        buf.put_u32_le(self.keep_connected);
        buf.put_u32_le(self.remote_file_check_interval);
        buf.put_i64_le(self.start_event_time);
        buf.put_i64_le(self.end_event_time);

        buf.put_u8(self.time_entries.len() as u8);
        for e in &self.time_entries {
            buf.put_u64_le(e.minute);
            buf.put_u32_le(e.hour);
            buf.put_u32_le(e.day_of_month);
            buf.put_u16_le(e.month);
            buf.put_u8(e.day_of_week);
        }
    }

    pub(crate) fn decode(mut buf: &[u8]) -> Result<Self, AreaError> {
        let buf = &mut buf;
        use super::codec::get_u16;

        let alias = get_str(buf, MAX_DIR_ALIAS)?;
        let dir_id = get_u32(buf)?;
        let url = get_str(buf, MAX_DIR_URL)?;
        let retrieve_work_dir = get_str(buf, MAX_DIR_URL)?;
        let host_alias = get_str(buf, MAX_HOSTNAME)?;
        let protocol = ProtocolSet::from_bits_truncate(get_u32(buf)?);

        let dir_flag = DirFlags::from_bits_truncate(get_u32(buf)?);
        let bytes_received = get_u64(buf)?;
        let files_received = get_u64(buf)?;
        let files_in_dir = get_u32(buf)?;
        let files_queued = get_u32(buf)?;
        let bytes_in_dir = get_u64(buf)?;
        let bytes_in_queue = get_u64(buf)?;

        let max_process = get_u8(buf)?;
        let no_of_process = get_u8(buf)?;
        let max_copied_files = get_u32(buf)?;
        let max_errors = get_u32(buf)?;
        let error_counter = get_u32(buf)?;

        let last_retrieval = get_i64(buf)?;
        let next_check_time = get_i64(buf)?;
        let warn_time = get_u64(buf)?;
        let keep_connected = get_u32(buf)?;
        let remote_file_check_interval = get_u32(buf)?;
        let start_event_time = get_i64(buf)?;
        let end_event_time = get_i64(buf)?;

        let n = get_u8(buf)? as usize;
        if n > MAX_TIME_ENTRIES {
            return Err(AreaError::Truncated);
        }
        let mut time_entries = Vec::with_capacity(n);
        for _ in 0..n {
            time_entries.push(TimeEntry {
                minute: get_u64(buf)?,
                hour: get_u32(buf)?,
                day_of_month: get_u32(buf)?,
                month: get_u16(buf)?,
                day_of_week: get_u8(buf)?,
            });
        }

        Ok(Self {
            alias,
            dir_id,
            url,
            retrieve_work_dir,
            host_alias,
            protocol,
            dir_flag,
            bytes_received,
            files_received,
            files_in_dir,
            files_queued,
            bytes_in_dir,
            bytes_in_queue,
            max_process,
            no_of_process,
            max_copied_files,
            max_errors,
            error_counter,
            last_retrieval,
            next_check_time,
            warn_time,
            keep_connected,
            remote_file_check_interval,
            start_event_time,
            end_event_time,
            time_entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_codec_round_trip() {
        let mut d = DirRecord::new("obs-in", "ftp://data.example.org/pub");
        d.host_alias = "data-src".into();
        d.protocol = ProtocolSet::FTP | ProtocolSet::RETRIEVE;
        d.time_entries.push(TimeEntry::every_minute());
        d.files_queued = 7;

        let mut buf = Vec::new();
        d.encode(&mut buf);
        assert_eq!(DirRecord::decode(&buf).unwrap(), d);
    }

    #[test]
    fn stopped_blocks_scheduling_but_not_enqueue() {
        let mut d = DirRecord::new("a", "/data/a");
        d.dir_flag |= DirFlags::DIR_STOPPED;
        assert!(!d.accepts_retrieves());
        assert!(d.accepts_enqueue());
    }

    #[test]
    fn disabled_blocks_both() {
        let mut d = DirRecord::new("a", "/data/a");
        d.dir_flag |= DirFlags::DIR_DISABLED;
        assert!(!d.accepts_retrieves());
        assert!(!d.accepts_enqueue());
    }

    #[test]
    fn interval_advance_without_time_entries() {
        let mut d = DirRecord::new("a", "/data/a");
        d.remote_file_check_interval = 300;
        d.advance_next_check(1_700_000_000);
        assert_eq!(d.next_check_time, 1_700_000_300);
    }

    #[test]
    fn every_minute_entry_advances_to_next_boundary() {
        let mut d = DirRecord::new("a", "/data/a");
        d.time_entries.push(TimeEntry::every_minute());
        // 1700000000 is not on a minute boundary (… :33:20).
        d.advance_next_check(1_700_000_000);
        assert_eq!(d.next_check_time, 1_700_000_040);
    }

    #[test]
    fn hourly_entry_matches_minute_zero_only() {
        let mut e = TimeEntry::every_minute();
        e.minute = 1; // only minute 0
        let next = e.next_after(1_700_000_000).unwrap();
        let dt = Utc.timestamp_opt(next, 0).single().unwrap();
        assert_eq!(dt.minute(), 0);
        assert!(next > 1_700_000_000);
    }
}
