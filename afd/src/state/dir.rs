//! Directory state transitions; the FRA counterpart of [`super::host`].

use tracing::warn;

use crate::status::fra::{DirFlags, DirRecord};

/// Books the result of one directory scan. Hitting the per-scan copy
/// cap latches MAX_COPIED so observers can tell a truncated scan from
/// a complete one; the latch clears on the first scan below the cap.
pub fn record_scan(dir: &mut DirRecord, files_copied: u32, bytes_copied: u64, now: i64) {
    dir.files_received = dir.files_received.saturating_add(files_copied as u64);
    dir.bytes_received = dir.bytes_received.saturating_add(bytes_copied);
    dir.last_retrieval = now;
    if dir.max_copied_files > 0 && files_copied >= dir.max_copied_files {
        if !dir.dir_flag.contains(DirFlags::MAX_COPIED) {
            warn!(dir = %dir.alias, cap = dir.max_copied_files, "scan hit the copy cap");
        }
        dir.dir_flag.insert(DirFlags::MAX_COPIED);
    } else {
        dir.dir_flag.remove(DirFlags::MAX_COPIED);
    }
    dir.advance_next_check(now);
}

/// Books a failed retrieval attempt.
pub fn record_dir_error(dir: &mut DirRecord, now: i64) {
    dir.error_counter = dir.error_counter.saturating_add(1);
    dir.dir_flag.insert(DirFlags::DIR_ERROR_SET);
    dir.advance_next_check(now);
}

pub fn clear_dir_error(dir: &mut DirRecord) {
    dir.error_counter = 0;
    dir.dir_flag.remove(DirFlags::DIR_ERROR_SET);
}

/// Sets WARN_TIME_REACHED once the directory has been silent longer
/// than its warn_time; returns true when newly set.
pub fn check_dir_warn_time(dir: &mut DirRecord, now: i64) -> bool {
    if dir.warn_time == 0
        || dir.last_retrieval == 0
        || dir.dir_flag.contains(DirFlags::WARN_TIME_REACHED)
    {
        return false;
    }
    if now.saturating_sub(dir.last_retrieval) as u64 > dir.warn_time {
        dir.dir_flag.insert(DirFlags::WARN_TIME_REACHED);
        return true;
    }
    false
}
