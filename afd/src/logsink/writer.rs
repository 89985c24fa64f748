//! Human-readable log file writer.
//!
//! Each line starts with the event time as 8 lowercase hex digits, a
//! space, then `|`-separated fields and a newline. The format is kept
//! grep/awk friendly on purpose; downstream tooling parses it. A
//! fresh generation opens with the marker line
//! `#!# <date_length> <hostname_length>` so readers can size their
//! fixed columns.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use super::records::{DeleteRecord, DistributionRecord, InputRecord, OutputRecord};
use super::rotation;

/// Hex digits in the leading time column.
pub const DATE_LENGTH: usize = 8;
/// Hostname column width advertised in the generation marker.
pub const HOSTNAME_LENGTH: usize = 16;

/// Default rotation period, seconds.
pub const SWITCH_FILE_TIME: u64 = 3600;

/// Severity signs used by the system log helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Error,
    Warn,
    Info,
    Debug,
    Config,
    Fatal,
}

impl Sign {
    pub fn as_char(self) -> char {
        match self {
            Sign::Error => 'E',
            Sign::Warn => 'W',
            Sign::Info => 'I',
            Sign::Debug => 'D',
            Sign::Config => 'C',
            Sign::Fatal => 'F',
        }
    }
}

/// One operator log file with rotation by time and size.
pub struct LogFile {
    path: PathBuf,
    file: Option<File>,
    max_files: usize,
    max_size: u64,
    written: u64,
    /// Wall-clock second at which the next time-based rotation fires.
    next_switch: i64,
    switch_interval: u64,
}

impl LogFile {
    pub fn open(
        path: PathBuf,
        max_files: usize,
        max_size: u64,
        switch_interval: u64,
        now: i64,
    ) -> io::Result<Self> {
        let mut lf = Self {
            path,
            file: None,
            max_files,
            max_size,
            written: 0,
            next_switch: next_boundary(now, switch_interval),
            switch_interval,
        };
        lf.open_generation()?;
        Ok(lf)
    }

    fn open_generation(&mut self) -> io::Result<()> {
        let existing = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if existing == 0 {
            writeln!(file, "#!# {DATE_LENGTH} {HOSTNAME_LENGTH}")?;
        }
        self.written = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        self.file = Some(file);
        Ok(())
    }

    /// Rotates if the switch boundary has passed or the size cap is
    /// exceeded. Returns whether a rotation happened.
    pub fn maybe_rotate(&mut self, now: i64) -> io::Result<bool> {
        if now < self.next_switch && self.written < self.max_size {
            return Ok(false);
        }
        self.file = None;
        rotation::rotate(&self.path, self.max_files)?;
        self.next_switch = next_boundary(now, self.switch_interval);
        self.open_generation()?;
        Ok(true)
    }

    /// Appends one already formatted line (without trailing newline).
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        if self.file.is_none() {
            self.open_generation()?;
        }
        let file = self.file.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "log file closed")
        })?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        self.written += line.len() as u64 + 1;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        if let Some(f) = self.file.as_mut() {
            f.flush()?;
        }
        Ok(())
    }
}

fn next_boundary(now: i64, interval: u64) -> i64 {
    let iv = interval.max(1) as i64;
    (now / iv + 1) * iv
}

// ============================================================================
// Line formats
// ============================================================================

pub fn format_output_line(now: i64, rec: &OutputRecord) -> String {
    let mut line = format!(
        "{:08x} |{}|{:x}|{}|{}|{:x}|{}",
        now as u32,
        rec.file_name,
        rec.file_size,
        rec.transfer_time,
        rec.retries,
        rec.job_id,
        rec.output_type as char,
    );
    if let Some(a) = &rec.archive_name {
        line.push('|');
        line.push_str(a);
    }
    line
}

pub fn format_input_line(now: i64, rec: &InputRecord) -> String {
    format!(
        "{:08x} |{}|{:x}|{:x}|{:x}",
        now as u32, rec.file_name, rec.file_size, rec.dir_id, rec.unique_number,
    )
}

pub fn format_delete_line(now: i64, rec: &DeleteRecord) -> String {
    format!(
        "{:08x} |{}|{:x}|{:x}|{:x}|{:x}_{:x}_{:x}|{}|{}",
        now as u32,
        rec.file_name,
        rec.file_size,
        rec.job_id,
        rec.dir_id,
        rec.input_time,
        rec.unique_number,
        rec.split_job_counter,
        rec.host_and_reason,
        rec.reason_text,
    )
}

/// Formats a fully assembled distribution message; multi-segment
/// messages arrive here only after reassembly, as one line with every
/// job id concatenated.
pub fn format_distribution_line(now: i64, segments: &[DistributionRecord]) -> String {
    let first = &segments[0];
    let mut jids = String::new();
    for rec in segments {
        for jid in &rec.jid_list {
            if !jids.is_empty() {
                jids.push(',');
            }
            jids.push_str(&format!("{jid:x}"));
        }
    }
    format!(
        "{:08x} |{}|{:x}|{:x}|{:x}|{}|{}",
        now as u32,
        first.file_name,
        first.file_size,
        first.dir_id,
        first.unique_number,
        first.dist_type,
        jids,
    )
}

pub fn format_system_line(now: i64, sign: Sign, text: &str) -> String {
    format!("{:08x} {} {}", now as u32, sign.as_char(), text)
}
