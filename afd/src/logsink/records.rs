//! Producer record formats for the log fifos.
//!
//! Workers and the dispatcher write these binary records into the
//! output / input / delete / distribution log fifos; the sink side
//! decodes them and renders the human-readable log lines. Every
//! encoded record must stay below the atomic-pipe-write bound so a
//! record is never torn between writers (see
//! [`crate::control::PIPE_BUF`]).
//!
//! Numeric header fields are little-endian and padded so that each
//! field sits at a multiple of its own size, with the header as a
//! whole padded to 8 bytes, the alignment of the widest field type.

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Field separator terminating an output record's name block.
pub const RECORD_SEPARATOR: u8 = b'|';

/// Hard cap on any single decoded string, matching the largest name
/// the rest of the system produces.
const MAX_RECORD_STRING: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record string missing NUL terminator within {MAX_RECORD_STRING} bytes")]
    UnterminatedString,
    #[error("record string is not valid UTF-8")]
    BadUtf8,
    #[error("implausible element count {0} in distribution record")]
    BadCount(u32),
    #[error("output record missing separator terminator")]
    MissingSeparator,
}

/// Decode outcome for a possibly partial fifo read: the record plus
/// the number of bytes it consumed, or `None` when more bytes are
/// needed.
pub type Decoded<T> = Result<Option<(T, usize)>, RecordError>;

fn get_nul_str(buf: &[u8]) -> Result<Option<(String, usize)>, RecordError> {
    match buf.iter().take(MAX_RECORD_STRING + 1).position(|&b| b == 0) {
        Some(n) => {
            let s = std::str::from_utf8(&buf[..n])
                .map_err(|_| RecordError::BadUtf8)?
                .to_string();
            Ok(Some((s, n + 1)))
        }
        None if buf.len() > MAX_RECORD_STRING => Err(RecordError::UnterminatedString),
        None => Ok(None),
    }
}

fn put_nul_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

// ============================================================================
// Output log
// ============================================================================

/// One completed (or finally failed) file transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRecord {
    pub file_size: i64,
    /// Transfer duration in clock ticks.
    pub transfer_time: i64,
    pub retries: u32,
    pub job_id: u32,
    /// Length of the unique-name portion inside `file_name`.
    pub unl: u16,
    /// ASCII digit, '0' for a normal send.
    pub output_type: u8,
    /// Local name, optionally `local_name /remote_name`.
    pub file_name: String,
    /// Archive subpath when the file was archived instead of removed.
    pub archive_name: Option<String>,
}

impl OutputRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.file_name.len() + 2);
        out.put_i64_le(self.file_size);
        out.put_i64_le(self.transfer_time);
        out.put_u32_le(self.retries);
        out.put_u32_le(self.job_id);
        out.put_u16_le(self.unl);
        let archive_len = self.archive_name.as_deref().map_or(0, str::len);
        out.put_u16_le(archive_len as u16);
        out.put_u8(self.output_type);
        out.extend_from_slice(&[0u8; 3]); // pad header to 32
        put_nul_str(&mut out, &self.file_name);
        if let Some(a) = &self.archive_name {
            out.extend_from_slice(a.as_bytes());
        }
        out.push(RECORD_SEPARATOR);
        out
    }

    pub fn decode(buf: &[u8]) -> Decoded<Self> {
        if buf.len() < 32 {
            return Ok(None);
        }
        let mut hdr = &buf[..32];
        let file_size = hdr.get_i64_le();
        let transfer_time = hdr.get_i64_le();
        let retries = hdr.get_u32_le();
        let job_id = hdr.get_u32_le();
        let unl = hdr.get_u16_le();
        let archive_len = hdr.get_u16_le() as usize;
        let output_type = hdr.get_u8();

        let Some((file_name, name_len)) = get_nul_str(&buf[32..])? else {
            return Ok(None);
        };
        let tail = 32 + name_len;
        if buf.len() < tail + archive_len + 1 {
            return Ok(None);
        }
        let archive_name = if archive_len > 0 {
            let raw = &buf[tail..tail + archive_len];
            Some(
                std::str::from_utf8(raw)
                    .map_err(|_| RecordError::BadUtf8)?
                    .to_string(),
            )
        } else {
            None
        };
        if buf[tail + archive_len] != RECORD_SEPARATOR {
            return Err(RecordError::MissingSeparator);
        }
        Ok(Some((
            Self {
                file_size,
                transfer_time,
                retries,
                job_id,
                unl,
                output_type,
                file_name,
                archive_name,
            },
            tail + archive_len + 1,
        )))
    }
}

// ============================================================================
// Input log
// ============================================================================

/// A file observed arriving in a monitored directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRecord {
    pub file_size: i64,
    pub file_time: i64,
    pub dir_id: u32,
    pub unique_number: u32,
    pub file_name: String,
}

impl InputRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24 + self.file_name.len() + 1);
        out.put_i64_le(self.file_size);
        out.put_i64_le(self.file_time);
        out.put_u32_le(self.dir_id);
        out.put_u32_le(self.unique_number);
        put_nul_str(&mut out, &self.file_name);
        out
    }

    pub fn decode(buf: &[u8]) -> Decoded<Self> {
        if buf.len() < 24 {
            return Ok(None);
        }
        let mut hdr = &buf[..24];
        let file_size = hdr.get_i64_le();
        let file_time = hdr.get_i64_le();
        let dir_id = hdr.get_u32_le();
        let unique_number = hdr.get_u32_le();
        let Some((file_name, name_len)) = get_nul_str(&buf[24..])? else {
            return Ok(None);
        };
        Ok(Some((
            Self {
                file_size,
                file_time,
                dir_id,
                unique_number,
                file_name,
            },
            24 + name_len,
        )))
    }
}

// ============================================================================
// Delete log
// ============================================================================

/// A file removed without being delivered, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRecord {
    pub file_size: i64,
    pub job_id: u32,
    pub dir_id: u32,
    pub input_time: i64,
    pub split_job_counter: u32,
    pub unique_number: u32,
    /// `<host>+<reason tag>`, e.g. `wmo-gts+DUP`.
    pub host_and_reason: String,
    pub file_name: String,
    pub reason_text: String,
}

impl DeleteRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.file_name.len() + 32);
        out.put_i64_le(self.file_size);
        out.put_u32_le(self.job_id);
        out.put_u32_le(self.dir_id);
        out.put_i64_le(self.input_time);
        out.put_u32_le(self.split_job_counter);
        out.put_u32_le(self.unique_number);
        put_nul_str(&mut out, &self.host_and_reason);
        out.put_u8(self.file_name.len().min(u8::MAX as usize) as u8);
        put_nul_str(&mut out, &self.file_name);
        put_nul_str(&mut out, &self.reason_text);
        out
    }

    pub fn decode(buf: &[u8]) -> Decoded<Self> {
        if buf.len() < 32 {
            return Ok(None);
        }
        let mut hdr = &buf[..32];
        let file_size = hdr.get_i64_le();
        let job_id = hdr.get_u32_le();
        let dir_id = hdr.get_u32_le();
        let input_time = hdr.get_i64_le();
        let split_job_counter = hdr.get_u32_le();
        let unique_number = hdr.get_u32_le();

        let mut at = 32;
        let Some((host_and_reason, n)) = get_nul_str(&buf[at..])? else {
            return Ok(None);
        };
        at += n;
        if buf.len() < at + 1 {
            return Ok(None);
        }
        at += 1; // file_name_length, informational
        let Some((file_name, n)) = get_nul_str(&buf[at..])? else {
            return Ok(None);
        };
        at += n;
        let Some((reason_text, n)) = get_nul_str(&buf[at..])? else {
            return Ok(None);
        };
        at += n;
        Ok(Some((
            Self {
                file_size,
                job_id,
                dir_id,
                input_time,
                split_job_counter,
                unique_number,
                host_and_reason,
                file_name,
                reason_text,
            },
            at,
        )))
    }
}

// ============================================================================
// Distribution log
// ============================================================================

/// One segment of a distribution decision: which jobs a file was
/// queued for. Messages with `n_segments > 1` are reassembled by
/// [`super::distribution::DistributionHold`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionRecord {
    pub input_time: i64,
    pub file_size: i64,
    pub dir_id: u32,
    pub unique_number: u32,
    pub no_of_dist_types: u32,
    pub dist_type: u8,
    pub n_segments: u8,
    pub segment_no: u8,
    /// Job id per queued job, parallel to `processing`.
    pub jid_list: Vec<u32>,
    pub processing: Vec<u8>,
    pub file_name: String,
}

/// Upper bound on jobs a single file can fan out to; decodes above
/// this are treated as corruption.
const MAX_JOBS_PER_RECORD: u32 = 4096;

impl DistributionRecord {
    pub fn encode(&self) -> Vec<u8> {
        let jobs = self.jid_list.len() as u32;
        let mut out = Vec::with_capacity(32 + self.jid_list.len() * 5 + self.file_name.len() + 4);
        out.put_i64_le(self.input_time);
        out.put_i64_le(self.file_size);
        out.put_u32_le(self.dir_id);
        out.put_u32_le(self.unique_number);
        out.put_u32_le(self.file_name.len() as u32);
        out.put_u32_le(self.no_of_dist_types);
        out.put_u32_le(jobs);
        for jid in &self.jid_list {
            out.put_u32_le(*jid);
        }
        out.put_u8(self.dist_type);
        out.put_u8(self.n_segments);
        out.put_u8(self.segment_no);
        out.extend_from_slice(&self.processing);
        put_nul_str(&mut out, &self.file_name);
        out
    }

    pub fn decode(buf: &[u8]) -> Decoded<Self> {
        if buf.len() < 36 {
            return Ok(None);
        }
        let mut hdr = &buf[..36];
        let input_time = hdr.get_i64_le();
        let file_size = hdr.get_i64_le();
        let dir_id = hdr.get_u32_le();
        let unique_number = hdr.get_u32_le();
        let _filename_length = hdr.get_u32_le();
        let no_of_dist_types = hdr.get_u32_le();
        let jobs_queued = hdr.get_u32_le();
        if jobs_queued > MAX_JOBS_PER_RECORD {
            return Err(RecordError::BadCount(jobs_queued));
        }
        let jobs = jobs_queued as usize;
        let fixed = 36 + jobs * 4 + 3 + jobs;
        if buf.len() < fixed {
            return Ok(None);
        }
        let mut rest = &buf[36..];
        let mut jid_list = Vec::with_capacity(jobs);
        for _ in 0..jobs {
            jid_list.push(rest.get_u32_le());
        }
        let dist_type = rest.get_u8();
        let n_segments = rest.get_u8();
        let segment_no = rest.get_u8();
        let processing = rest[..jobs].to_vec();
        let Some((file_name, name_len)) = get_nul_str(&buf[fixed..])? else {
            return Ok(None);
        };
        Ok(Some((
            Self {
                input_time,
                file_size,
                dir_id,
                unique_number,
                no_of_dist_types,
                dist_type,
                n_segments,
                segment_no,
                jid_list,
                processing,
                file_name,
            },
            fixed + name_len,
        )))
    }

    /// Terminal segment of a multi-segment message, or the only
    /// segment of a single-segment one.
    pub fn is_terminal(&self) -> bool {
        self.segment_no >= self.n_segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_with_archive_round_trips() {
        let rec = OutputRecord {
            file_size: 48_211,
            transfer_time: 122,
            retries: 1,
            job_id: 0xdead_0042,
            unl: 14,
            output_type: b'0',
            file_name: "6552a1b0_3f_0_synop.txt".into(),
            archive_name: Some("wmo/gts/3f/1700000000".into()),
        };
        let bytes = rec.encode();
        assert!(bytes.len() < crate::control::PIPE_BUF);
        let (got, used) = OutputRecord::decode(&bytes).unwrap().unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(got, rec);
    }

    #[test]
    fn output_partial_header_needs_more() {
        let rec = OutputRecord {
            file_size: 1,
            transfer_time: 1,
            retries: 0,
            job_id: 7,
            unl: 0,
            output_type: b'0',
            file_name: "a".into(),
            archive_name: None,
        };
        let bytes = rec.encode();
        for cut in [4, 31, bytes.len() - 1] {
            assert_eq!(OutputRecord::decode(&bytes[..cut]).unwrap(), None);
        }
    }

    #[test]
    fn delete_record_round_trips() {
        let rec = DeleteRecord {
            file_size: 900,
            job_id: 3,
            dir_id: 0x11,
            input_time: 1_700_000_000,
            split_job_counter: 0,
            unique_number: 0x3f,
            host_and_reason: "wmo-gts+PERM".into(),
            file_name: "bulletin.bin".into(),
            reason_text: "file exceeds hard size limit".into(),
        };
        let bytes = rec.encode();
        let (got, used) = DeleteRecord::decode(&bytes).unwrap().unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(got, rec);
    }

    #[test]
    fn input_record_round_trips() {
        let rec = InputRecord {
            file_size: 12,
            file_time: 1_700_000_123,
            dir_id: 9,
            unique_number: 0x7a,
            file_name: "grib2.tmp".into(),
        };
        let bytes = rec.encode();
        let (got, used) = InputRecord::decode(&bytes).unwrap().unwrap();
        assert_eq!((got, used), (rec, bytes.len()));
    }

    #[test]
    fn distribution_record_round_trips_with_job_lists() {
        let rec = DistributionRecord {
            input_time: 1_700_000_500,
            file_size: 4096,
            dir_id: 2,
            unique_number: 0x90,
            no_of_dist_types: 1,
            dist_type: 0,
            n_segments: 3,
            segment_no: 2,
            jid_list: vec![0x10, 0x20, 0x30],
            processing: vec![1, 1, 0],
            file_name: "radar_composite.h5".into(),
        };
        let bytes = rec.encode();
        let (got, used) = DistributionRecord::decode(&bytes).unwrap().unwrap();
        assert_eq!(used, bytes.len());
        assert!(!got.is_terminal());
        assert_eq!(got, rec);
    }

    #[test]
    fn distribution_job_count_is_bounded() {
        let mut bytes = vec![0u8; 36];
        bytes[32..36].copy_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(
            DistributionRecord::decode(&bytes),
            Err(RecordError::BadCount(u32::MAX))
        );
    }

    #[test]
    fn tampered_output_terminator_is_rejected() {
        let rec = OutputRecord {
            file_size: 1,
            transfer_time: 0,
            retries: 0,
            job_id: 1,
            unl: 0,
            output_type: b'0',
            file_name: "x".into(),
            archive_name: None,
        };
        let mut bytes = rec.encode();
        let last = bytes.len() - 1;
        bytes[last] = b'?';
        assert_eq!(
            OutputRecord::decode(&bytes),
            Err(RecordError::MissingSeparator)
        );
    }
}
