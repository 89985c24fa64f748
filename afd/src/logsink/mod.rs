//! Operator log sinks.
//!
//! Producers (workers, dispatcher, the directory scanner) write binary
//! records into per-log fifos; one sink task per log decodes them and
//! appends human-readable `|`-separated lines to the on-disk log file,
//! rotating generations on the switch boundary or the size cap.
//!
//! The sinks are deliberately dumb consumers: framing, formats and
//! rotation live in the submodules and are fully testable without a
//! fifo in the middle.

pub mod distribution;
pub mod records;
pub mod rotation;
pub mod writer;

use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::control;

pub use distribution::DistributionHold;
pub use records::{
    DeleteRecord, DistributionRecord, InputRecord, OutputRecord, RecordError,
};
pub use writer::{LogFile, Sign, SWITCH_FILE_TIME};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("corrupt log record: {0}")]
    Record(#[from] RecordError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Per-log decode and format step. One implementation per log fifo.
pub trait SinkCodec: Send {
    /// Tries to consume one record from the front of `buf`; returns
    /// the formatted lines (possibly none, for held distribution
    /// segments) and the bytes consumed, or `None` when more input is
    /// needed.
    fn consume(&mut self, buf: &[u8], now: i64) -> Result<Option<(Vec<String>, usize)>, RecordError>;

    /// Called on the periodic tick, before rotation.
    fn tick(&mut self, _now: i64) {}
}

pub struct OutputCodec;

impl SinkCodec for OutputCodec {
    fn consume(&mut self, buf: &[u8], now: i64) -> Result<Option<(Vec<String>, usize)>, RecordError> {
        Ok(OutputRecord::decode(buf)?
            .map(|(rec, used)| (vec![writer::format_output_line(now, &rec)], used)))
    }
}

pub struct InputCodec;

impl SinkCodec for InputCodec {
    fn consume(&mut self, buf: &[u8], now: i64) -> Result<Option<(Vec<String>, usize)>, RecordError> {
        Ok(InputRecord::decode(buf)?
            .map(|(rec, used)| (vec![writer::format_input_line(now, &rec)], used)))
    }
}

pub struct DeleteCodec;

impl SinkCodec for DeleteCodec {
    fn consume(&mut self, buf: &[u8], now: i64) -> Result<Option<(Vec<String>, usize)>, RecordError> {
        Ok(DeleteRecord::decode(buf)?
            .map(|(rec, used)| (vec![writer::format_delete_line(now, &rec)], used)))
    }
}

/// Distribution sink: single-segment records become lines at once,
/// multi-segment ones wait in the hold buffer.
pub struct DistributionCodec {
    hold: DistributionHold,
}

impl DistributionCodec {
    pub fn new() -> Self {
        Self {
            hold: DistributionHold::new(),
        }
    }
}

impl Default for DistributionCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkCodec for DistributionCodec {
    fn consume(&mut self, buf: &[u8], now: i64) -> Result<Option<(Vec<String>, usize)>, RecordError> {
        let Some((rec, used)) = DistributionRecord::decode(buf)? else {
            return Ok(None);
        };
        let lines = match self.hold.offer(rec, now) {
            Some(segments) => vec![writer::format_distribution_line(now, &segments)],
            None => Vec::new(),
        };
        Ok(Some((lines, used)))
    }

    fn tick(&mut self, now: i64) {
        self.hold.expire(now);
    }
}

/// Runs one log sink until cancelled. The fifo is reopened when every
/// producer has closed its end, so the sink survives producer churn.
pub async fn run_sink<C: SinkCodec>(
    fifo_path: PathBuf,
    mut file: LogFile,
    mut codec: C,
    cancel: CancellationToken,
) -> Result<(), SinkError> {
    let mut rx = control::open_reader(&fifo_path)?;
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; 4096];
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(1));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                drain(&mut pending, &mut codec, &mut file)?;
                file.flush()?;
                debug!(fifo = %fifo_path.display(), "log sink stopped");
                return Ok(());
            }
            _ = tick.tick() => {
                let now = Utc::now().timestamp();
                codec.tick(now);
                file.maybe_rotate(now)?;
                file.flush()?;
            }
            read = rx.read(&mut chunk) => {
                match read {
                    Ok(0) => {
                        // All writers gone; reattach and wait for the next one.
                        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                        rx = control::open_reader(&fifo_path)?;
                    }
                    Ok(n) => {
                        pending.extend_from_slice(&chunk[..n]);
                        drain(&mut pending, &mut codec, &mut file)?;
                    }
                    Err(err) => {
                        error!(fifo = %fifo_path.display(), %err, "log fifo read failed");
                        return Err(err.into());
                    }
                }
            }
        }
    }
}

fn drain<C: SinkCodec>(
    pending: &mut Vec<u8>,
    codec: &mut C,
    file: &mut LogFile,
) -> Result<(), SinkError> {
    loop {
        let now = Utc::now().timestamp();
        match codec.consume(pending, now) {
            Ok(Some((lines, used))) => {
                pending.drain(..used);
                for line in lines {
                    file.write_line(&line)?;
                }
            }
            Ok(None) => return Ok(()),
            Err(err) => {
                // One bad producer must not wedge the log forever.
                error!(%err, dropped = pending.len(), "discarding corrupt log fifo data");
                pending.clear();
                return Ok(());
            }
        }
    }
}

/// Default log file names under `<work_dir>/log`.
pub const SYSTEM_LOG_NAME: &str = "SYSTEM_LOG";
pub const OUTPUT_LOG_NAME: &str = "OUTPUT_LOG";
pub const INPUT_LOG_NAME: &str = "INPUT_LOG";
pub const DELETE_LOG_NAME: &str = "DELETE_LOG";
pub const DISTRIBUTION_LOG_NAME: &str = "DISTRIBUTION_LOG";

/// Convenience constructor shared by the supervisor's sink spawns.
pub fn open_log_file(
    log_dir: &Path,
    name: &str,
    max_files: usize,
    max_size: u64,
    switch_time: u64,
) -> io::Result<LogFile> {
    LogFile::open(
        log_dir.join(name),
        max_files,
        max_size,
        switch_time,
        Utc::now().timestamp(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sink_renders_records_from_the_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("output_log.fifo");
        control::ensure_fifo(&fifo).unwrap();
        let file = open_log_file(dir.path(), OUTPUT_LOG_NAME, 4, 1 << 20, SWITCH_FILE_TIME).unwrap();
        let cancel = CancellationToken::new();
        let sink = tokio::spawn(run_sink(fifo.clone(), file, OutputCodec, cancel.clone()));

        let mut tx = loop {
            match control::open_writer(&fifo) {
                Ok(tx) => break tx,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };
        let rec = OutputRecord {
            file_size: 77,
            transfer_time: 3,
            retries: 0,
            job_id: 0x42,
            unl: 5,
            output_type: b'0',
            file_name: "msg_one.txt".into(),
            archive_name: None,
        };
        control::write_chunked(&mut tx, &rec.encode()).await.unwrap();
        drop(tx);

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        cancel.cancel();
        sink.await.unwrap().unwrap();

        let text = std::fs::read_to_string(dir.path().join(OUTPUT_LOG_NAME)).unwrap();
        assert!(text.starts_with("#!# 8 16\n"));
        assert!(text.contains("|msg_one.txt|4d|3|0|42|0"));
    }

    #[test]
    fn corrupt_data_is_discarded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open_log_file(dir.path(), DELETE_LOG_NAME, 2, 1 << 20, SWITCH_FILE_TIME).unwrap();
        let mut codec = OutputCodec;
        // 32-byte header, then an unterminated overlong name.
        let mut bad = vec![0u8; 32];
        bad.extend(std::iter::repeat(b'x').take(300));
        let mut pending = bad;
        drain(&mut pending, &mut codec, &mut file).unwrap();
        assert!(pending.is_empty());
    }
}
