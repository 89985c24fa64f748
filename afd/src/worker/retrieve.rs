//! Retrieve worker: pulls files from a remote directory into the
//! local inbox.
//!
//! Files land in the directory's retrieve work dir first and are
//! renamed into the inbox only when complete, so directory scanners
//! never pick up a partial download. With `keep_connected` set the
//! worker re-lists until the remote side is empty or the budget runs
//! out.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::state;
use crate::status::area::ActiveArea;
use crate::status::fra::DirRecord;
use crate::status::fsa::ConnectStatus;
use crate::worker::{ProtocolSession, WorkerContext, WorkerError};

/// Pause between keep-connected re-listings.
const RELIST_DELAY: Duration = Duration::from_secs(5);

/// One remote-directory retrieval.
pub struct RetrieveJob {
    pub fra: Arc<ActiveArea<DirRecord>>,
    pub fra_pos: usize,
    /// Remote directory to list, relative to the login directory.
    pub remote_dir: String,
    /// Scratch directory for in-flight downloads.
    pub work_dir: PathBuf,
    /// Completed files are renamed here.
    pub inbox: PathBuf,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetrieveOutcome {
    pub files_fetched: u32,
    pub bytes_fetched: u64,
    pub passes: u32,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub fn run_retrieve(
    ctx: &WorkerContext,
    session: &mut dyn ProtocolSession,
    job: &RetrieveJob,
) -> Result<RetrieveOutcome, WorkerError> {
    std::fs::create_dir_all(&job.work_dir)?;
    std::fs::create_dir_all(&job.inbox)?;

    let keep_connected = job.fra.snapshot(job.fra_pos).keep_connected;
    let deadline = (keep_connected > 0)
        .then(|| Instant::now() + Duration::from_secs(keep_connected as u64));

    let mut outcome = RetrieveOutcome::default();
    loop {
        ctx.set_connect_status(ConnectStatus::Retrieving)?;
        let (files, bytes) = fetch_pass(ctx, session, job, &mut outcome)?;
        outcome.passes += 1;

        job.fra.update(job.fra_pos, |dir| {
            if files > 0 {
                state::record_scan(dir, files, bytes, unix_now());
                state::clear_dir_error(dir);
            } else {
                dir.last_retrieval = unix_now();
                dir.advance_next_check(unix_now());
            }
        })?;

        match deadline {
            Some(d) if Instant::now() < d && session.is_alive() => {
                if files == 0 {
                    // Nothing new; wait out part of the budget before
                    // asking again.
                    std::thread::sleep(RELIST_DELAY.min(d.saturating_duration_since(Instant::now())));
                }
            }
            _ => break,
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
    }

    ctx.set_connect_status(ConnectStatus::ClosingConnection)?;
    if let Err(err) = session.quit() {
        debug!(%err, "session close failed");
    }
    info!(
        files = outcome.files_fetched,
        bytes = outcome.bytes_fetched,
        passes = outcome.passes,
        "retrieval finished"
    );
    Ok(outcome)
}

/// One list-and-download pass. Returns the files and bytes moved into
/// the inbox.
fn fetch_pass(
    ctx: &WorkerContext,
    session: &mut dyn ProtocolSession,
    job: &RetrieveJob,
    outcome: &mut RetrieveOutcome,
) -> Result<(u32, u64), WorkerError> {
    let listing = session.list(&job.remote_dir)?;
    if listing.is_empty() {
        return Ok((0, 0));
    }

    ctx.update_slot(|s| {
        s.no_of_files = listing.len() as u32;
        s.no_of_files_done = 0;
        s.file_size = listing.iter().map(|e| e.size as i64).sum::<i64>() as u64;
        s.file_size_done = 0;
    })?;

    let mut files = 0u32;
    let mut bytes = 0u64;
    for entry in listing {
        ctx.check_cancelled()?;
        ctx.update_slot(|s| {
            s.file_name_in_use = entry.name.clone();
            s.file_size_in_use = entry.size;
            s.file_size_in_use_done = 0;
        })?;

        let scratch = job.work_dir.join(&entry.name);
        let remote_name = remote_path(&job.remote_dir, &entry.name);
        let got = session.retrieve(&remote_name, &scratch)?;

        // Remove remote first; a crash between unlink and rename
        // leaves the file in the work dir for the next run, never
        // duplicated in the inbox.
        if let Err(err) = session.remove_remote(&remote_name) {
            warn!(%err, file = %entry.name, "remote copy not removed");
        }
        std::fs::rename(&scratch, job.inbox.join(&entry.name))?;

        ctx.update_slot(|s| {
            s.file_size_in_use_done = got;
            s.no_of_files_done += 1;
            s.file_size_done += got;
            s.bytes_send += got;
            s.file_name_in_use.clear();
        })?;

        files += 1;
        bytes += got;
        outcome.files_fetched += 1;
        outcome.bytes_fetched += got;
    }
    Ok((files, bytes))
}

fn remote_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// Books a failed retrieval against the directory record.
pub fn book_retrieve_failure(fra: &ActiveArea<DirRecord>, fra_pos: usize) {
    let result = fra.update(fra_pos, |dir| {
        state::record_dir_error(dir, unix_now());
    });
    if let Err(err) = result {
        warn!(%err, "directory error not booked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::fsa::{HostRecord, JobSlot};
    use crate::worker::local::LocalSession;
    use crate::worker::LogProducers;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &[u8]) {
        std::fs::create_dir_all(dir).unwrap();
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(content).unwrap();
    }

    fn setup() -> (tempfile::TempDir, WorkerContext, RetrieveJob, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let remote = tmp.path().join("remote/data");
        std::fs::create_dir_all(&remote).unwrap();

        let mut host = HostRecord::new("src", 1);
        host.job_status[0] = JobSlot {
            proc_id: 1,
            ..JobSlot::default()
        };
        let fsa =
            Arc::new(ActiveArea::create(tmp.path().join("fsa_stat"), vec![host]).unwrap());
        let fra = Arc::new(
            ActiveArea::create(
                tmp.path().join("fra_stat"),
                vec![DirRecord::new("pull", "ftp://src/data")],
            )
            .unwrap(),
        );
        let ctx = WorkerContext {
            fsa,
            fsa_pos: 0,
            slot: 0,
            archive_root: tmp.path().join("archive"),
            crc_dir: tmp.path().join("crc"),
            logs: LogProducers::disabled(),
            cancel: tokio_util::sync::CancellationToken::new(),
        };
        let job = RetrieveJob {
            fra,
            fra_pos: 0,
            remote_dir: "data".into(),
            work_dir: tmp.path().join("work"),
            inbox: tmp.path().join("inbox"),
        };
        (tmp, ctx, job, remote)
    }

    #[test]
    fn fetches_into_inbox_and_clears_remote() {
        let (tmp, ctx, job, remote) = setup();
        write_file(&remote, "bulletin1", b"abc");
        write_file(&remote, "bulletin2", b"defgh");

        let mut session = LocalSession::new(tmp.path().join("remote"));
        let out = run_retrieve(&ctx, &mut session, &job).unwrap();

        assert_eq!(out.files_fetched, 2);
        assert_eq!(out.bytes_fetched, 8);
        assert!(job.inbox.join("bulletin1").exists());
        assert!(job.inbox.join("bulletin2").exists());
        assert!(!remote.join("bulletin1").exists());

        let dir = job.fra.snapshot(0);
        assert_eq!(dir.files_received, 2);
        assert_eq!(dir.bytes_received, 8);
        assert!(dir.last_retrieval > 0);
    }

    #[test]
    fn empty_remote_still_advances_check_time() {
        let (tmp, ctx, job, _remote) = setup();
        job.fra
            .update(0, |d| d.remote_file_check_interval = 60)
            .unwrap();

        let mut session = LocalSession::new(tmp.path().join("remote"));
        let out = run_retrieve(&ctx, &mut session, &job).unwrap();

        assert_eq!(out.files_fetched, 0);
        let dir = job.fra.snapshot(0);
        assert_eq!(dir.files_received, 0);
        assert!(dir.next_check_time > 0);
    }

    #[test]
    fn failure_booking_sets_error_flag() {
        let (_tmp, _ctx, job, _remote) = setup();
        book_retrieve_failure(&job.fra, 0);
        let dir = job.fra.snapshot(0);
        assert_eq!(dir.error_counter, 1);
        assert!(dir
            .dir_flag
            .contains(crate::status::fra::DirFlags::DIR_ERROR_SET));
    }
}
