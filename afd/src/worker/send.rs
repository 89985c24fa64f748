//! Send worker: delivers the files of one spool message to a remote
//! host, then loops on the burst link for follow-up jobs over the same
//! connection.

use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::logsink::{DeleteRecord, OutputRecord};
use crate::queue::MsgName;
use crate::status::fsa::{ConnectStatus, DupCheckFlags, HostRecord};
use crate::worker::dupcheck::{compute_crc, DupAction, DupTable};
use crate::worker::{
    archive, ExitStatus, ProtocolSession, SessionError, WorkerContext, WorkerError,
};

/// FSA totals are flushed at most this often, so a long transfer of
/// few large files still surfaces progress while the shared area is
/// not hammered per file.
const LOCK_INTERVAL_TIME: Duration = Duration::from_secs(5);

/// Remote upload convention: dot-prefixed temp name, rename on
/// completion so the receiver never sees a partial file.
const TEMP_PREFIX: char = '.';

/// One message handed to the send worker.
#[derive(Debug, Clone)]
pub struct SendJob {
    pub msg_name: MsgName,
    /// Spool directory holding the files of this message.
    pub spool_dir: PathBuf,
    pub job_id: u32,
    pub dir_id: u32,
    /// Recipient user, kept for the archive subpath.
    pub user: String,
    /// Seconds to keep delivered files in the archive; 0 unlinks them.
    pub archive_time: u32,
    /// Seconds after which undelivered files are dropped; 0 disables.
    pub age_limit: u32,
    pub sort_file_names: bool,
    /// How often this message has been retried already.
    pub retries: u32,
}

/// Burst negotiation with the dispatcher. A finishing worker with a
/// healthy session asks for a follow-up job on the same host; `None`
/// means disconnect.
pub struct BurstLink {
    pub tx: mpsc::Sender<BurstRequest>,
    pub fsa_pos: usize,
    pub slot: usize,
}

pub struct BurstRequest {
    pub fsa_pos: usize,
    pub slot: usize,
    pub reply: oneshot::Sender<Option<SendJob>>,
}

impl BurstLink {
    /// Blocking request for the next job; used from the worker thread.
    fn next_job(&self) -> Option<SendJob> {
        let (reply, rx) = oneshot::channel();
        let req = BurstRequest {
            fsa_pos: self.fsa_pos,
            slot: self.slot,
            reply,
        };
        if self.tx.blocking_send(req).is_err() {
            return None;
        }
        rx.blocking_recv().unwrap_or(None)
    }
}

/// Totals of one worker run, across all burst jobs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SendOutcome {
    pub files_sent: u32,
    pub bytes_sent: u64,
    pub files_deleted: u32,
    pub jobs_done: u32,
    pub exit: ExitStatus,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn file_mtime(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Pending FSA totals, flushed on a LOCK_INTERVAL_TIME clock so the
/// shared area is not hammered per file.
struct PendingTotals {
    files: u32,
    bytes: u64,
    last_flush: Instant,
}

impl PendingTotals {
    fn new() -> Self {
        Self {
            files: 0,
            bytes: 0,
            last_flush: Instant::now(),
        }
    }

    fn book(&mut self, bytes: u64) {
        self.files += 1;
        self.bytes += bytes;
    }

    fn flush(&mut self, ctx: &WorkerContext) -> Result<(), WorkerError> {
        self.last_flush = Instant::now();
        if self.files == 0 && self.bytes == 0 {
            return Ok(());
        }
        let (files, bytes) = (self.files, self.bytes);
        ctx.fsa.update(ctx.fsa_pos, |host| {
            host.sub_outstanding(files, bytes);
            host.file_counter_done += files as u64;
            host.bytes_send += bytes;
        })?;
        self.files = 0;
        self.bytes = 0;
        Ok(())
    }

    fn maybe_flush(&mut self, ctx: &WorkerContext) -> Result<(), WorkerError> {
        if self.last_flush.elapsed() >= LOCK_INTERVAL_TIME {
            self.flush(ctx)?;
        }
        Ok(())
    }
}

/// Runs one send session: the initial job plus any burst follow-ups
/// the dispatcher hands over. The session is already connected; the
/// caller books connect errors before this point.
pub fn run_send(
    ctx: &WorkerContext,
    session: &mut dyn ProtocolSession,
    first: SendJob,
    burst: Option<&BurstLink>,
) -> Result<SendOutcome, WorkerError> {
    let mut outcome = SendOutcome::default();
    let mut job = first;

    loop {
        ctx.set_connect_status(ConnectStatus::TransferActive)?;
        send_one_job(ctx, session, &job, &mut outcome)?;
        outcome.jobs_done += 1;

        let next = match burst {
            Some(link) if session.is_alive() => link.next_job(),
            _ => None,
        };
        match next {
            Some(next_job) => {
                debug!(msg = %next_job.msg_name, "burst continuation");
                ctx.update_slot(|s| {
                    s.job_id = next_job.job_id;
                    s.unique_name = next_job.msg_name.as_str().to_string();
                })?;
                job = next_job;
            }
            None => break,
        }
    }

    ctx.set_connect_status(ConnectStatus::ClosingConnection)?;
    if let Err(err) = session.quit() {
        debug!(%err, "session close failed");
    }
    outcome.exit = ExitStatus::TransferSuccess;
    Ok(outcome)
}

fn send_one_job(
    ctx: &WorkerContext,
    session: &mut dyn ProtocolSession,
    job: &SendJob,
    outcome: &mut SendOutcome,
) -> Result<(), WorkerError> {
    let mut files = list_spool(job)?;
    if job.sort_file_names {
        files.sort_by(|a, b| a.0.cmp(&b.0));
    }

    let host = ctx.host_snapshot();
    let mut dup_table = open_dup_table(ctx, &host, job);
    let mut totals = PendingTotals::new();
    let throttle = host.trl_per_process();

    ctx.update_slot(|s| {
        s.no_of_files = files.len() as u32;
        s.no_of_files_done = 0;
        s.file_size = files.iter().map(|f| f.2 as u64).sum();
        s.file_size_done = 0;
    })?;

    for (name, path, size) in files {
        ctx.check_cancelled()?;
        let now = unix_now();

        if job.age_limit > 0 {
            let mtime = std::fs::metadata(&path).map(|m| file_mtime(&m)).unwrap_or(now);
            if now - mtime > job.age_limit as i64 {
                drop_file(ctx, job, &host, &name, &path, size, "AGE_LIMIT")?;
                outcome.files_deleted += 1;
                totals.book(size as u64);
                totals.maybe_flush(ctx)?;
                continue;
            }
        }

        if let Some(table) = dup_table.as_mut() {
            let crc = compute_crc(host.dup_check_flag, &path, &name, size as u64)?;
            let fixed = host.dup_check_flag.contains(DupCheckFlags::TIMEOUT_IS_FIXED);
            if table.check(crc, now, host.dup_check_timeout, fixed) {
                match DupAction::from_flags(host.dup_check_flag) {
                    Some(DupAction::Delete) | None => {
                        drop_file(ctx, job, &host, &name, &path, size, "DUP")?;
                        outcome.files_deleted += 1;
                        totals.book(size as u64);
                        totals.maybe_flush(ctx)?;
                        continue;
                    }
                    Some(DupAction::Store) => {
                        store_duplicate(ctx, &name, &path)?;
                        totals.book(size as u64);
                        totals.maybe_flush(ctx)?;
                        continue;
                    }
                    Some(DupAction::Warn) => {
                        warn!(host = %host.alias, file = %name, "duplicate file, sending anyway");
                    }
                }
            }
        }

        ctx.update_slot(|s| {
            s.file_name_in_use = name.clone();
            s.file_size_in_use = size as u64;
            s.file_size_in_use_done = 0;
        })?;

        let started = Instant::now();
        let temp = format!("{TEMP_PREFIX}{name}");
        let sent = match session.store(&path, &temp).and_then(|n| {
            session.rename_remote(&temp, &name)?;
            Ok(n)
        }) {
            Ok(n) => n,
            Err(err) => {
                totals.flush(ctx)?;
                if let Some(table) = dup_table.as_mut() {
                    let _ = table.save();
                }
                return Err(flush_failure(ctx, err));
            }
        };

        if throttle > 0 {
            pace(sent, throttle, started.elapsed());
        }

        let archived = archive_step(ctx, job, &host, &path)?;

        let unl = job.msg_name.as_str().len() as u16;
        ctx.logs.write_output(&OutputRecord {
            file_size: size,
            transfer_time: started.elapsed().as_millis() as i64,
            retries: job.retries,
            job_id: job.job_id,
            unl,
            output_type: b'0',
            file_name: name.clone(),
            archive_name: archived
                .as_deref()
                .map(|p| p.to_string_lossy().into_owned()),
        });

        ctx.update_slot(|s| {
            s.file_size_in_use_done = size as u64;
            s.bytes_send += sent;
            s.no_of_files_done += 1;
            s.file_size_done += size as u64;
            s.file_name_in_use.clear();
        })?;

        outcome.files_sent += 1;
        outcome.bytes_sent += sent;
        totals.book(size as u64);
        totals.maybe_flush(ctx)?;
    }

    totals.flush(ctx)?;
    if let Some(table) = dup_table.as_mut() {
        if let Err(err) = table.save() {
            warn!(%err, "duplicate table not saved");
        }
    }

    // The spool directory is empty now; its removal tells the
    // dispatcher the message is gone even if the process dies before
    // reporting.
    if let Err(err) = std::fs::remove_dir(&job.spool_dir) {
        debug!(%err, dir = %job.spool_dir.display(), "spool directory not removed");
    }
    info!(
        msg = %job.msg_name,
        host = %host.alias,
        files = outcome.files_sent,
        bytes = outcome.bytes_sent,
        "message delivered"
    );
    Ok(())
}

fn list_spool(job: &SendJob) -> Result<Vec<(String, PathBuf, i64)>, WorkerError> {
    let rd = std::fs::read_dir(&job.spool_dir)
        .map_err(|_| WorkerError::SpoolMissing(job.spool_dir.clone()))?;
    let mut files = Vec::new();
    for entry in rd {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        files.push((name, entry.path(), meta.len() as i64));
    }
    Ok(files)
}

fn open_dup_table(ctx: &WorkerContext, host: &HostRecord, job: &SendJob) -> Option<DupTable> {
    if !host.dup_check_enabled() {
        return None;
    }
    let table_id = if host.dup_check_flag.contains(DupCheckFlags::USE_RECIPIENT_ID) {
        job.job_id
    } else {
        host.host_id
    };
    match DupTable::open(&ctx.crc_dir, table_id) {
        Ok(t) => Some(t),
        Err(err) => {
            warn!(%err, host = %host.alias, "duplicate table unavailable, check skipped");
            None
        }
    }
}

fn drop_file(
    ctx: &WorkerContext,
    job: &SendJob,
    host: &HostRecord,
    name: &str,
    path: &std::path::Path,
    size: i64,
    reason: &str,
) -> Result<(), WorkerError> {
    std::fs::remove_file(path)?;
    let (input_time, unique_number, split) = job.msg_name.parts().unwrap_or((0, 0, 0));
    ctx.logs.write_delete(&DeleteRecord {
        file_size: size,
        job_id: job.job_id,
        dir_id: job.dir_id,
        input_time,
        split_job_counter: split,
        unique_number,
        host_and_reason: format!("{}+{}", host.alias, reason),
        file_name: name.to_string(),
        reason_text: String::new(),
    });
    Ok(())
}

/// STORE action: the duplicate moves aside into a `.dups` sibling of
/// the spool directory instead of being delivered or lost.
fn store_duplicate(
    ctx: &WorkerContext,
    name: &str,
    path: &std::path::Path,
) -> Result<(), WorkerError> {
    let stored_dir = ctx.archive_root.join(".dups");
    std::fs::create_dir_all(&stored_dir)?;
    std::fs::rename(path, stored_dir.join(name))?;
    Ok(())
}

fn archive_step(
    ctx: &WorkerContext,
    job: &SendJob,
    host: &HostRecord,
    path: &std::path::Path,
) -> Result<Option<PathBuf>, WorkerError> {
    Ok(archive::archive_file(
        &ctx.archive_root,
        path,
        &job.user,
        &host.alias,
        job.job_id,
        job.archive_time,
        unix_now(),
    )?)
}

fn flush_failure(ctx: &WorkerContext, err: SessionError) -> WorkerError {
    if let Err(e) = ctx.set_connect_status(ConnectStatus::NotWorking) {
        warn!(err = %e, "slot status not updated after failure");
    }
    WorkerError::Session(err)
}

/// Sleeps long enough that `bytes` over the whole file respect the
/// per-process rate limit.
fn pace(bytes: u64, limit: u64, elapsed: Duration) {
    let min = Duration::from_secs_f64(bytes as f64 / limit as f64);
    if let Some(rest) = min.checked_sub(elapsed) {
        std::thread::sleep(rest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::area::ActiveArea;
    use crate::status::fsa::JobSlot;
    use crate::worker::local::LocalSession;
    use crate::worker::LogProducers;
    use std::io::Write;
    use std::sync::Arc;

    struct Fixture {
        _tmp: tempfile::TempDir,
        ctx: WorkerContext,
        remote: PathBuf,
        spool: PathBuf,
    }

    fn fixture(host: HostRecord) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let spool = tmp.path().join("spool/3e8_1_0");
        let remote = tmp.path().join("remote");
        std::fs::create_dir_all(&spool).unwrap();
        std::fs::create_dir_all(&remote).unwrap();
        let mut host = host;
        host.active_transfers = 1;
        host.job_status[0] = JobSlot {
            proc_id: 1,
            ..JobSlot::default()
        };
        let fsa =
            Arc::new(ActiveArea::create(tmp.path().join("fsa_stat"), vec![host]).unwrap());
        let ctx = WorkerContext {
            fsa,
            fsa_pos: 0,
            slot: 0,
            archive_root: tmp.path().join("archive"),
            crc_dir: tmp.path().join("crc"),
            logs: LogProducers::disabled(),
            cancel: tokio_util::sync::CancellationToken::new(),
        };
        std::fs::create_dir_all(&ctx.crc_dir).unwrap();
        Fixture {
            _tmp: tmp,
            ctx,
            remote,
            spool,
        }
    }

    fn spool_file(dir: &std::path::Path, name: &str, content: &[u8]) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(content).unwrap();
    }

    fn job(spool: &std::path::Path) -> SendJob {
        SendJob {
            msg_name: MsgName::build(1000, 1, 0),
            spool_dir: spool.to_path_buf(),
            job_id: 0x2a,
            dir_id: 1,
            user: "wmo".into(),
            archive_time: 0,
            age_limit: 0,
            sort_file_names: true,
            retries: 0,
        }
    }

    #[test]
    fn delivers_all_files_and_books_totals() {
        let fx = fixture(HostRecord::new("target", 1));
        spool_file(&fx.spool, "a.txt", b"first");
        spool_file(&fx.spool, "b.txt", b"second");
        // Outstanding totals as the dispatcher would have booked them
        // at enqueue time.
        fx.ctx
            .fsa
            .update(0, |h| {
                h.total_file_counter = 2;
                h.total_file_size = 11;
            })
            .unwrap();

        let mut session = LocalSession::new(&fx.remote);
        let out = run_send(&fx.ctx, &mut session, job(&fx.spool), None).unwrap();

        assert_eq!(out.files_sent, 2);
        assert_eq!(out.bytes_sent, 11);
        assert_eq!(out.exit, ExitStatus::TransferSuccess);
        assert!(fx.remote.join("a.txt").exists());
        assert!(fx.remote.join("b.txt").exists());
        assert!(!fx.spool.exists());

        let host = fx.ctx.host_snapshot();
        assert_eq!(host.total_file_counter, 0);
        assert_eq!(host.total_file_size, 0);
        assert_eq!(host.file_counter_done, 2);
        assert_eq!(host.bytes_send, 11);
        assert_eq!(host.job_status[0].no_of_files_done, 2);
    }

    #[test]
    fn archives_delivered_files_when_requested() {
        let fx = fixture(HostRecord::new("target", 1));
        spool_file(&fx.spool, "keep.txt", b"payload");
        let mut sj = job(&fx.spool);
        sj.archive_time = 3600;

        let mut session = LocalSession::new(&fx.remote);
        run_send(&fx.ctx, &mut session, sj, None).unwrap();

        let mut found = Vec::new();
        for entry in walkdir(&fx.ctx.archive_root) {
            found.push(entry);
        }
        assert!(
            found.iter().any(|p| p.ends_with("keep.txt")),
            "archived copy missing: {found:?}"
        );
    }

    fn walkdir(root: &std::path::Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let Ok(rd) = std::fs::read_dir(&dir) else { continue };
            for entry in rd.flatten() {
                let p = entry.path();
                if p.is_dir() {
                    stack.push(p);
                } else {
                    out.push(p);
                }
            }
        }
        out
    }

    #[test]
    fn duplicate_delete_drops_second_copy() {
        let mut host = HostRecord::new("target", 1);
        host.dup_check_timeout = 3600;
        host.dup_check_flag = DupCheckFlags::FILENAME_ONLY | DupCheckFlags::DELETE;
        let fx = fixture(host);

        spool_file(&fx.spool, "same.txt", b"one");
        let mut session = LocalSession::new(&fx.remote);
        let out = run_send(&fx.ctx, &mut session, job(&fx.spool), None).unwrap();
        assert_eq!(out.files_sent, 1);

        // Same name again in a fresh spool dir.
        std::fs::create_dir_all(&fx.spool).unwrap();
        spool_file(&fx.spool, "same.txt", b"two");
        let out = run_send(&fx.ctx, &mut session, job(&fx.spool), None).unwrap();
        assert_eq!(out.files_sent, 0);
        assert_eq!(out.files_deleted, 1);
    }

    #[test]
    fn age_limit_drops_stale_files() {
        let fx = fixture(HostRecord::new("target", 1));
        spool_file(&fx.spool, "old.txt", b"stale");
        let past = filetime_secs_ago(7200);
        set_mtime(&fx.spool.join("old.txt"), past);
        let mut sj = job(&fx.spool);
        sj.age_limit = 3600;

        let mut session = LocalSession::new(&fx.remote);
        let out = run_send(&fx.ctx, &mut session, sj, None).unwrap();
        assert_eq!(out.files_sent, 0);
        assert_eq!(out.files_deleted, 1);
        assert!(!fx.remote.join("old.txt").exists());
    }

    #[test]
    fn stale_totals_flush_mid_transfer() {
        let fx = fixture(HostRecord::new("target", 1));
        let mut totals = PendingTotals {
            files: 0,
            bytes: 0,
            last_flush: Instant::now() - LOCK_INTERVAL_TIME,
        };
        totals.book(5);
        totals.maybe_flush(&fx.ctx).unwrap();
        let h = fx.ctx.fsa.snapshot(0);
        assert_eq!(h.file_counter_done, 1);
        assert_eq!(h.bytes_send, 5);

        // Freshly flushed: the next file waits for the interval.
        totals.book(3);
        totals.maybe_flush(&fx.ctx).unwrap();
        assert_eq!(fx.ctx.fsa.snapshot(0).bytes_send, 5);
    }

    fn filetime_secs_ago(secs: u64) -> SystemTime {
        SystemTime::now() - Duration::from_secs(secs)
    }

    fn set_mtime(path: &std::path::Path, t: SystemTime) {
        let f = std::fs::File::options().write(true).open(path).unwrap();
        f.set_modified(t).unwrap();
    }

    #[tokio::test]
    async fn burst_link_hands_over_follow_up_job() {
        let fx = fixture(HostRecord::new("target", 2));
        spool_file(&fx.spool, "first.txt", b"aaaa");
        let spool2 = fx.spool.parent().unwrap().join("3e9_2_0");
        std::fs::create_dir_all(&spool2).unwrap();
        spool_file(&spool2, "second.txt", b"bbbbbb");

        let (tx, mut rx) = mpsc::channel::<BurstRequest>(1);
        let follow = SendJob {
            msg_name: MsgName::build(1001, 2, 0),
            spool_dir: spool2,
            ..job(&fx.spool)
        };
        let dispatcher = tokio::spawn(async move {
            let mut next = Some(follow);
            while let Some(req) = rx.recv().await {
                let _ = req.reply.send(next.take());
            }
        });

        let remote = fx.remote.clone();
        let out = tokio::task::spawn_blocking(move || {
            let link = BurstLink {
                tx,
                fsa_pos: 0,
                slot: 0,
            };
            let mut session = LocalSession::new(&remote);
            run_send(&fx.ctx, &mut session, job(&fx.spool), Some(&link))
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(out.jobs_done, 2);
        assert_eq!(out.files_sent, 2);
        dispatcher.abort();
    }
}
