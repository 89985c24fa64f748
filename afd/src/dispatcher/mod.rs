//! The FD: owns the message queue and turns queued messages into
//! running transfer workers.
//!
//! One async loop drives everything: a periodic tick plans launches
//! against a host snapshot, finished workers report back on a
//! channel, workers asking for burst continuation are answered
//! inline, and the delete fifo carries operator commands. Workers
//! themselves are blocking and run on the blocking pool; the loop
//! never blocks on them.

pub mod scheduler;

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::control::{CommandParser, Command};
use crate::logsink::DeleteRecord;
use crate::paths::{self, WorkDir};
use crate::queue::{CacheEntry, MessageCache, MessageQueue, MsgName, QueueError};
use crate::state::{self, TransferResult};
use crate::status::area::ActiveArea;
use crate::status::fra::{DirFlags, DirRecord};
use crate::status::fsa::{HostRecord, JobSlot, ProtocolSet};
use crate::status::AreaError;
use crate::worker::exec::{run_exec, ExecJob};
use crate::worker::ftp::FtpSession;
use crate::worker::local::LocalSession;
use crate::worker::retrieve::{run_retrieve, RetrieveJob};
use crate::worker::send::{run_send, BurstLink, BurstRequest, SendJob};
use crate::worker::sftp::SftpSession;
use crate::worker::{
    LogProducers, ProtocolSession, SessionError, SlotGuard, WorkerContext, WorkerError,
};

pub use scheduler::{plan_tick, Launch, Limits, TickPlan};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Area(#[from] AreaError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Delivery parameters of one job id, resolved from the directory
/// configuration at load time.
#[derive(Debug, Clone, Default)]
pub struct JobParams {
    /// "ftp", "sftp", "loc" or "exec".
    pub scheme: String,
    pub user: String,
    pub password: Option<String>,
    pub key_path: Option<PathBuf>,
    /// Remote target directory, or the local root for loc.
    pub target_dir: String,
    pub archive_time: u32,
    pub age_limit: u32,
    pub sort_file_names: bool,
    pub exec_command: Option<String>,
    pub exec_once: bool,
}

/// job id -> delivery parameters.
#[derive(Debug, Default)]
pub struct JobTable {
    entries: HashMap<u32, JobParams>,
}

impl JobTable {
    pub fn insert(&mut self, job_id: u32, params: JobParams) {
        self.entries.insert(job_id, params);
    }

    pub fn get(&self, job_id: u32) -> Option<&JobParams> {
        self.entries.get(&job_id)
    }
}

/// Report a finished worker sends back to the loop.
struct WorkerDone {
    fsa_pos: usize,
    slot: usize,
    result: Result<(), WorkerError>,
    /// Retrieval bookkeeping needs the FRA position back.
    fra_pos: Option<usize>,
}

struct RunningJob {
    msg_name: MsgName,
    cancel: CancellationToken,
}

pub struct Dispatcher {
    work_dir: WorkDir,
    fsa: Arc<ActiveArea<HostRecord>>,
    fra: Arc<ActiveArea<DirRecord>>,
    queue: MessageQueue,
    cache: MessageCache,
    jobs: JobTable,
    max_connections: u32,
    tick_interval: Duration,
    /// (fsa_pos, slot) -> job currently running there.
    running: HashMap<(usize, usize), RunningJob>,
    active_connections: u32,
    done_tx: mpsc::UnboundedSender<WorkerDone>,
    done_rx: mpsc::UnboundedReceiver<WorkerDone>,
    burst_tx: mpsc::Sender<BurstRequest>,
    burst_rx: mpsc::Receiver<BurstRequest>,
    /// Present when the log sinks are up; workers then write records.
    log_fifos: bool,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl Dispatcher {
    pub fn new(
        work_dir: WorkDir,
        fsa: Arc<ActiveArea<HostRecord>>,
        fra: Arc<ActiveArea<DirRecord>>,
        jobs: JobTable,
        max_connections: u32,
        tick_interval: Duration,
        log_fifos: bool,
    ) -> Result<Self, DispatchError> {
        let queue = MessageQueue::open(work_dir.root().join(paths::MSG_QUEUE_FILE))?;
        let cache = MessageCache::open(work_dir.root().join(paths::MSG_CACHE_FILE))?;
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (burst_tx, burst_rx) = mpsc::channel(32);
        Ok(Self {
            work_dir,
            fsa,
            fra,
            queue,
            cache,
            jobs,
            max_connections,
            tick_interval,
            running: HashMap::new(),
            active_connections: 0,
            done_tx,
            done_rx,
            burst_tx,
            burst_rx,
            log_fifos,
        })
    }

    /// Accepts a new message into the queue and books its outstanding
    /// totals on the host.
    pub fn accept_message(&mut self, entry: CacheEntry) -> Result<(), DispatchError> {
        let fsa_pos = entry.fsa_pos as usize;
        let (files, bytes) = (entry.files, entry.bytes);
        let msg_name = entry.msg_name.clone();
        let pos = self.cache.add(entry)?;
        self.queue.enqueue(msg_name, pos as u32)?;
        self.fsa.update(fsa_pos, |h| {
            h.total_file_counter = h.total_file_counter.saturating_add(files);
            h.total_file_size = h.total_file_size.saturating_add(bytes);
            h.jobs_queued = h.jobs_queued.saturating_add(1);
        })?;
        Ok(())
    }

    /// Main loop; returns when cancelled or a STOP command arrives.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), DispatchError> {
        let delete_fifo = self.work_dir.fifo_file(paths::FD_DELETE_FIFO);
        crate::control::ensure_fifo(&delete_fifo)?;
        let mut fifo_rx = crate::control::open_reader(&delete_fifo)?;
        let mut parser = CommandParser::new();
        let mut fifo_buf = vec![0u8; 4096];
        let mut ticker = tokio::time::interval(self.tick_interval);
        info!(queued = self.queue.len(), "dispatcher running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.tick() {
                        error!(%err, "dispatch tick failed");
                    }
                }
                Some(done) = self.done_rx.recv() => {
                    self.handle_done(done);
                }
                Some(req) = self.burst_rx.recv() => {
                    self.handle_burst(req);
                }
                ready = fifo_rx.readable() => {
                    if ready.is_ok() {
                        match fifo_rx.try_read(&mut fifo_buf) {
                            Ok(0) => tokio::time::sleep(Duration::from_millis(200)).await,
                            Ok(n) => {
                                parser.feed(&fifo_buf[..n]);
                                if !self.drain_commands(&mut parser) {
                                    break;
                                }
                            }
                            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                            Err(err) => warn!(%err, "delete fifo read failed"),
                        }
                    }
                }
            }
        }

        // Let running workers finish their current file, then force.
        for job in self.running.values() {
            job.cancel.cancel();
        }
        info!("dispatcher stopped");
        Ok(())
    }

    /// One scheduling pass plus per-host housekeeping.
    fn tick(&mut self) -> Result<(), DispatchError> {
        let now = unix_now();
        let hosts = self.fsa.snapshot_all();
        let limits = Limits {
            max_connections: self.max_connections,
            active_connections: self.active_connections,
        };
        let plan = plan_tick(&self.queue, &self.cache, &hosts, limits, now);

        // Highest queue indices first so removals do not shift the
        // later ones.
        let mut consumed: Vec<(usize, Option<Launch>)> = plan
            .simulated
            .iter()
            .map(|&qi| (qi, None))
            .chain(plan.launches.into_iter().map(|l| (l.queue_index, Some(l))))
            .collect();
        consumed.sort_by(|a, b| b.0.cmp(&a.0));

        for (queue_index, launch) in consumed {
            let entry = self.queue.remove_at(queue_index)?;
            match launch {
                Some(launch) => self.launch(launch, entry.msg_name)?,
                None => self.complete_simulated(entry.msg_name)?,
            }
        }

        self.housekeeping(now)?;
        self.schedule_retrievals(now)?;
        Ok(())
    }

    fn housekeeping(&mut self, now: i64) -> Result<(), DispatchError> {
        let count = self.fsa.len();
        for pos in 0..count {
            self.fsa.update(pos, |h| {
                state::expire_timed_latches(h, now);
                if state::check_warn_time(h, now) {
                    warn!(host = %h.alias, "host silent past its warn time");
                }
                state::clear_cycle_flags(h);
            })?;
        }

        // Group rows aggregate the members that follow them.
        let hosts = self.fsa.snapshot_all();
        for (pos, host) in hosts.iter().enumerate() {
            if !host.is_group() {
                continue;
            }
            let members: Vec<&HostRecord> = hosts[pos + 1..]
                .iter()
                .take_while(|h| !h.is_group())
                .collect();
            self.fsa.update(pos, |g| {
                state::aggregate_group(g, members.iter().copied());
            })?;
        }

        let dir_count = self.fra.len();
        for pos in 0..dir_count {
            self.fra.update(pos, |d| {
                if state::check_dir_warn_time(d, now) {
                    warn!(dir = %d.alias, "directory silent past its warn time");
                }
            })?;
        }
        Ok(())
    }

    fn complete_simulated(&mut self, msg_name: MsgName) -> Result<(), DispatchError> {
        let Some(pos) = self.cache.position(&msg_name) else {
            return Ok(());
        };
        let (fsa_pos, files, bytes) = {
            let meta = self.cache.get(pos).ok_or(QueueError::BadPosition(pos))?;
            (meta.fsa_pos as usize, meta.files, meta.bytes)
        };
        self.cache.remove(&msg_name)?;
        // Simulation: totals clear and the host looks healthy, but
        // connections and bytes_send stay untouched.
        self.fsa.update(fsa_pos, |h| {
            h.sub_outstanding(files, bytes);
            h.file_counter_done += files as u64;
            h.jobs_queued = h.jobs_queued.saturating_sub(1);
            state::record_success(h, unix_now());
        })?;
        debug!(msg = %msg_name, "completed in simulation mode");
        Ok(())
    }

    fn build_send_job(&self, msg_name: &MsgName, meta: &CacheEntry) -> SendJob {
        let params = self.jobs.get(meta.job_id).cloned().unwrap_or_default();
        SendJob {
            msg_name: msg_name.clone(),
            spool_dir: self.work_dir.msg_dir(msg_name.as_str()),
            job_id: meta.job_id,
            dir_id: meta.dir_id,
            user: params.user,
            archive_time: params.archive_time,
            age_limit: if meta.age_limit > 0 {
                meta.age_limit
            } else {
                params.age_limit
            },
            sort_file_names: params.sort_file_names,
            retries: 0,
        }
    }

    fn worker_context(&self, fsa_pos: usize, slot: usize, cancel: CancellationToken) -> WorkerContext {
        WorkerContext {
            fsa: self.fsa.clone(),
            fsa_pos,
            slot,
            archive_root: self.work_dir.archive_dir(),
            crc_dir: self.work_dir.root().join("crc"),
            logs: self.open_log_producers(),
            cancel,
        }
    }

    fn open_log_producers(&self) -> LogProducers {
        if !self.log_fifos {
            return LogProducers::disabled();
        }
        let open = |name: &str| -> Option<Box<dyn Write + Send>> {
            match std::fs::OpenOptions::new()
                .write(true)
                .open(self.work_dir.fifo_file(name))
            {
                Ok(f) => Some(Box::new(f)),
                Err(err) => {
                    warn!(%err, fifo = name, "log fifo not writable");
                    None
                }
            }
        };
        LogProducers::new(
            open(paths::OUTPUT_LOG_FIFO),
            open(paths::DELETE_LOG_FIFO),
        )
    }

    fn launch(&mut self, launch: Launch, msg_name: MsgName) -> Result<(), DispatchError> {
        // Cache positions shift as earlier consumptions compact the
        // file, so the planned index is stale by now. Resolve by name.
        let Some(meta) = self
            .cache
            .position(&msg_name)
            .and_then(|pos| self.cache.get(pos).cloned())
        else {
            warn!(msg = %msg_name, "message has no cache entry, dropped");
            return Ok(());
        };
        let params = self.jobs.get(meta.job_id).cloned().unwrap_or_default();
        let cancel = CancellationToken::new();
        let key = (launch.fsa_pos, launch.slot);

        self.fsa.update(launch.fsa_pos, |h| {
            if let Some(s) = h.job_status.get_mut(launch.slot) {
                *s = JobSlot {
                    proc_id: next_proc_id(),
                    job_id: meta.job_id,
                    unique_name: msg_name.as_str().to_string(),
                    ..JobSlot::default()
                };
            }
            h.active_transfers += 1;
            h.jobs_queued = h.jobs_queued.saturating_sub(1);
        })?;
        self.active_connections += 1;
        self.running.insert(
            key,
            RunningJob {
                msg_name: msg_name.clone(),
                cancel: cancel.clone(),
            },
        );

        let ctx = self.worker_context(launch.fsa_pos, launch.slot, cancel);
        let job = self.build_send_job(&msg_name, &meta);
        let burst = BurstLink {
            tx: self.burst_tx.clone(),
            fsa_pos: launch.fsa_pos,
            slot: launch.slot,
        };
        let done_tx = self.done_tx.clone();
        let host = self.fsa.snapshot(launch.fsa_pos);
        let is_exec = params.scheme == "exec";

        tokio::task::spawn_blocking(move || {
            let guard = SlotGuard::new(ctx.fsa.clone(), ctx.fsa_pos, ctx.slot);
            let result = if is_exec {
                run_exec_job(&ctx, &job, &params)
            } else {
                run_send_job(&ctx, &host, job, &params, &burst)
            };
            guard.finish();
            let _ = done_tx.send(WorkerDone {
                fsa_pos: ctx.fsa_pos,
                slot: ctx.slot,
                result,
                fra_pos: None,
            });
        });
        Ok(())
    }

    /// A worker asking for a burst implies its previous message is
    /// done; finalize it, then hand over the next compatible one.
    fn handle_burst(&mut self, req: BurstRequest) {
        let key = (req.fsa_pos, req.slot);
        // The worker keeps its original cancel token across bursts.
        let cancel = self
            .running
            .get(&key)
            .map(|j| j.cancel.clone())
            .unwrap_or_default();
        if let Some(prev) = self.running.get(&key) {
            let name = prev.msg_name.clone();
            if let Err(err) = self.finalize_success(req.fsa_pos, &name) {
                warn!(%err, msg = %name, "burst predecessor not finalized");
            }
        }

        let now = unix_now();
        let host = self.fsa.snapshot(req.fsa_pos);
        let next = self.queue.iter().enumerate().find_map(|(qi, entry)| {
            let pos = self.cache.position(&entry.msg_name)?;
            let meta = self.cache.get(pos)?;
            (meta.fsa_pos as usize == req.fsa_pos
                && scheduler::burst_compatible(&host, meta, now))
            .then(|| (qi, entry.msg_name.clone()))
        });

        let handed = next.and_then(|(qi, name)| {
            let entry = self.queue.remove_at(qi).ok()?;
            let pos = self.cache.position(&entry.msg_name)?;
            let meta = self.cache.get(pos)?.clone();
            // The handover consumes a queue entry just like a launch.
            let _ = self.fsa.update(req.fsa_pos, |h| {
                h.jobs_queued = h.jobs_queued.saturating_sub(1);
            });
            let job = self.build_send_job(&name, &meta);
            self.running.insert(
                key,
                RunningJob {
                    msg_name: name,
                    cancel: cancel.clone(),
                },
            );
            Some(job)
        });
        if handed.is_none() {
            self.running.remove(&key);
        }
        let _ = req.reply.send(handed);
    }

    fn handle_done(&mut self, done: WorkerDone) {
        self.active_connections = self.active_connections.saturating_sub(1);
        let key = (done.fsa_pos, done.slot);
        let running = self.running.remove(&key);
        let now = unix_now();

        match done.result {
            Ok(()) => {
                if let Some(job) = running {
                    if let Err(err) = self.finalize_success(done.fsa_pos, &job.msg_name) {
                        warn!(%err, msg = %job.msg_name, "success not finalized");
                    }
                }
                // One session, however many burst jobs it carried.
                let _ = self.fsa.update(done.fsa_pos, |h| {
                    h.connections += 1;
                    state::record_success(h, now);
                });
                if let Some(fra_pos) = done.fra_pos {
                    let _ = self.fra.update(fra_pos, |d| {
                        d.no_of_process = d.no_of_process.saturating_sub(1);
                    });
                }
            }
            Err(err) => {
                let result = classify(&err);
                let permanent = matches!(
                    &err,
                    WorkerError::Session(s) if s.is_permanent()
                );
                let cancelled = matches!(err, WorkerError::Cancelled);
                warn!(fsa_pos = done.fsa_pos, %err, "worker failed");
                // A permanent error condemns the job, not the host, and
                // an operator kill condemns neither: error history and
                // counters stay untouched for both.
                if !permanent && !cancelled {
                    let _ = self.fsa.update(done.fsa_pos, |h| {
                        let out = state::record_failure(h, result, now);
                        if out.entered_not_working && h.auto_toggle {
                            h.toggle_host();
                        }
                    });
                }
                if let Some(fra_pos) = done.fra_pos {
                    let _ = self.fra.update(fra_pos, |d| {
                        d.no_of_process = d.no_of_process.saturating_sub(1);
                        state::record_dir_error(d, now);
                    });
                }
                if let Some(job) = running {
                    if permanent || cancelled {
                        if permanent {
                            self.log_permanent_drop(&job.msg_name);
                        }
                        if let Err(e) = self.discard_message(&job.msg_name) {
                            warn!(err = %e, msg = %job.msg_name, "message not discarded");
                        }
                    } else if let Err(e) = self.requeue_failed(&job.msg_name, result, now) {
                        warn!(err = %e, msg = %job.msg_name, "message not requeued");
                    }
                }
            }
        }
    }

    fn finalize_success(&mut self, fsa_pos: usize, msg_name: &MsgName) -> Result<(), DispatchError> {
        if self.cache.position(msg_name).is_some() {
            self.cache.remove(msg_name)?;
        }
        let _ = fsa_pos;
        Ok(())
    }

    fn requeue_failed(
        &mut self,
        msg_name: &MsgName,
        result: TransferResult,
        now: i64,
    ) -> Result<(), DispatchError> {
        let Some(pos) = self.cache.position(msg_name) else {
            return Ok(());
        };
        let fsa_pos = self
            .cache
            .get(pos)
            .map(|e| e.fsa_pos as usize)
            .ok_or(QueueError::BadPosition(pos))?;
        self.cache.update(pos, |e| {
            e.last_error = crate::queue::LastError::from_u8(result as u8);
            e.last_retry_time = now;
        })?;
        self.queue.enqueue(msg_name.clone(), pos as u32)?;
        // Back in the queue, back in the backlog count.
        self.fsa.update(fsa_pos, |h| {
            h.jobs_queued += 1;
        })?;
        Ok(())
    }

    /// Books whatever files a permanently failed message still holds
    /// into the delete log before the spool is torn down.
    fn log_permanent_drop(&self, msg_name: &MsgName) {
        let Some(pos) = self.cache.position(msg_name) else {
            return;
        };
        let Some(meta) = self.cache.get(pos) else {
            return;
        };
        let fsa_pos = meta.fsa_pos as usize;
        if fsa_pos >= self.fsa.len() {
            return;
        }
        let alias = self.fsa.snapshot(fsa_pos).alias;
        let (input_time, unique_number, split) = msg_name.parts().unwrap_or((0, 0, 0));
        let logs = self.open_log_producers();
        let spool = self.work_dir.msg_dir(msg_name.as_str());
        let Ok(entries) = std::fs::read_dir(&spool) else {
            return;
        };
        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let size = entry.metadata().map(|m| m.len() as i64).unwrap_or(0);
            logs.write_delete(&DeleteRecord {
                file_size: size,
                job_id: meta.job_id,
                dir_id: meta.dir_id,
                input_time,
                split_job_counter: split,
                unique_number,
                host_and_reason: format!("{}+PERM", alias),
                file_name: entry.file_name().to_string_lossy().into_owned(),
                reason_text: String::new(),
            });
        }
    }

    /// Drops a message entirely: cache entry, outstanding totals and
    /// spool directory.
    fn discard_message(&mut self, msg_name: &MsgName) -> Result<(), DispatchError> {
        if let Some(pos) = self.cache.position(msg_name) {
            let (fsa_pos, files, bytes) = {
                let meta = self.cache.get(pos).ok_or(QueueError::BadPosition(pos))?;
                (meta.fsa_pos as usize, meta.files, meta.bytes)
            };
            self.cache.remove(msg_name)?;
            self.fsa.update(fsa_pos, |h| {
                h.sub_outstanding(files, bytes);
            })?;
        }
        let spool = self.work_dir.msg_dir(msg_name.as_str());
        if spool.exists() {
            std::fs::remove_dir_all(&spool)?;
        }
        Ok(())
    }

    /// Launches retrieval workers for directories whose check time has
    /// come.
    fn schedule_retrievals(&mut self, now: i64) -> Result<(), DispatchError> {
        let dirs = self.fra.snapshot_all();
        for (fra_pos, dir) in dirs.iter().enumerate() {
            if !dir.protocol.contains(ProtocolSet::RETRIEVE)
                || dir
                    .dir_flag
                    .intersects(DirFlags::DIR_STOPPED | DirFlags::DIR_DISABLED)
                || dir.next_check_time > now
                || (dir.max_process > 0 && dir.no_of_process >= dir.max_process)
                || self.active_connections >= self.max_connections
            {
                continue;
            }
            let Some(fsa_pos) = self.fsa.position(&dir.host_alias) else {
                continue;
            };
            let host = self.fsa.snapshot(fsa_pos);
            if !host.accepts_transfers()
                || host.active_transfers >= host.allowed_transfers
            {
                continue;
            }
            let Some(slot) = host.free_slot() else { continue };
            self.launch_retrieve(fra_pos, dir, fsa_pos, slot)?;
        }
        Ok(())
    }

    fn launch_retrieve(
        &mut self,
        fra_pos: usize,
        dir: &DirRecord,
        fsa_pos: usize,
        slot: usize,
    ) -> Result<(), DispatchError> {
        let cancel = CancellationToken::new();
        self.fsa.update(fsa_pos, |h| {
            if let Some(s) = h.job_status.get_mut(slot) {
                *s = JobSlot {
                    proc_id: next_proc_id(),
                    ..JobSlot::default()
                };
            }
            h.active_transfers += 1;
        })?;
        self.fra.update(fra_pos, |d| {
            d.no_of_process += 1;
            d.advance_next_check(unix_now());
        })?;
        self.active_connections += 1;

        let ctx = self.worker_context(fsa_pos, slot, cancel.clone());
        let host = self.fsa.snapshot(fsa_pos);
        let params = JobParams {
            scheme: scheme_of(dir.protocol),
            user: String::new(),
            target_dir: remote_dir_of(&dir.url),
            ..JobParams::default()
        };
        let job = RetrieveJob {
            fra: self.fra.clone(),
            fra_pos,
            remote_dir: params.target_dir.clone(),
            work_dir: if dir.retrieve_work_dir.is_empty() {
                self.work_dir.root().join("retrieve").join(&dir.alias)
            } else {
                PathBuf::from(&dir.retrieve_work_dir)
            },
            inbox: self.work_dir.incoming_dir(),
        };
        self.running.insert(
            (fsa_pos, slot),
            RunningJob {
                msg_name: MsgName::build(unix_now(), dir.dir_id, 0),
                cancel,
            },
        );
        let done_tx = self.done_tx.clone();

        tokio::task::spawn_blocking(move || {
            let guard = SlotGuard::new(ctx.fsa.clone(), ctx.fsa_pos, ctx.slot);
            let result = connect_session(&host, &params)
                .map_err(WorkerError::from)
                .and_then(|mut session| {
                    run_retrieve(&ctx, session.as_mut(), &job).map(|_| ())
                });
            guard.finish();
            let _ = done_tx.send(WorkerDone {
                fsa_pos: ctx.fsa_pos,
                slot: ctx.slot,
                result,
                fra_pos: Some(job.fra_pos),
            });
        });
        Ok(())
    }

    /// Operator commands from the delete fifo. Returns false on STOP.
    fn drain_commands(&mut self, parser: &mut CommandParser) -> bool {
        loop {
            match parser.next_command() {
                Ok(Some(Command::DeleteMessage(name))) => {
                    self.delete_message(&name);
                }
                Ok(Some(Command::DeleteRetrievesFromDir(alias))) => {
                    self.delete_retrieves(&alias);
                }
                Ok(Some(Command::ForceRemoteDirCheck)) => {
                    self.force_remote_dir_check();
                }
                Ok(Some(Command::Retry)) => {
                    self.clear_backoffs();
                }
                Ok(Some(Command::Stop)) => return false,
                Ok(Some(cmd)) => debug!(?cmd, "command ignored on delete fifo"),
                Ok(None) => return true,
                Err(err) => {
                    warn!(%err, "corrupt delete fifo input discarded");
                    return true;
                }
            }
        }
    }

    fn delete_message(&mut self, name: &str) {
        let Ok(msg_name) = MsgName::parse(name) else {
            warn!(name, "delete for malformed message name ignored");
            return;
        };
        // Running job: cancel it; the exit handler books the rest.
        if let Some(job) = self
            .running
            .values()
            .find(|j| j.msg_name == msg_name)
        {
            info!(msg = %msg_name, "cancelling running job");
            job.cancel.cancel();
            return;
        }
        if self.queue.remove_by_name(&msg_name).is_ok() {
            if let Some(fsa_pos) = self
                .cache
                .position(&msg_name)
                .and_then(|p| self.cache.get(p))
                .map(|e| e.fsa_pos as usize)
            {
                let _ = self.fsa.update(fsa_pos, |h| {
                    h.jobs_queued = h.jobs_queued.saturating_sub(1);
                });
            }
            if let Err(err) = self.discard_message(&msg_name) {
                warn!(%err, msg = %msg_name, "queued message not discarded");
            } else {
                info!(msg = %msg_name, "queued message deleted");
            }
        }
    }

    fn delete_retrieves(&mut self, alias: &str) {
        let Some(fra_pos) = self.fra.position(alias) else {
            warn!(alias, "delete retrieves for unknown directory");
            return;
        };
        let dir_id = self.fra.snapshot(fra_pos).dir_id;
        let names: Vec<MsgName> = self
            .cache
            .retrieves_for_dir(dir_id)
            .into_iter()
            .filter_map(|pos| self.cache.get(pos).map(|e| e.msg_name.clone()))
            .collect();
        for name in names {
            let _ = self.queue.remove_by_name(&name);
            if let Err(err) = self.discard_message(&name) {
                warn!(%err, msg = %name, "retrieve not discarded");
            }
        }
        info!(alias, "outstanding retrievals deleted");
    }

    fn force_remote_dir_check(&mut self) {
        let now = unix_now();
        for pos in 0..self.fra.len() {
            let _ = self.fra.update(pos, |d| {
                if d.protocol.contains(ProtocolSet::RETRIEVE) {
                    d.next_check_time = now;
                }
            });
        }
        debug!("remote directory checks forced");
    }

    fn clear_backoffs(&mut self) {
        let positions: Vec<usize> = (0..self.cache.len()).collect();
        for pos in positions {
            let _ = self.cache.update(pos, |e| {
                e.last_retry_time = 0;
            });
        }
        debug!("retry back-offs cleared");
    }
}

/// Worker-side send path: connect, deliver, burst.
fn run_send_job(
    ctx: &WorkerContext,
    host: &HostRecord,
    job: SendJob,
    params: &JobParams,
    burst: &BurstLink,
) -> Result<(), WorkerError> {
    ctx.set_connect_status(crate::status::fsa::ConnectStatus::Connecting)?;
    let mut session = connect_session(host, params)?;
    run_send(ctx, session.as_mut(), job, Some(burst))?;
    Ok(())
}

fn run_exec_job(
    ctx: &WorkerContext,
    job: &SendJob,
    params: &JobParams,
) -> Result<(), WorkerError> {
    let exec = ExecJob {
        msg_name: job.msg_name.clone(),
        spool_dir: job.spool_dir.clone(),
        job_id: job.job_id,
        dir_id: job.dir_id,
        user: job.user.clone(),
        archive_time: job.archive_time,
        command: params.exec_command.clone().unwrap_or_default(),
        once_only: params.exec_once,
        retries: job.retries,
    };
    run_exec(ctx, &exec)?;
    Ok(())
}

/// Opens a protocol session for the job's scheme.
pub fn connect_session(
    host: &HostRecord,
    params: &JobParams,
) -> Result<Box<dyn ProtocolSession>, SessionError> {
    match params.scheme.as_str() {
        "ftp" => Ok(Box::new(FtpSession::connect(
            host,
            &params.user,
            params.password.as_deref().unwrap_or(""),
        )?)),
        "sftp" => Ok(Box::new(SftpSession::connect(
            host,
            &params.user,
            params.password.as_deref(),
            params.key_path.as_deref(),
        )?)),
        "loc" | "" => Ok(Box::new(LocalSession::new(&params.target_dir))),
        other => Err(SessionError::Protocol(format!(
            "unsupported scheme {other}"
        ))),
    }
}

fn classify(err: &WorkerError) -> TransferResult {
    match err {
        WorkerError::Session(s) => s.result_class(),
        WorkerError::Cancelled => TransferResult::Killed,
        _ => TransferResult::PartialTransfer,
    }
}

/// Everything after the host part of a retrieval URL.
fn remote_dir_of(url: &str) -> String {
    url.split_once("://")
        .and_then(|(_, rest)| rest.split_once('/'))
        .map(|(_, path)| path.to_string())
        .unwrap_or_default()
}

fn scheme_of(protocol: ProtocolSet) -> String {
    if protocol.contains(ProtocolSet::SFTP) {
        "sftp".into()
    } else if protocol.contains(ProtocolSet::FTP) {
        "ftp".into()
    } else {
        "loc".into()
    }
}

/// Worker identifiers are process-unique, never zero (zero marks a
/// free slot).
fn next_proc_id() -> u32 {
    use std::sync::atomic::{AtomicU32, Ordering};
    static NEXT: AtomicU32 = AtomicU32::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::fsa::HostStatus;

    #[test]
    fn operator_cancel_leaves_the_host_state_machine_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let work_dir = WorkDir::new(tmp.path());
        work_dir.ensure_layout().unwrap();
        let fsa = Arc::new(
            ActiveArea::create(
                work_dir.root().join(paths::FSA_STAT_FILE),
                vec![HostRecord::new("live", 2)],
            )
            .unwrap(),
        );
        let fra = Arc::new(
            ActiveArea::create(work_dir.root().join(paths::FRA_STAT_FILE), Vec::new()).unwrap(),
        );
        let mut disp = Dispatcher::new(
            work_dir.clone(),
            fsa.clone(),
            fra,
            JobTable::default(),
            4,
            Duration::from_millis(25),
            false,
        )
        .unwrap();

        let msg_name = MsgName::build(1000, 9, 0);
        let spool = work_dir.msg_dir(msg_name.as_str());
        std::fs::create_dir_all(&spool).unwrap();
        std::fs::write(spool.join("f.dat"), b"x").unwrap();
        let mut entry = CacheEntry::new(msg_name.clone(), 0, 1);
        entry.files = 1;
        entry.bytes = 1;
        disp.accept_message(entry).unwrap();

        // Put the message into the running state by hand.
        disp.queue.remove_at(0).unwrap();
        disp.running.insert(
            (0, 0),
            RunningJob {
                msg_name: msg_name.clone(),
                cancel: CancellationToken::new(),
            },
        );
        disp.active_connections = 1;

        disp.handle_done(WorkerDone {
            fsa_pos: 0,
            slot: 0,
            result: Err(WorkerError::Cancelled),
            fra_pos: None,
        });

        let h = fsa.snapshot(0);
        assert_eq!(h.error_counter, 0);
        assert_eq!(h.total_errors, 0);
        assert!(!h.host_status.contains(HostStatus::AUTO_PAUSE_QUEUE));
        assert_eq!(h.total_file_counter, 0);
        assert!(!spool.exists());
        assert!(disp.cache.position(&msg_name).is_none());
    }

    #[test]
    fn remote_dir_extraction() {
        assert_eq!(remote_dir_of("ftp://server/pub/data"), "pub/data");
        assert_eq!(remote_dir_of("ftp://server"), "");
        assert_eq!(remote_dir_of("plain"), "");
    }

    #[test]
    fn proc_ids_are_unique_and_nonzero() {
        let a = next_proc_id();
        let b = next_proc_id();
        assert_ne!(a, 0);
        assert_ne!(a, b);
    }
}
