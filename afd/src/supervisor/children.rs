//! Supervised task bookkeeping: spawn, watch, restart, quarantine.
//!
//! Each long-lived task runs under a name and a cancellation token.
//! Expected stops (token cancelled) are silent; anything else lands
//! on the exit channel for the supervisor loop, which restarts the
//! task unless it is crash-looping.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::AfdConfig;
use crate::dispatcher::Dispatcher;
use crate::logsink::{
    self, DeleteCodec, DistributionCodec, InputCodec, OutputCodec, SinkCodec,
};
use crate::paths::{self, WorkDir};
use crate::reaper::Reaper;
use crate::status::{ActiveArea, DirRecord, HostRecord};

use super::{build_job_table, SupervisorError};

pub const DISPATCHER: &str = "dispatcher";
pub const REAPER: &str = "archive-reaper";
pub const OUTPUT_SINK: &str = "output-log";
pub const INPUT_SINK: &str = "input-log";
pub const DELETE_SINK: &str = "delete-log";
pub const DISTRIBUTION_SINK: &str = "distribution-log";

/// Sliding window of recent restarts for one task.
#[derive(Debug, Default)]
pub struct RestartTracker {
    restarts: VecDeque<Instant>,
}

impl RestartTracker {
    /// Records a restart; returns true when the rate crosses the
    /// quarantine threshold.
    pub fn record(&mut self, now: Instant, max: u32, window: Duration) -> bool {
        self.restarts.push_back(now);
        while let Some(front) = self.restarts.front() {
            if now.duration_since(*front) > window {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
        self.restarts.len() as u32 >= max
    }
}

pub enum ExitVerdict {
    Restart,
    Quarantined,
}

struct Child {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ChildSet {
    children: HashMap<&'static str, Child>,
    trackers: HashMap<String, RestartTracker>,
    quarantined: HashSet<String>,
    max_restarts: u32,
    restart_window: Duration,
    exit_tx: mpsc::UnboundedSender<String>,
    exit_rx: mpsc::UnboundedReceiver<String>,
}

impl ChildSet {
    pub fn new(max_restarts: u32, restart_window: Duration) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        Self {
            children: HashMap::new(),
            trackers: HashMap::new(),
            quarantined: HashSet::new(),
            max_restarts,
            restart_window,
            exit_tx,
            exit_rx,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.children.keys().copied()
    }

    /// Spawns a task under a name. A previous incarnation under the
    /// same name is forgotten, not stopped.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, make: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let fut = make(cancel.clone());
        let watcher = cancel.clone();
        let tx = self.exit_tx.clone();
        let handle = tokio::spawn(async move {
            fut.await;
            if !watcher.is_cancelled() {
                let _ = tx.send(name.to_string());
            }
        });
        self.children.insert(name, Child { cancel, handle });
    }

    /// Next unexpected task exit.
    pub async fn exited(&mut self) -> Option<String> {
        self.exit_rx.recv().await
    }

    /// Books an unexpected exit; quarantines crash loops.
    pub fn note_exit(&mut self, name: &str) -> ExitVerdict {
        if self.quarantined.contains(name) {
            return ExitVerdict::Quarantined;
        }
        let tracker = self.trackers.entry(name.to_string()).or_default();
        if tracker.record(Instant::now(), self.max_restarts, self.restart_window) {
            self.quarantined.insert(name.to_string());
            ExitVerdict::Quarantined
        } else {
            ExitVerdict::Restart
        }
    }

    pub async fn stop(&mut self, name: &'static str) {
        if let Some(child) = self.children.remove(name) {
            child.cancel.cancel();
            if let Err(err) = child.handle.await {
                debug!(child = name, %err, "task join failed");
            }
        }
    }

    pub async fn stop_all(&mut self) {
        let names: Vec<&'static str> = self.children.keys().copied().collect();
        for name in names {
            self.stop(name).await;
        }
        self.quarantined.clear();
        self.trackers.clear();
    }
}

fn spawn_sink<C>(
    work_dir: &WorkDir,
    config: &AfdConfig,
    children: &mut ChildSet,
    name: &'static str,
    fifo: &'static str,
    log_name: &'static str,
    max_files: usize,
    codec: C,
) -> std::io::Result<()>
where
    C: SinkCodec + Send + 'static,
{
    let fifo_path = work_dir.fifo_file(fifo);
    crate::control::ensure_fifo(&fifo_path)?;
    let file = logsink::open_log_file(
        &work_dir.log_dir(),
        log_name,
        max_files,
        config.log.max_log_file_size,
        config.log.switch_file_time,
    )?;
    children.spawn(name, move |cancel| async move {
        if let Err(err) = logsink::run_sink(fifo_path, file, codec, cancel).await {
            error!(%err, sink = name, "log sink failed");
        }
    });
    Ok(())
}

pub fn start_sinks(
    work_dir: &WorkDir,
    config: &AfdConfig,
    children: &mut ChildSet,
) -> std::io::Result<()> {
    spawn_sink(
        work_dir,
        config,
        children,
        OUTPUT_SINK,
        paths::OUTPUT_LOG_FIFO,
        logsink::OUTPUT_LOG_NAME,
        config.log.max_output_log_files,
        OutputCodec,
    )?;
    spawn_sink(
        work_dir,
        config,
        children,
        INPUT_SINK,
        paths::INPUT_LOG_FIFO,
        logsink::INPUT_LOG_NAME,
        config.log.max_input_log_files,
        InputCodec,
    )?;
    spawn_sink(
        work_dir,
        config,
        children,
        DELETE_SINK,
        paths::DELETE_LOG_FIFO,
        logsink::DELETE_LOG_NAME,
        config.log.max_delete_log_files,
        DeleteCodec,
    )?;
    spawn_sink(
        work_dir,
        config,
        children,
        DISTRIBUTION_SINK,
        paths::DISTRIBUTION_LOG_FIFO,
        logsink::DISTRIBUTION_LOG_NAME,
        config.log.max_distribution_log_files,
        DistributionCodec::new(),
    )?;
    Ok(())
}

pub fn restart_sink(
    work_dir: &WorkDir,
    config: &AfdConfig,
    name: &str,
    children: &mut ChildSet,
) -> std::io::Result<()> {
    match name {
        OUTPUT_SINK => spawn_sink(
            work_dir,
            config,
            children,
            OUTPUT_SINK,
            paths::OUTPUT_LOG_FIFO,
            logsink::OUTPUT_LOG_NAME,
            config.log.max_output_log_files,
            OutputCodec,
        ),
        INPUT_SINK => spawn_sink(
            work_dir,
            config,
            children,
            INPUT_SINK,
            paths::INPUT_LOG_FIFO,
            logsink::INPUT_LOG_NAME,
            config.log.max_input_log_files,
            InputCodec,
        ),
        DELETE_SINK => spawn_sink(
            work_dir,
            config,
            children,
            DELETE_SINK,
            paths::DELETE_LOG_FIFO,
            logsink::DELETE_LOG_NAME,
            config.log.max_delete_log_files,
            DeleteCodec,
        ),
        DISTRIBUTION_SINK => spawn_sink(
            work_dir,
            config,
            children,
            DISTRIBUTION_SINK,
            paths::DISTRIBUTION_LOG_FIFO,
            logsink::DISTRIBUTION_LOG_NAME,
            config.log.max_distribution_log_files,
            DistributionCodec::new(),
        ),
        other => {
            debug!(child = other, "no restart recipe, ignored");
            Ok(())
        }
    }
}

pub fn start_dispatcher(
    work_dir: &WorkDir,
    config: &AfdConfig,
    fsa: &Arc<ActiveArea<HostRecord>>,
    fra: &Arc<ActiveArea<DirRecord>>,
    children: &mut ChildSet,
) -> Result<(), SupervisorError> {
    let jobs = build_job_table(work_dir)?;
    let mut dispatcher = Dispatcher::new(
        work_dir.clone(),
        fsa.clone(),
        fra.clone(),
        jobs,
        config.dispatcher.max_connections,
        Duration::from_millis(config.dispatcher.dispatch_interval_ms),
        true,
    )?;
    children.spawn(DISPATCHER, move |cancel| async move {
        if let Err(err) = dispatcher.run(cancel).await {
            error!(%err, "dispatcher failed");
        }
    });
    Ok(())
}

pub fn start_reaper(work_dir: &WorkDir, config: &AfdConfig, children: &mut ChildSet) {
    let reaper = Reaper::new(
        work_dir,
        Duration::from_secs(config.archive.rescan_interval.max(1)),
        Duration::from_secs(config.archive.report_interval.max(1)),
    );
    children.spawn(REAPER, move |cancel| async move {
        if let Err(err) = reaper.run(cancel).await {
            error!(%err, "archive reaper failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_quarantines_fast_loops() {
        let mut t = RestartTracker::default();
        let now = Instant::now();
        let window = Duration::from_secs(5);
        for _ in 0..19 {
            assert!(!t.record(now, 20, window));
        }
        assert!(t.record(now, 20, window));
    }

    #[test]
    fn tracker_forgets_old_restarts() {
        let mut t = RestartTracker::default();
        let start = Instant::now();
        let window = Duration::from_secs(5);
        assert!(!t.record(start, 2, window));
        // Outside the window the first restart no longer counts.
        assert!(!t.record(start + Duration::from_secs(6), 2, window));
    }

    #[tokio::test]
    async fn expected_stops_do_not_reach_the_exit_channel() {
        let mut set = ChildSet::new(20, Duration::from_secs(5));
        set.spawn("idle", |cancel| async move {
            cancel.cancelled().await;
        });
        set.stop("idle").await;
        assert!(set.children.is_empty());
        assert!(set.exit_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unexpected_exits_are_reported() {
        let mut set = ChildSet::new(20, Duration::from_secs(5));
        set.spawn("flaky", |_cancel| async move {});
        let name = set.exited().await.unwrap();
        assert_eq!(name, "flaky");
        assert!(matches!(set.note_exit(&name), ExitVerdict::Restart));
    }
}
