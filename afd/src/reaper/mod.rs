//! Archive reaper: removes archived files whose retention has run out.
//!
//! The archive tree is `<user>/<host>/<job_id>/<deletion_time>/…`; the
//! leaf directory name alone decides when its content may go. The
//! reaper rescans on an interval, reports its tallies hourly, and
//! answers RETRY (rescan now) and STOP on its command fifo.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::control::{Command, CommandParser};
use crate::paths::{self, WorkDir};

/// Tallies of one or more scan passes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapTally {
    /// Expired leaf directories removed.
    pub archives_removed: u64,
    /// Files inside those directories.
    pub files_removed: u64,
}

impl ReapTally {
    fn add(&mut self, other: ReapTally) {
        self.archives_removed += other.archives_removed;
        self.files_removed += other.files_removed;
    }

    fn is_empty(&self) -> bool {
        self.archives_removed == 0 && self.files_removed == 0
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// One full pass over the archive tree. Expired leaves are removed
/// with their content; emptied parents go too. Leaves with a deletion
/// time in the future are never touched.
pub fn scan_archive(root: &Path, now: i64) -> ReapTally {
    let mut tally = ReapTally::default();
    if !root.is_dir() {
        return tally;
    }
    // user / host / job levels.
    walk_level(root, 3, now, &mut tally);
    tally
}

fn walk_level(dir: &Path, depth: u8, now: i64, tally: &mut ReapTally) {
    let Ok(rd) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in rd.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if depth > 0 {
            walk_level(&path, depth - 1, now, tally);
            remove_if_empty(&path);
        } else {
            reap_leaf(&path, now, tally);
        }
    }
}

fn reap_leaf(leaf: &Path, now: i64, tally: &mut ReapTally) {
    let Some(deletion_time) = leaf
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.parse::<i64>().ok())
    else {
        debug!(dir = %leaf.display(), "foreign directory in archive tree, skipped");
        return;
    };
    if now < deletion_time {
        return;
    }
    let files = count_files(leaf);
    match std::fs::remove_dir_all(leaf) {
        Ok(()) => {
            tally.archives_removed += 1;
            tally.files_removed += files;
            debug!(dir = %leaf.display(), files, "archive removed");
        }
        Err(err) => warn!(%err, dir = %leaf.display(), "archive not removed"),
    }
}

fn count_files(dir: &Path) -> u64 {
    std::fs::read_dir(dir)
        .map(|rd| rd.flatten().filter(|e| e.path().is_file()).count() as u64)
        .unwrap_or(0)
}

fn remove_if_empty(dir: &Path) {
    // Fails with ENOTEMPTY when files remain, which is the point.
    let _ = std::fs::remove_dir(dir);
}

pub struct Reaper {
    archive_root: PathBuf,
    fifo_path: PathBuf,
    rescan_interval: Duration,
    report_interval: Duration,
}

impl Reaper {
    pub fn new(
        work_dir: &WorkDir,
        rescan_interval: Duration,
        report_interval: Duration,
    ) -> Self {
        Self {
            archive_root: work_dir.archive_dir(),
            fifo_path: work_dir.fifo_file(paths::AW_CMD_FIFO),
            rescan_interval,
            report_interval,
        }
    }

    /// Runs until cancelled or a STOP command arrives. The final tally
    /// is always reported on the way out.
    pub async fn run(&self, shutdown: CancellationToken) -> std::io::Result<()> {
        crate::control::ensure_fifo(&self.fifo_path)?;
        let mut fifo_rx = crate::control::open_reader(&self.fifo_path)?;
        let mut parser = CommandParser::new();
        let mut buf = vec![0u8; 256];
        let mut rescan = tokio::time::interval(self.rescan_interval);
        let mut report = tokio::time::interval(self.report_interval);
        report.reset();

        let mut since_report = ReapTally::default();
        let mut total = ReapTally::default();
        info!(root = %self.archive_root.display(), "archive reaper running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = rescan.tick() => {
                    let tally = self.pass().await;
                    since_report.add(tally);
                    total.add(tally);
                }
                _ = report.tick() => {
                    if !since_report.is_empty() {
                        info!(
                            archives = since_report.archives_removed,
                            files = since_report.files_removed,
                            "archive cleanup summary"
                        );
                        since_report = ReapTally::default();
                    }
                }
                ready = fifo_rx.readable() => {
                    if ready.is_ok() {
                        match fifo_rx.try_read(&mut buf) {
                            Ok(0) => tokio::time::sleep(Duration::from_millis(200)).await,
                            Ok(n) => {
                                parser.feed(&buf[..n]);
                                match self.drain_commands(&mut parser, &mut since_report, &mut total).await {
                                    true => {}
                                    false => break,
                                }
                            }
                            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                            Err(err) => warn!(%err, "reaper fifo read failed"),
                        }
                    }
                }
            }
        }

        info!(
            archives = total.archives_removed,
            files = total.files_removed,
            "archive reaper stopped"
        );
        Ok(())
    }

    async fn pass(&self) -> ReapTally {
        let root = self.archive_root.clone();
        let now = unix_now();
        match tokio::task::spawn_blocking(move || scan_archive(&root, now)).await {
            Ok(tally) => tally,
            Err(err) => {
                error!(%err, "archive scan task failed");
                ReapTally::default()
            }
        }
    }

    /// Returns false on STOP.
    async fn drain_commands(
        &self,
        parser: &mut CommandParser,
        since_report: &mut ReapTally,
        total: &mut ReapTally,
    ) -> bool {
        loop {
            match parser.next_command() {
                Ok(Some(Command::Retry)) => {
                    debug!("forced archive rescan");
                    let tally = self.pass().await;
                    since_report.add(tally);
                    total.add(tally);
                }
                Ok(Some(Command::Stop)) => return false,
                Ok(Some(cmd)) => debug!(?cmd, "command ignored on reaper fifo"),
                Ok(None) => return true,
                Err(err) => {
                    warn!(%err, "corrupt reaper fifo input discarded");
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(root: &Path, user: &str, host: &str, job: &str, t: i64) -> PathBuf {
        let dir = root.join(user).join(host).join(job).join(t.to_string());
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn expired_leaves_go_future_leaves_stay() {
        let tmp = tempfile::tempdir().unwrap();
        let old = leaf(tmp.path(), "u", "h", "2a", 1000);
        std::fs::write(old.join("f1"), b"x").unwrap();
        std::fs::write(old.join("f2"), b"y").unwrap();
        let fresh = leaf(tmp.path(), "u", "h", "2a", 9000);
        std::fs::write(fresh.join("f3"), b"z").unwrap();

        let tally = scan_archive(tmp.path(), 5000);
        assert_eq!(tally.archives_removed, 1);
        assert_eq!(tally.files_removed, 2);
        assert!(!old.exists());
        assert!(fresh.join("f3").exists());
    }

    #[test]
    fn emptied_parents_are_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let old = leaf(tmp.path(), "u", "h", "2a", 1000);
        std::fs::write(old.join("f"), b"x").unwrap();

        scan_archive(tmp.path(), 5000);
        assert!(!tmp.path().join("u").exists());
    }

    #[test]
    fn deletion_boundary_is_inclusive() {
        let tmp = tempfile::tempdir().unwrap();
        leaf(tmp.path(), "u", "h", "1", 5000);
        let tally = scan_archive(tmp.path(), 5000);
        assert_eq!(tally.archives_removed, 1);
    }

    #[test]
    fn foreign_names_are_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let odd = tmp.path().join("u/h/1/not-a-time");
        std::fs::create_dir_all(&odd).unwrap();
        std::fs::write(odd.join("f"), b"x").unwrap();

        let tally = scan_archive(tmp.path(), i64::MAX);
        assert_eq!(tally.archives_removed, 0);
        assert!(odd.join("f").exists());
    }

    #[test]
    fn missing_root_is_a_clean_noop() {
        let tally = scan_archive(Path::new("/nonexistent/archive"), 5000);
        assert!(tally.is_empty());
    }
}
