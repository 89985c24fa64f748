//! The `status` command: probe the supervisor, then dump the areas.

use std::time::Duration;

use afd::control::{self, Command, ACKN, ACKN_STOPPED};
use afd::paths::{self, WorkDir};
use afd::status::{AfdStatus, HostRecord, PassiveArea};
use chrono::{Local, TimeZone};
use tokio::io::AsyncReadExt;

use crate::error::CliError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn run(work_dir: &WorkDir) -> Result<(), CliError> {
    println!("Instance: {}", probe(work_dir).await);

    let status_path = work_dir.root().join(paths::AFD_STATUS_FILE);
    if !status_path.exists() {
        println!("No status area; nothing has run in {}.", work_dir.root().display());
        return Ok(());
    }

    let mut status = PassiveArea::<AfdStatus>::attach(status_path)?;
    let s = status.record(0)?;
    println!(
        "Queued jobs: {}   Files sent: {}   Bytes sent: {}",
        s.jobs_in_queue, s.files_send, s.bytes_send
    );
    if s.start_time > 0 {
        println!("Started: {}", format_time(s.start_time));
    }

    let mut fsa = PassiveArea::<HostRecord>::attach(work_dir.root().join(paths::FSA_STAT_FILE))?;
    let hosts = fsa.records()?;
    if hosts.is_empty() {
        return Ok(());
    }

    println!();
    println!(
        "{:<10} {:>7} {:>7} {:>7} {:>10} {:>14}  {}",
        "ALIAS", "ACTIVE", "QUEUED", "ERRORS", "FILES", "BYTES", "LAST CONNECTION"
    );
    for host in &hosts {
        print_host(host);
    }
    Ok(())
}

/// One IS_ALIVE round trip. The response fifo is opened before the
/// probe is sent so the answer cannot slip past us.
async fn probe(work_dir: &WorkDir) -> &'static str {
    let resp = work_dir.fifo_file(paths::AFD_RESP_FIFO);
    let Ok(mut rx) = control::open_reader(&resp) else {
        return "not running";
    };
    let cmd = work_dir.fifo_file(paths::AFD_CMD_FIFO);
    if control::send_command(&cmd, &Command::IsAlive).await.is_err() {
        return "not running";
    }

    let mut byte = [0u8; 1];
    match tokio::time::timeout(PROBE_TIMEOUT, rx.read_exact(&mut byte)).await {
        Ok(Ok(_)) if byte[0] == ACKN => "running",
        Ok(Ok(_)) if byte[0] == ACKN_STOPPED => "stopped (supervisor idle)",
        _ => "no answer",
    }
}

fn print_host(host: &HostRecord) {
    if host.is_group() {
        println!("[{}]", host.alias);
        return;
    }
    println!(
        "{:<10} {:>3}/{:<3} {:>7} {:>7} {:>10} {:>14}  {}",
        host.alias,
        host.active_transfers,
        host.allowed_transfers,
        host.jobs_queued,
        host.error_counter,
        host.file_counter_done,
        host.bytes_send,
        if host.last_connection > 0 {
            format_time(host.last_connection)
        } else {
            "never".to_string()
        }
    );
}

fn format_time(epoch: i64) -> String {
    match Local.timestamp_opt(epoch, 0).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => epoch.to_string(),
    }
}
