//! Exec worker: runs an external command over the files of a message
//! instead of transferring them.
//!
//! The command runs in the spool directory with the host parameters
//! exported. `%s` markers in the command expand to the file name, one
//! invocation per file; with once-only set there is a single
//! invocation and every `%s` expands to the whole quoted list.

use std::path::PathBuf;
use std::process::Command;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::logsink::OutputRecord;
use crate::queue::MsgName;
use crate::status::fsa::ConnectStatus;
use crate::worker::{archive, ExitStatus, WorkerContext, WorkerError};

/// Upper bound on `%s` markers expanded in one command.
pub const MAX_EXEC_FILE_SUBSTITUTION: usize = 10;

pub struct ExecJob {
    pub msg_name: MsgName,
    pub spool_dir: PathBuf,
    pub job_id: u32,
    pub dir_id: u32,
    pub user: String,
    pub archive_time: u32,
    /// Shell command, possibly containing `%s` markers.
    pub command: String,
    /// Run the command once for the whole batch.
    pub once_only: bool,
    pub retries: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    pub invocations: u32,
    pub files_processed: u32,
    pub exit: ExitStatus,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Shell-quotes a file name when it would split or chain commands.
fn quote_name(name: &str) -> String {
    if name.contains(' ') || name.contains(';') {
        format!("\"{name}\"")
    } else {
        name.to_string()
    }
}

/// Expands up to [`MAX_EXEC_FILE_SUBSTITUTION`] `%s` markers; without
/// any marker the argument is appended.
fn build_command_line(template: &str, arg: &str) -> String {
    if !template.contains("%s") {
        return format!("{template} {arg}");
    }
    let mut out = String::with_capacity(template.len() + arg.len());
    let mut rest = template;
    let mut used = 0;
    while let Some(idx) = rest.find("%s") {
        out.push_str(&rest[..idx]);
        if used < MAX_EXEC_FILE_SUBSTITUTION {
            out.push_str(arg);
            used += 1;
        } else {
            out.push_str("%s");
        }
        rest = &rest[idx + 2..];
    }
    out.push_str(rest);
    out
}

pub fn run_exec(ctx: &WorkerContext, job: &ExecJob) -> Result<ExecOutcome, WorkerError> {
    let host = ctx.host_snapshot();
    let files = list_files(job)?;

    ctx.set_connect_status(ConnectStatus::ExecActive)?;
    ctx.update_slot(|s| {
        s.no_of_files = files.len() as u32;
        s.no_of_files_done = 0;
        s.file_size = files.iter().map(|f| f.2 as u64).sum();
        s.file_size_done = 0;
    })?;

    let mut outcome = ExecOutcome::default();
    let env = [
        ("AFD_HC_TIMEOUT", host.transfer_timeout.to_string()),
        ("AFD_HC_BLOCKSIZE", host.transfer_block_size.to_string()),
        (
            "AFD_CURRENT_HOSTNAME",
            host.current_hostname().to_string(),
        ),
    ];

    if job.once_only {
        let joined = files
            .iter()
            .map(|f| quote_name(&f.0))
            .collect::<Vec<_>>()
            .join(" ");
        run_command(ctx, job, &env, &joined)?;
        outcome.invocations = 1;
    } else {
        for (name, _, _) in &files {
            ctx.update_slot(|s| s.file_name_in_use = name.clone())?;
            run_command(ctx, job, &env, &quote_name(name))?;
            outcome.invocations += 1;
        }
    }

    for (name, path, size) in &files {
        let started = Instant::now();
        let archived = archive::archive_file(
            &ctx.archive_root,
            path,
            &job.user,
            &host.alias,
            job.job_id,
            job.archive_time,
            unix_now(),
        )?;
        ctx.logs.write_output(&OutputRecord {
            file_size: *size,
            transfer_time: started.elapsed().as_millis() as i64,
            retries: job.retries,
            job_id: job.job_id,
            unl: job.msg_name.as_str().len() as u16,
            output_type: b'0',
            file_name: name.clone(),
            archive_name: archived
                .as_deref()
                .map(|p| p.to_string_lossy().into_owned()),
        });
        ctx.update_slot(|s| {
            s.no_of_files_done += 1;
            s.file_size_done += *size as u64;
            s.file_name_in_use.clear();
        })?;
        outcome.files_processed += 1;
    }

    let (nfiles, nbytes) = (
        files.len() as u32,
        files.iter().map(|f| f.2 as u64).sum::<u64>(),
    );
    ctx.fsa.update(ctx.fsa_pos, |h| {
        h.sub_outstanding(nfiles, nbytes);
        h.file_counter_done += nfiles as u64;
    })?;

    if let Err(err) = std::fs::remove_dir(&job.spool_dir) {
        debug!(%err, dir = %job.spool_dir.display(), "spool directory not removed");
    }
    outcome.exit = ExitStatus::TransferSuccess;
    info!(
        msg = %job.msg_name,
        invocations = outcome.invocations,
        files = outcome.files_processed,
        "exec job finished"
    );
    Ok(outcome)
}

fn list_files(job: &ExecJob) -> Result<Vec<(String, PathBuf, i64)>, WorkerError> {
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
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

fn run_command(
    ctx: &WorkerContext,
    job: &ExecJob,
    env: &[(&str, String)],
    arg: &str,
) -> Result<(), WorkerError> {
    let line = build_command_line(&job.command, arg);
    debug!(cmd = %line, "running exec command");
    let status = Command::new("sh")
        .arg("-c")
        .arg(&line)
        .current_dir(&job.spool_dir)
        .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
        .status()?;
    if !status.success() {
        warn!(cmd = %line, code = ?status.code(), "exec command failed");
        if let Err(err) = ctx.set_connect_status(ConnectStatus::NotWorking) {
            warn!(err = %err, "slot status not updated after exec failure");
        }
        return Err(WorkerError::Io(std::io::Error::other(format!(
            "command exited with {:?}",
            status.code()
        ))));
    }
    Ok(())
}
