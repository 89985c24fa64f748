//! Integration tests for the dispatch pipeline over a scratch work
//! directory.
//!
//! These tests verify the complete flow including:
//! - Queue acceptance and host totals booking
//! - Delivery with the local scheme and final accounting
//! - Simulation mode completing jobs without moving data
//! - External-command jobs running against the spool

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use afd::dispatcher::{Dispatcher, JobParams, JobTable};
use afd::paths::{self, WorkDir};
use afd::queue::{CacheEntry, MessageCache, MessageQueue, MsgName};
use afd::status::{ActiveArea, DirRecord, HostRecord, HostStatus};

const JOB_ID: u32 = 7;

struct Instance {
    _tmp: TempDir,
    work_dir: WorkDir,
    fsa: Arc<ActiveArea<HostRecord>>,
    fra: Arc<ActiveArea<DirRecord>>,
}

fn scratch_instance(alias: &str) -> Instance {
    let tmp = TempDir::new().unwrap();
    let work_dir = WorkDir::new(tmp.path());
    work_dir.ensure_layout().unwrap();
    let fsa = Arc::new(
        ActiveArea::create(
            work_dir.root().join(paths::FSA_STAT_FILE),
            vec![HostRecord::new(alias, 2)],
        )
        .unwrap(),
    );
    let fra = Arc::new(
        ActiveArea::create(work_dir.root().join(paths::FRA_STAT_FILE), Vec::new()).unwrap(),
    );
    Instance {
        _tmp: tmp,
        work_dir,
        fsa,
        fra,
    }
}

fn spool_message(inst: &Instance, unique: u32, files: &[(&str, &[u8])]) -> CacheEntry {
    let msg_name = MsgName::build(1_700_000_000, unique, 0);
    let spool = inst.work_dir.msg_dir(msg_name.as_str());
    std::fs::create_dir_all(&spool).unwrap();
    let mut bytes = 0u64;
    for (name, content) in files {
        std::fs::write(spool.join(name), content).unwrap();
        bytes += content.len() as u64;
    }
    let mut entry = CacheEntry::new(msg_name, 0, JOB_ID);
    entry.files = files.len() as u32;
    entry.bytes = bytes;
    entry
}

fn dispatcher(inst: &Instance, jobs: JobTable) -> Dispatcher {
    Dispatcher::new(
        inst.work_dir.clone(),
        inst.fsa.clone(),
        inst.fra.clone(),
        jobs,
        10,
        Duration::from_millis(25),
        false,
    )
    .unwrap()
}

/// Polls `cond` until it holds or a generous deadline passes.
async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_delivery_moves_files_and_books_counters() {
    let inst = scratch_instance("alpha");
    let dest = inst._tmp.path().join("dest");

    let mut jobs = JobTable::default();
    jobs.insert(
        JOB_ID,
        JobParams {
            scheme: "loc".to_string(),
            target_dir: dest.to_string_lossy().to_string(),
            ..JobParams::default()
        },
    );

    let entry = spool_message(&inst, 42, &[("a.dat", b"first"), ("b.dat", b"second!")]);
    let spool = inst.work_dir.msg_dir(entry.msg_name.as_str());

    let mut disp = dispatcher(&inst, jobs);
    disp.accept_message(entry).unwrap();
    assert_eq!(inst.fsa.snapshot(0).jobs_queued, 1);
    assert_eq!(inst.fsa.snapshot(0).total_file_counter, 2);

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    let handle = tokio::spawn(async move { disp.run(cancel).await });

    let delivered = wait_for(|| dest.join("a.dat").exists() && dest.join("b.dat").exists()).await;
    assert!(delivered, "files did not arrive in the target directory");

    let settled = wait_for(|| {
        let h = inst.fsa.snapshot(0);
        h.active_transfers == 0 && h.connections == 1
    })
    .await;
    assert!(settled, "host counters did not settle");

    stop.cancel();
    handle.await.unwrap().unwrap();

    let host = inst.fsa.snapshot(0);
    assert_eq!(host.file_counter_done, 2);
    assert_eq!(host.bytes_send, 5 + 8);
    assert_eq!(host.jobs_queued, 0);
    assert_eq!(host.total_file_counter, 0);
    assert_eq!(host.error_counter, 0);
    assert_eq!(std::fs::read(dest.join("b.dat")).unwrap(), b"second!");
    assert!(!spool.exists(), "spool should be cleaned after delivery");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn simulation_completes_without_moving_data() {
    let inst = scratch_instance("shadow");
    let dest = inst._tmp.path().join("dest");

    inst.fsa
        .update(0, |h| h.host_status |= HostStatus::SIMULATE_SEND_MODE)
        .unwrap();

    let mut jobs = JobTable::default();
    jobs.insert(
        JOB_ID,
        JobParams {
            scheme: "loc".to_string(),
            target_dir: dest.to_string_lossy().to_string(),
            ..JobParams::default()
        },
    );

    let entry = spool_message(&inst, 42, &[("x.dat", b"shadow traffic")]);

    let mut disp = dispatcher(&inst, jobs);
    disp.accept_message(entry).unwrap();

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    let handle = tokio::spawn(async move { disp.run(cancel).await });

    let settled = wait_for(|| {
        let h = inst.fsa.snapshot(0);
        h.jobs_queued == 0 && h.file_counter_done == 1
    })
    .await;
    assert!(settled, "simulated job never completed");

    stop.cancel();
    handle.await.unwrap().unwrap();

    let host = inst.fsa.snapshot(0);
    assert_eq!(host.connections, 0, "simulation must not count connections");
    assert_eq!(host.bytes_send, 0, "simulation must not count bytes");
    assert_eq!(host.total_file_counter, 0);
    assert!(!dest.exists(), "no data may leave the spool in simulation");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delivery_survives_simulated_removal_earlier_in_the_cache() {
    let tmp = TempDir::new().unwrap();
    let work_dir = WorkDir::new(tmp.path());
    work_dir.ensure_layout().unwrap();
    let mut shadow = HostRecord::new("shadow", 2);
    shadow.host_status |= HostStatus::SIMULATE_SEND_MODE;
    let fsa = Arc::new(
        ActiveArea::create(
            work_dir.root().join(paths::FSA_STAT_FILE),
            vec![HostRecord::new("live", 2), shadow],
        )
        .unwrap(),
    );
    let fra = Arc::new(
        ActiveArea::create(work_dir.root().join(paths::FRA_STAT_FILE), Vec::new()).unwrap(),
    );

    let dest = tmp.path().join("dest");
    let mut jobs = JobTable::default();
    jobs.insert(
        JOB_ID,
        JobParams {
            scheme: "loc".to_string(),
            target_dir: dest.to_string_lossy().to_string(),
            ..JobParams::default()
        },
    );

    let sim_name = MsgName::build(1_700_000_000, 1, 0);
    let real_name = MsgName::build(1_700_000_000, 2, 0);
    for (name, file) in [(&sim_name, "sim.dat"), (&real_name, "real.dat")] {
        let spool = work_dir.msg_dir(name.as_str());
        std::fs::create_dir_all(&spool).unwrap();
        std::fs::write(spool.join(file), b"payload").unwrap();
    }
    let mut sim = CacheEntry::new(sim_name.clone(), 1, JOB_ID);
    sim.files = 1;
    sim.bytes = 7;
    let mut real = CacheEntry::new(real_name.clone(), 0, JOB_ID);
    real.files = 1;
    real.bytes = 7;

    // Cache order [sim, real] with queue order [real, sim]: the tick
    // consumes the later queue index first, so the simulated removal
    // compacts the cache underneath the planned launch.
    {
        let mut cache = MessageCache::open(work_dir.root().join(paths::MSG_CACHE_FILE)).unwrap();
        let sim_pos = cache.add(sim).unwrap();
        let real_pos = cache.add(real).unwrap();
        let mut queue = MessageQueue::open(work_dir.root().join(paths::MSG_QUEUE_FILE)).unwrap();
        queue.enqueue(real_name.clone(), real_pos as u32).unwrap();
        queue.enqueue(sim_name.clone(), sim_pos as u32).unwrap();
    }

    let mut disp = Dispatcher::new(
        work_dir.clone(),
        fsa.clone(),
        fra,
        jobs,
        10,
        Duration::from_millis(25),
        false,
    )
    .unwrap();
    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    let handle = tokio::spawn(async move { disp.run(cancel).await });

    let delivered = wait_for(|| dest.join("real.dat").exists()).await;
    assert!(delivered, "message after a simulated removal was lost");

    let settled = wait_for(|| fsa.snapshot(0).active_transfers == 0).await;
    assert!(settled);
    stop.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(fsa.snapshot(0).file_counter_done, 1);
    assert_eq!(fsa.snapshot(1).file_counter_done, 1);
    assert!(!work_dir.msg_dir(real_name.as_str()).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn burst_handover_consumes_the_queue_count() {
    let inst = scratch_instance("gts");
    inst.fsa.update(0, |h| h.allowed_transfers = 1).unwrap();
    let dest = inst._tmp.path().join("dest");

    let mut jobs = JobTable::default();
    jobs.insert(
        JOB_ID,
        JobParams {
            scheme: "loc".to_string(),
            target_dir: dest.to_string_lossy().to_string(),
            ..JobParams::default()
        },
    );

    let first = spool_message(&inst, 1, &[("m1.dat", b"aaaa")]);
    let second = spool_message(&inst, 2, &[("m2.dat", b"bb")]);

    let mut disp = dispatcher(&inst, jobs);
    disp.accept_message(first).unwrap();
    disp.accept_message(second).unwrap();
    assert_eq!(inst.fsa.snapshot(0).jobs_queued, 2);

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    let handle = tokio::spawn(async move { disp.run(cancel).await });

    let delivered =
        wait_for(|| dest.join("m1.dat").exists() && dest.join("m2.dat").exists()).await;
    assert!(delivered, "both messages should arrive over one session");

    let settled = wait_for(|| {
        let h = inst.fsa.snapshot(0);
        h.active_transfers == 0 && h.jobs_queued == 0
    })
    .await;
    assert!(settled, "jobs_queued must drain to zero after the burst");

    stop.cancel();
    handle.await.unwrap().unwrap();

    let host = inst.fsa.snapshot(0);
    assert_eq!(host.connections, 1, "a burst is one session");
    assert_eq!(host.file_counter_done, 2);
    assert_eq!(host.jobs_queued, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exec_job_runs_command_and_cleans_spool() {
    let inst = scratch_instance("pipework");
    let marker = inst._tmp.path().join("seen.txt");

    let mut jobs = JobTable::default();
    jobs.insert(
        JOB_ID,
        JobParams {
            scheme: "exec".to_string(),
            exec_command: Some(format!("cat %s >> {}", marker.display())),
            ..JobParams::default()
        },
    );

    let entry = spool_message(&inst, 42, &[("only.dat", b"payload\n")]);
    let spool = inst.work_dir.msg_dir(entry.msg_name.as_str());

    let mut disp = dispatcher(&inst, jobs);
    disp.accept_message(entry).unwrap();

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    let handle = tokio::spawn(async move { disp.run(cancel).await });

    let done = wait_for(|| marker.exists() && !spool.exists()).await;
    assert!(done, "exec job did not run to completion");

    let settled = wait_for(|| inst.fsa.snapshot(0).active_transfers == 0).await;
    assert!(settled);

    stop.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(std::fs::read(&marker).unwrap(), b"payload\n");
    assert_eq!(inst.fsa.snapshot(0).file_counter_done, 1);
}
