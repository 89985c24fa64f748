//! The `queue` command: outstanding messages in dispatch order.

use afd::paths::{self, WorkDir};
use afd::queue::{MessageCache, MessageQueue};
use afd::status::{HostRecord, PassiveArea};

use crate::error::CliError;

pub fn run(work_dir: &WorkDir) -> Result<(), CliError> {
    let queue = MessageQueue::open(work_dir.root().join(paths::MSG_QUEUE_FILE))?;
    let cache = MessageCache::open(work_dir.root().join(paths::MSG_CACHE_FILE))?;

    if queue.len() == 0 {
        println!("Queue is empty.");
        return Ok(());
    }

    // Alias lookup is best effort; the queue is readable without areas.
    let aliases: Vec<String> =
        match PassiveArea::<HostRecord>::attach(work_dir.root().join(paths::FSA_STAT_FILE)) {
            Ok(mut fsa) => fsa
                .records()
                .unwrap_or_default()
                .into_iter()
                .map(|h| h.alias)
                .collect(),
            Err(_) => Vec::new(),
        };

    println!(
        "{:<24} {:<10} {:>6} {:>12} {:>8}  {}",
        "MESSAGE", "HOST", "FILES", "BYTES", "RETRIES", "LAST ERROR"
    );
    for entry in queue.iter() {
        // The persisted position goes stale as the cache compacts, so
        // the entry is resolved by name.
        let Some(meta) = cache
            .position(&entry.msg_name)
            .and_then(|pos| cache.get(pos))
        else {
            println!("{:<24} (no cache entry)", entry.msg_name);
            continue;
        };
        let host = aliases
            .get(meta.fsa_pos as usize)
            .map(String::as_str)
            .unwrap_or("?");
        println!(
            "{:<24} {:<10} {:>6} {:>12} {:>8}  {:?}",
            meta.msg_name,
            host,
            meta.files,
            meta.bytes,
            if meta.last_retry_time > 0 { "yes" } else { "-" },
            meta.last_error
        );
    }
    println!("{} message(s).", queue.len());
    Ok(())
}
