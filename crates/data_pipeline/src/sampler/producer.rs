//! Round-robin shard job production.
//!
//! The producer owns the seeded generator exclusively; no pseudo-random
//! state ever crosses a thread boundary. Given a fixed seed and the sorted
//! root map, the issued job sequence is fully deterministic.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::{send_polling, ShardJob, POLL_INTERVAL};
use crate::cancel::CancelToken;

/// Delay before re-checking when every root's shard list is empty.
const EMPTY_ROOTS_RETRY: Duration = Duration::from_millis(500);

/// Issues an unbounded sequence of [`ShardJob`]s with strictly increasing
/// sequence numbers, cycling over the roots forever. Stops only on
/// cancellation or when the job channel's receivers are gone, and never
/// emits a partial job.
pub(crate) fn run(
    roots: BTreeMap<String, Vec<PathBuf>>,
    seed: u64,
    jobs: Sender<ShardJob>,
    token: CancelToken,
) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut seq: u64 = 0;
    loop {
        if token.is_cancelled() {
            return;
        }
        let order = round_robin_order(&roots, &mut rng);
        if order.is_empty() {
            if !sleep_polling(EMPTY_ROOTS_RETRY, &token) {
                return;
            }
            continue;
        }
        for (root, path) in order {
            if !send_polling(&jobs, ShardJob { seq, root, path }, &token) {
                return;
            }
            seq += 1;
        }
    }
}

/// Builds one cycle's issuance order: a fresh shuffle of every non-empty
/// root's shard list, interleaved by repeatedly taking the head of each
/// root in ascending root-name order until all are exhausted.
///
/// Shuffles consume the shared generator in sorted-root order, so the
/// cycle is a pure function of the seed and the root map.
pub(crate) fn round_robin_order(
    roots: &BTreeMap<String, Vec<PathBuf>>,
    rng: &mut StdRng,
) -> Vec<(String, PathBuf)> {
    let mut queues: Vec<(&str, VecDeque<PathBuf>)> = roots
        .iter()
        .filter(|(_, shards)| !shards.is_empty())
        .map(|(root, shards)| {
            let mut copy = shards.clone();
            copy.shuffle(rng);
            (root.as_str(), VecDeque::from(copy))
        })
        .collect();

    let total = queues.iter().map(|(_, queue)| queue.len()).sum();
    let mut order = Vec::with_capacity(total);
    loop {
        let mut advanced = false;
        for (root, queue) in queues.iter_mut() {
            if let Some(path) = queue.pop_front() {
                order.push(((*root).to_string(), path));
                advanced = true;
            }
        }
        if !advanced {
            break;
        }
    }
    order
}

/// Sleeps `total` in token-polling slices. Returns `false` if cancelled.
fn sleep_polling(total: Duration, token: &CancelToken) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        if token.is_cancelled() {
            return false;
        }
        let step = remaining.min(POLL_INTERVAL);
        thread::sleep(step);
        remaining -= step;
    }
    !token.is_cancelled()
}
