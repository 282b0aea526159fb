//! Worker threads: concurrency fan-out over shard jobs.
//!
//! Workers never interpret sample content and never wait for their turn in
//! the output order; re-serialization is the aggregator's job.

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::debug;

use super::{recv_polling, send_polling, ShardCursor, ShardJob};
use crate::cancel::CancelToken;
use crate::webdataset::stream_shard;

/// Pulls jobs until the job channel disconnects or cancellation is raised.
///
/// For each job the worker publishes a [`ShardCursor`] to the aggregator
/// intake before streaming, then fills the cursor's rendezvous sample
/// channel and finally delivers the shard's terminal status. Publishing
/// first lets the aggregator drain this shard while it is still being
/// read.
pub(crate) fn run(
    jobs: Receiver<ShardJob>,
    cursors: Sender<ShardCursor>,
    pending_cap: usize,
    token: CancelToken,
) {
    loop {
        let job = match recv_polling(&jobs, &token) {
            Ok(job) => job,
            Err(_) => return,
        };

        let (sample_tx, sample_rx) = bounded(0);
        let (status_tx, status_rx) = bounded(1);
        let cursor = ShardCursor {
            seq: job.seq,
            samples: sample_rx,
            status: status_rx,
        };
        if !send_polling(&cursors, cursor, &token) {
            return;
        }

        let status = stream_shard(&job.path, pending_cap, &token, |sample| {
            send_polling(&sample_tx, sample, &token)
        });
        if let Err(err) = &status {
            if !err.is_cancellation() {
                debug!(
                    seq = job.seq,
                    root = %job.root,
                    shard = %job.path.display(),
                    error = %err,
                    "shard stream failed"
                );
            }
        }
        // Disconnect the sample channel so the aggregator stops draining,
        // then hand over the terminal status.
        drop(sample_tx);
        let _ = status_tx.try_send(status);
    }
}
