//! Fan-in: restores issuance order on the sample stream.
//!
//! Cursors arrive in completion order, which under concurrent workers is
//! unrelated to sequence order. The aggregator buffers them by sequence
//! number and drains only the next expected one, so the consumer sees
//! samples in the order jobs were issued. The buffer holds at
//! most roughly one cursor per worker: a worker cannot publish a second
//! cursor until its first was accepted, and the intake channel is bounded.

use std::collections::HashMap;

use crossbeam_channel::{Receiver, Sender};
use tracing::warn;

use super::{recv_polling, send_polling, RecvStop, ShardCursor};
use crate::cancel::CancelToken;
use crate::error::PipelineError;
use crate::webdataset::Sample;

/// Runs until cancellation, a fatal shard error, or intake disconnect.
///
/// The first non-cancellation shard error is forwarded on `errors` and
/// halts the stream; cancellation statuses and clean completions advance
/// to the next sequence number. The caller cancels the shared token when
/// this returns, which tears down the rest of the pipeline.
pub(crate) fn run(
    cursors: Receiver<ShardCursor>,
    out: Sender<Sample>,
    errors: Sender<PipelineError>,
    token: CancelToken,
) {
    let mut buffered: HashMap<u64, ShardCursor> = HashMap::new();
    let mut next_seq: u64 = 0;

    loop {
        let cursor = match buffered.remove(&next_seq) {
            Some(cursor) => cursor,
            None => match recv_polling(&cursors, &token) {
                Ok(cursor) => {
                    buffered.insert(cursor.seq, cursor);
                    continue;
                }
                Err(_) => return,
            },
        };

        // Drain this shard's samples in archive order.
        loop {
            match recv_polling(&cursor.samples, &token) {
                Ok(sample) => {
                    if !send_polling(&out, sample, &token) {
                        return;
                    }
                }
                Err(RecvStop::Disconnected) => break, // shard finished
                Err(RecvStop::Cancelled) => return,
            }
        }

        match recv_polling(&cursor.status, &token) {
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.is_cancellation() => {}
            Ok(Err(err)) => {
                warn!(seq = cursor.seq, error = %err, "fatal shard error, halting pipeline");
                let _ = errors.try_send(err);
                return;
            }
            // A worker that died without reporting only happens on teardown.
            Err(_) => return,
        }
        next_seq += 1;
    }
}
