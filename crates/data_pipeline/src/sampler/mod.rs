//! Multi-root round-robin shard sampler.
//!
//! The pipeline fans shard jobs out to a worker pool and fans the results
//! back in through an ordered aggregator:
//!
//! ```text
//! producer ──jobs──▶ workers ──cursors──▶ aggregator ──samples──▶ consumer
//!                                                   └──errors───▶
//! ```
//!
//! One producer thread issues [`ShardJob`]s with strictly increasing
//! sequence numbers; `num_workers` threads stream shards concurrently; the
//! aggregator re-serializes output by sequence number, so the emitted
//! sample order equals the issuance order regardless of which shard
//! finishes first. All channels are bounded, which makes a slow consumer
//! stall the whole pipeline instead of growing buffers.
//!
//! Every blocking channel operation is a timeout poll that re-checks the
//! shared [`CancelToken`], so cancellation (external, or raised by the
//! aggregator on a fatal shard error) reaches every thread within one
//! polling interval.

mod aggregator;
mod producer;
mod worker;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::{PipelineError, Result};
use crate::webdataset::{Sample, DEFAULT_PENDING_CAP};

/// Interval at which blocked channel operations re-check the cancel token.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(50);

const DEFAULT_SEED: u64 = 42;

/// One unit of work: stream a single shard.
///
/// `seq` is assigned by the producer in strict issuance order and is the
/// sole ordering key downstream.
#[derive(Debug, Clone)]
pub(crate) struct ShardJob {
    pub(crate) seq: u64,
    pub(crate) root: String,
    pub(crate) path: PathBuf,
}

/// Handle to one job's in-flight output, produced once per job by a worker
/// and consumed exactly once by the aggregator. The sample channel ends by
/// disconnecting; the status channel then carries the shard's terminal
/// status.
pub(crate) struct ShardCursor {
    pub(crate) seq: u64,
    pub(crate) samples: Receiver<Sample>,
    pub(crate) status: Receiver<Result<()>>,
}

/// Why a polling receive stopped without a value.
pub(crate) enum RecvStop {
    Cancelled,
    Disconnected,
}

/// Receives from `rx`, re-checking `token` every [`POLL_INTERVAL`].
pub(crate) fn recv_polling<T>(
    rx: &Receiver<T>,
    token: &CancelToken,
) -> std::result::Result<T, RecvStop> {
    loop {
        if token.is_cancelled() {
            return Err(RecvStop::Cancelled);
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(value) => return Ok(value),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Err(RecvStop::Disconnected),
        }
    }
}

/// Sends on `tx`, re-checking `token` every [`POLL_INTERVAL`]. Returns
/// `false` when the send was abandoned (cancellation or a gone receiver).
pub(crate) fn send_polling<T>(tx: &Sender<T>, value: T, token: &CancelToken) -> bool {
    let mut value = value;
    loop {
        if token.is_cancelled() {
            return false;
        }
        match tx.send_timeout(value, POLL_INTERVAL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => value = returned,
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

/// Configuration for [`Sampler::start`], validated once and immutable
/// thereafter. `roots` maps each root name to its sorted shard paths; the
/// map's sorted-key iteration order is part of the determinism contract.
#[derive(Debug, Clone)]
pub struct SamplerOptions {
    pub roots: BTreeMap<String, Vec<PathBuf>>,
    pub seed: u64,
    pub num_workers: usize,
    pub pending_cap: usize,
}

impl SamplerOptions {
    pub fn builder() -> SamplerOptionsBuilder {
        SamplerOptionsBuilder::default()
    }

    fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.roots.is_empty(), "no dataset roots provided");
        let total: usize = self.roots.values().map(Vec::len).sum();
        ensure!(
            total > 0,
            "no shards discovered across {} root(s)",
            self.roots.len()
        );
        ensure!(self.num_workers > 0, "num_workers must be > 0");
        ensure!(self.pending_cap > 0, "pending_cap must be > 0");
        Ok(())
    }
}

/// Builder for [`SamplerOptions`] with method chaining.
///
/// Defaults: `seed = 42`, `num_workers = 1`,
/// `pending_cap = `[`DEFAULT_PENDING_CAP`]. Zero values passed to
/// `num_workers` or `pending_cap` keep the default.
#[derive(Debug, Default)]
pub struct SamplerOptionsBuilder {
    roots: BTreeMap<String, Vec<PathBuf>>,
    seed: Option<u64>,
    num_workers: Option<usize>,
    pending_cap: Option<usize>,
}

impl SamplerOptionsBuilder {
    /// Replaces the full root map.
    pub fn roots(mut self, roots: BTreeMap<String, Vec<PathBuf>>) -> Self {
        self.roots = roots;
        self
    }

    /// Adds one root with its shard list.
    pub fn root(mut self, name: impl Into<String>, shards: Vec<PathBuf>) -> Self {
        self.roots.insert(name.into(), shards);
        self
    }

    /// Seed for the per-cycle shard shuffles.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn num_workers(mut self, num_workers: usize) -> Self {
        if num_workers > 0 {
            self.num_workers = Some(num_workers);
        }
        self
    }

    /// Bound on incomplete pairs held per shard.
    pub fn pending_cap(mut self, pending_cap: usize) -> Self {
        if pending_cap > 0 {
            self.pending_cap = Some(pending_cap);
        }
        self
    }

    pub fn build(self) -> SamplerOptions {
        SamplerOptions {
            roots: self.roots,
            seed: self.seed.unwrap_or(DEFAULT_SEED),
            num_workers: self.num_workers.unwrap_or(1),
            pending_cap: self.pending_cap.unwrap_or(DEFAULT_PENDING_CAP),
        }
    }
}

/// Running sampler pipeline.
///
/// Exposes the ordered sample stream and the parallel error stream.
/// Dropping the handle cancels the pipeline and joins every thread, so no
/// thread or open shard file outlives it.
pub struct Sampler {
    samples: Receiver<Sample>,
    errors: Receiver<PipelineError>,
    token: CancelToken,
    threads: Vec<thread::JoinHandle<()>>,
}

impl Sampler {
    /// Validates `options` and launches the pipeline threads.
    ///
    /// Fails immediately if no roots are given or every root resolved to
    /// zero shards; nothing is spawned in that case.
    pub fn start(options: SamplerOptions, token: CancelToken) -> anyhow::Result<Self> {
        options.validate().context("invalid sampler options")?;
        let SamplerOptions {
            roots,
            seed,
            num_workers,
            pending_cap,
        } = options;

        debug!(
            roots = roots.len(),
            shards = roots.values().map(Vec::len).sum::<usize>(),
            num_workers,
            seed,
            "starting sampler pipeline"
        );

        let (job_tx, job_rx) = bounded(num_workers);
        let (cursor_tx, cursor_rx) = bounded(num_workers);
        let (sample_tx, sample_rx) = bounded(num_workers * 2);
        let (error_tx, error_rx) = bounded(num_workers);

        let mut threads = Vec::with_capacity(num_workers + 2);

        let producer_token = token.clone();
        threads.push(
            thread::Builder::new()
                .name("sampler-producer".into())
                .spawn(move || producer::run(roots, seed, job_tx, producer_token))
                .map_err(|source| {
                    token.cancel();
                    anyhow!("spawn sampler-producer thread: {source}")
                })?,
        );

        for worker_id in 0..num_workers {
            let job_rx = job_rx.clone();
            let cursor_tx = cursor_tx.clone();
            let worker_token = token.clone();
            threads.push(
                thread::Builder::new()
                    .name(format!("sampler-worker-{worker_id}"))
                    .spawn(move || worker::run(job_rx, cursor_tx, pending_cap, worker_token))
                    .map_err(|source| {
                        token.cancel();
                        anyhow!("spawn sampler-worker-{worker_id} thread: {source}")
                    })?,
            );
        }
        // The aggregator must see the cursor channel disconnect once all
        // workers are gone; only workers may hold senders.
        drop(job_rx);
        drop(cursor_tx);

        let aggregator_token = token.clone();
        threads.push(
            thread::Builder::new()
                .name("sampler-aggregator".into())
                .spawn(move || {
                    aggregator::run(cursor_rx, sample_tx, error_tx, aggregator_token.clone());
                    // the aggregator exiting, for any reason, tears the
                    // whole pipeline down
                    aggregator_token.cancel();
                })
                .map_err(|source| {
                    token.cancel();
                    anyhow!("spawn sampler-aggregator thread: {source}")
                })?,
        );

        Ok(Self {
            samples: sample_rx,
            errors: error_rx,
            token,
            threads,
        })
    }

    /// The ordered sample stream. Disconnects when the pipeline stops.
    pub fn samples(&self) -> &Receiver<Sample> {
        &self.samples
    }

    /// Carries the first fatal error, if any. A clean stop sends nothing.
    pub fn errors(&self) -> &Receiver<PipelineError> {
        &self.errors
    }

    /// Requests a stop. Threads are joined when the handle is dropped.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.token.cancel();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}
