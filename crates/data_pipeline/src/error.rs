//! Error taxonomy for the shard sampling pipeline.
//!
//! Every failure the pipeline can surface is one of these variants. All of
//! them are fatal to the run except [`PipelineError::Cancelled`], which is
//! the expected outcome of a caller-requested stop and is filtered out by
//! the aggregator and the training loop.

use std::io;
use std::num::ParseIntError;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for operations that fail with a [`PipelineError`].
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The filesystem walk over a dataset root could not complete.
    #[error("discover shards under {}: {}", .root.display(), .source)]
    Discovery { root: PathBuf, source: io::Error },

    /// A shard file could not be opened.
    #[error("open shard {}: {}", .path.display(), .source)]
    Open { path: PathBuf, source: io::Error },

    /// A tar header or entry payload could not be read.
    #[error("read archive entry in {}: {}", .path.display(), .source)]
    Archive { path: PathBuf, source: io::Error },

    /// A `.cls` payload was not a decimal integer.
    #[error("parse label {} in {}: {}", .name, .path.display(), .source)]
    LabelFormat {
        path: PathBuf,
        name: String,
        source: ParseIntError,
    },

    /// The pending-pair map grew past the configured bound.
    #[error("pending pair buffer exceeded {} entries in {}", .cap, .path.display())]
    PendingOverflow { path: PathBuf, cap: usize },

    /// The archive ended with unmatched image or label entries.
    #[error("{} samples incomplete at end of shard {}", .count, .path.display())]
    IncompletePairs { path: PathBuf, count: usize },

    /// The pipeline was asked to stop. Not a failure.
    #[error("pipeline cancelled")]
    Cancelled,
}

impl PipelineError {
    /// True for the one non-fatal variant: a caller-requested stop.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}
