//! Shard discovery.
//!
//! Walks a dataset root and returns the sorted absolute paths of every
//! regular file matching the WebDataset shard naming convention:
//! a literal `shard-` prefix, at least six decimal digits, and a `.tar`
//! suffix. Discovery is read-only and safe to repeat.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::error::{PipelineError, Result};

const SHARD_NAME_PATTERN: &str = r"^shard-[0-9]{6,}\.tar$";

/// Returns the sorted absolute paths of all shard files beneath `root`.
///
/// A walk that cannot complete (missing root, permission error) is a
/// [`PipelineError::Discovery`]. An empty result is not an error at this
/// layer; callers decide whether zero shards is acceptable.
pub fn discover_shards(root: impl AsRef<Path>, token: &CancelToken) -> Result<Vec<PathBuf>> {
    let given = root.as_ref();
    // Canonicalizing up front makes every walked path absolute and turns a
    // missing or unreadable root into a discovery error before the walk.
    let root = fs::canonicalize(given).map_err(|source| PipelineError::Discovery {
        root: given.to_path_buf(),
        source,
    })?;
    let pattern = Regex::new(SHARD_NAME_PATTERN).expect("shard name pattern is valid");

    let mut shards = Vec::new();
    for entry in WalkDir::new(&root) {
        if token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let entry = entry.map_err(|source| PipelineError::Discovery {
            root: root.clone(),
            source: io::Error::from(source),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if pattern.is_match(&entry.file_name().to_string_lossy()) {
            shards.push(entry.into_path());
        }
    }
    shards.sort();
    Ok(shards)
}

/// Scans each root independently into the sorted map consumed by
/// [`SamplerOptions`](crate::sampler::SamplerOptions).
///
/// Keys are the roots as given (display form), so the producer's
/// sorted-root-name ordering matches the caller's naming.
pub fn discover_by_root(
    roots: &[PathBuf],
    token: &CancelToken,
) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    let mut result = BTreeMap::new();
    for root in roots {
        let shards = discover_shards(root, token)?;
        result.insert(root.display().to_string(), shards);
    }
    Ok(result)
}
