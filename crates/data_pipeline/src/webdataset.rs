//! WebDataset-style shard streaming.
//!
//! A shard is a plain (uncompressed) tar archive of flat entries whose base
//! filename minus extension is the pairing key: image bytes arrive under
//! `.jpg`/`.jpeg`/`.png`, the decimal class label under `.cls`. Entries are
//! visited in stored order and a [`Sample`] is emitted the moment both
//! halves of a pair have been seen, so peak memory is bounded by the
//! in-flight incomplete pairs rather than the whole shard.
//!
//! The pending-pair map is private to one shard's processing lifetime and
//! capped at `pending_cap` entries; archives are expected to interleave
//! pairs closely, and persistent growth signals a malformed archive.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tar::Archive;

use crate::cancel::CancelToken;
use crate::error::{PipelineError, Result};

/// Default bound on the number of incomplete pairs held per shard.
pub const DEFAULT_PENDING_CAP: usize = 1024;

/// A paired record reconstructed from a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub key: String,
    pub image: Vec<u8>,
    pub label: i64,
}

/// Whichever half of a pair has been observed so far.
#[derive(Debug, Default)]
struct PartialPair {
    image: Option<Vec<u8>>,
    label: Option<i64>,
}

impl PartialPair {
    /// Zero-length image payloads never complete a pair.
    fn complete(&self) -> bool {
        self.image.as_ref().is_some_and(|bytes| !bytes.is_empty()) && self.label.is_some()
    }
}

/// Streams the paired samples of the shard at `path` in archive order.
///
/// `emit` is called once per completed pair; returning `false` stops the
/// stream early (the caller's way of reporting a closed channel or a
/// shutdown), which ends the shard with [`PipelineError::Cancelled`]. The
/// cancellation token is checked before every entry read and before every
/// emission. A `pending_cap` of zero falls back to [`DEFAULT_PENDING_CAP`].
///
/// The terminal status is the return value: `Ok(())` for a clean end of
/// archive, otherwise the first error encountered. The archive file is
/// closed on every exit path.
pub fn stream_shard<F>(
    path: &Path,
    pending_cap: usize,
    token: &CancelToken,
    mut emit: F,
) -> Result<()>
where
    F: FnMut(Sample) -> bool,
{
    let pending_cap = if pending_cap == 0 {
        DEFAULT_PENDING_CAP
    } else {
        pending_cap
    };

    let file = File::open(path).map_err(|source| PipelineError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut archive = Archive::new(BufReader::new(file));
    let entries = archive.entries().map_err(|source| PipelineError::Archive {
        path: path.to_path_buf(),
        source,
    })?;

    let mut pending: HashMap<String, PartialPair> = HashMap::new();

    for entry in entries {
        if token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let mut entry = entry.map_err(|source| PipelineError::Archive {
            path: path.to_path_buf(),
            source,
        })?;
        if entry.header().entry_type().is_dir() {
            continue;
        }
        let name = match entry.path() {
            Ok(entry_path) => match entry_path.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            },
            Err(source) => {
                return Err(PipelineError::Archive {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let Some((stem, ext)) = split_entry_name(&name) else {
            continue;
        };
        let key = stem.to_string();

        match ext.as_str() {
            "jpg" | "jpeg" | "png" => {
                let mut data = Vec::with_capacity(entry.size() as usize);
                entry
                    .read_to_end(&mut data)
                    .map_err(|source| PipelineError::Archive {
                        path: path.to_path_buf(),
                        source,
                    })?;
                pending.entry(key.clone()).or_default().image = Some(data);
            }
            "cls" => {
                let mut payload = Vec::new();
                entry
                    .read_to_end(&mut payload)
                    .map_err(|source| PipelineError::Archive {
                        path: path.to_path_buf(),
                        source,
                    })?;
                let text = String::from_utf8_lossy(&payload);
                let label =
                    text.trim()
                        .parse::<i64>()
                        .map_err(|source| PipelineError::LabelFormat {
                            path: path.to_path_buf(),
                            name: name.clone(),
                            source,
                        })?;
                pending.entry(key.clone()).or_default().label = Some(label);
            }
            _ => continue,
        }

        if pending.len() > pending_cap {
            return Err(PipelineError::PendingOverflow {
                path: path.to_path_buf(),
                cap: pending_cap,
            });
        }

        if pending.get(&key).is_some_and(PartialPair::complete) {
            let pair = pending.remove(&key).expect("pair present, checked above");
            let sample = Sample {
                key,
                image: pair.image.expect("image half present"),
                label: pair.label.expect("label half present"),
            };
            if token.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            if !emit(sample) {
                return Err(PipelineError::Cancelled);
            }
        }
    }

    if !pending.is_empty() {
        return Err(PipelineError::IncompletePairs {
            path: path.to_path_buf(),
            count: pending.len(),
        });
    }
    Ok(())
}

/// Splits a base filename into `(stem, lowercased extension)`.
/// Names without a dot carry no extension and are ignored by the caller.
fn split_entry_name(name: &str) -> Option<(&str, String)> {
    let (stem, ext) = name.rsplit_once('.')?;
    Some((stem, ext.to_ascii_lowercase()))
}
