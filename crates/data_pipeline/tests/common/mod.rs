//! Shared fixtures: synthesized WebDataset shards on disk.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tar::{Builder, Header};

/// Writes a tar shard at `dir/name` containing the given entries in order.
pub fn write_shard(dir: &Path, name: &str, entries: &[(String, Vec<u8>)]) -> Result<PathBuf> {
    let mut builder = Builder::new(Vec::new());
    for (entry_name, data) in entries {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, entry_name, data.as_slice())?;
    }
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, builder.into_inner()?)?;
    Ok(path)
}

/// One complete image/label pair keyed by `key`.
pub fn pair(key: &str, label: i64) -> Vec<(String, Vec<u8>)> {
    vec![
        (format!("{key}.jpg"), key.as_bytes().to_vec()),
        (format!("{key}.cls"), label.to_string().into_bytes()),
    ]
}

/// A shard holding the given pairs, one after another.
pub fn write_pair_shard(
    dir: &Path,
    name: &str,
    pairs: &[(&str, i64)],
) -> Result<PathBuf> {
    let entries: Vec<_> = pairs
        .iter()
        .flat_map(|(key, label)| pair(key, *label))
        .collect();
    write_shard(dir, name, &entries)
}
