//! Merging shards into the final artifact

use crate::CensusError;
use std::collections::BTreeMap;
use std::path::Path;

/// Result of merging every shard of a cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedCounts {
    /// Union of all shards, keyed by package name
    pub counts: BTreeMap<String, u64>,

    /// Names found in more than one shard; the later shard's count was kept
    pub duplicates: Vec<String>,
}

/// Merges shards in index order
///
/// Shards are expected to be disjoint. If a name does appear twice, the later
/// shard wins and the name is reported in [`MergedCounts::duplicates`].
pub fn merge_shards<I>(shards: I) -> MergedCounts
where
    I: IntoIterator<Item = BTreeMap<String, u64>>,
{
    let mut merged = MergedCounts::default();

    for shard in shards {
        for (name, count) in shard {
            if merged.counts.insert(name.clone(), count).is_some() {
                merged.duplicates.push(name);
            }
        }
    }

    merged
}

/// Writes the artifact as pretty-printed JSON with sorted keys
///
/// The file is written next to its destination first and then renamed, so a
/// reader never sees a half-written artifact.
pub fn write_artifact(path: &Path, counts: &BTreeMap<String, u64>) -> Result<(), CensusError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut json = serde_json::to_string_pretty(counts)?;
    json.push('\n');

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;

    Ok(())
}

/// Reads an artifact written by [`write_artifact`]
pub fn read_artifact(path: &Path) -> Result<BTreeMap<String, u64>, CensusError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CensusError::ArtifactMissing {
                path: path.display().to_string(),
            })
        }
        Err(e) => return Err(e.into()),
    };

    Ok(serde_json::from_str(&content)?)
}
