use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted progress of one release cycle
///
/// A `BuildState` is created when a cycle starts, mutated by every fetch
/// invocation and retired once `published` is set. Every identifier of the
/// universe lives in exactly one place: a written shard, the pending batches,
/// the pending singles, the blocked list or the excluded list (or it was
/// dropped because the registry reported it as absent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildState {
    /// Number of result shards written so far this cycle
    pub counts_files_so_far: u32,

    /// Batches of names eligible for bulk queries
    pub pending_bulk_batches: Vec<Vec<String>>,

    /// Names queried one at a time (scoped or demoted names)
    pub pending_singles: Vec<String>,

    /// Names whose single query was permanently blocked
    pub blocked_identifiers: Vec<String>,

    /// Names excluded at initialization (`.` or `..` path segment)
    #[serde(default)]
    pub excluded_identifiers: Vec<String>,

    /// Whether the merged artifact has been written
    #[serde(default)]
    pub artifact_built: bool,

    /// Whether the artifact has been handed to the publisher
    pub published: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BuildState {
    /// Creates the state of a freshly seeded cycle
    pub fn new(
        pending_bulk_batches: Vec<Vec<String>>,
        pending_singles: Vec<String>,
        excluded_identifiers: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            counts_files_so_far: 0,
            pending_bulk_batches,
            pending_singles,
            blocked_identifiers: Vec::new(),
            excluded_identifiers,
            artifact_built: false,
            published: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true while batches or singles remain to be queried
    pub fn has_pending_work(&self) -> bool {
        !self.pending_bulk_batches.is_empty() || !self.pending_singles.is_empty()
    }

    /// Number of names still waiting in batches and singles
    pub fn pending_identifier_count(&self) -> usize {
        self.pending_bulk_batches.iter().map(Vec::len).sum::<usize>() + self.pending_singles.len()
    }

    /// Records a modification time
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
