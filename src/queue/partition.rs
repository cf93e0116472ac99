//! Initial partitioning of the name universe
//!
//! Splits the universe into names that can never be addressed through the
//! API, scoped names that must be queried one at a time, and fixed-size
//! batches of plain names for the bulk endpoint.

use std::collections::HashSet;

/// Result of partitioning a name universe at cycle start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    /// Plain names grouped into batches (last batch may be short)
    pub bulk_batches: Vec<Vec<String>>,

    /// Scoped names, queried individually
    pub singles: Vec<String>,

    /// Names the point URL cannot carry intact, permanently excluded
    pub excluded: Vec<String>,
}

/// Characters that would end, split or re-decode the point-query path
const URL_UNSAFE: [char; 5] = ['#', '?', ',', '%', '\\'];

/// Returns true if the name cannot be placed in a point-query path intact
///
/// `.` and `..` segments are normalized away by URL path resolution. `#` and
/// `?` start the fragment or query, `,` separates bulk names, and `%` or `\`
/// are rewritten by the URL parser or the server. The API can never be asked
/// about such names.
pub fn is_unaddressable(name: &str) -> bool {
    name.contains(&URL_UNSAFE[..])
        || name
            .split('/')
            .any(|segment| segment == "." || segment == "..")
}

/// Returns true for scoped (`@scope/name`) or otherwise namespaced names
///
/// The bulk endpoint does not accept these.
fn is_scoped(name: &str) -> bool {
    name.starts_with('@') || name.contains('/')
}

/// Partitions the universe into excluded names, singles and bulk batches
///
/// Order is preserved within each group. Duplicate names are kept once so
/// that no name can be counted twice across shards.
///
/// # Arguments
///
/// * `names` - The full name universe, in source order
/// * `batch_size` - Maximum number of names per bulk batch
pub fn partition_universe(names: Vec<String>, batch_size: usize) -> Partition {
    let batch_size = batch_size.max(1);
    let mut seen = HashSet::with_capacity(names.len());
    let mut partition = Partition::default();
    let mut plain = Vec::new();
    let mut duplicates = 0usize;

    for name in names {
        if !seen.insert(name.clone()) {
            duplicates += 1;
            continue;
        }

        if is_unaddressable(&name) {
            partition.excluded.push(name);
        } else if is_scoped(&name) {
            partition.singles.push(name);
        } else {
            plain.push(name);
        }
    }

    if duplicates > 0 {
        tracing::warn!("Ignored {} duplicate names in the universe", duplicates);
    }

    partition.bulk_batches = plain
        .chunks(batch_size)
        .map(|chunk| chunk.to_vec())
        .collect();

    partition
}
