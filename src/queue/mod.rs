//! Work queue module
//!
//! This module contains:
//! - Partitioning of the name universe at cycle start
//! - The shared queue of batches and singles drained by the workers
//! - Adaptive splitting of rejected batches

mod partition;
mod splitter;
mod work_queue;

pub use partition::{is_unaddressable, partition_universe, Partition};
pub use splitter::{split_batch, SplitOutcome};
pub use work_queue::{WorkQueue, WorkUnit};
