use crate::queue::splitter::SplitOutcome;
use crate::state::BuildState;
use std::collections::VecDeque;

/// One unit of work handed to a fetch worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkUnit {
    /// A batch of plain names for the bulk endpoint
    Batch(Vec<String>),

    /// One name queried on its own
    Single(String),
}

impl WorkUnit {
    /// Names covered by this unit, in query order
    pub fn names(&self) -> &[String] {
        match self {
            Self::Batch(names) => names,
            Self::Single(name) => std::slice::from_ref(name),
        }
    }

    /// Number of names in this unit
    pub fn len(&self) -> usize {
        self.names().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pending batches and singles of the current invocation
///
/// Workers take units with [`pop`](WorkQueue::pop), which always prefers
/// batches. A unit is owned by exactly one worker from pop until it is
/// requeued, split, or resolved, so no name can be handed out twice.
#[derive(Debug, Clone, Default)]
pub struct WorkQueue {
    batches: VecDeque<Vec<String>>,
    singles: VecDeque<String>,
}

impl WorkQueue {
    /// Creates a queue from batches and singles
    pub fn new(batches: Vec<Vec<String>>, singles: Vec<String>) -> Self {
        Self {
            batches: batches.into_iter().filter(|b| !b.is_empty()).collect(),
            singles: singles.into(),
        }
    }

    /// Creates a queue holding the pending work of a checkpoint
    pub fn from_state(state: &BuildState) -> Self {
        Self::new(
            state.pending_bulk_batches.clone(),
            state.pending_singles.clone(),
        )
    }

    /// Takes the next unit, preferring batches over singles
    pub fn pop(&mut self) -> Option<WorkUnit> {
        if let Some(batch) = self.batches.pop_front() {
            return Some(WorkUnit::Batch(batch));
        }
        self.singles.pop_front().map(WorkUnit::Single)
    }

    /// Returns a unit unchanged to the back of its queue
    pub fn requeue(&mut self, unit: WorkUnit) {
        match unit {
            WorkUnit::Batch(batch) => self.push_batch(batch),
            WorkUnit::Single(name) => self.singles.push_back(name),
        }
    }

    /// Adds a bulk batch to the back of the queue
    pub fn push_batch(&mut self, batch: Vec<String>) {
        if !batch.is_empty() {
            self.batches.push_back(batch);
        }
    }

    /// Applies the result of splitting a rejected batch
    pub fn apply_split(&mut self, outcome: SplitOutcome) {
        match outcome {
            SplitOutcome::Halves(front, back) => {
                self.push_batch(front);
                self.push_batch(back);
            }
            SplitOutcome::Demote(names) => self.singles.extend(names),
        }
    }

    /// Returns true when no batch and no single is left
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty() && self.singles.is_empty()
    }

    /// Number of pending batches
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Number of pending singles
    pub fn single_count(&self) -> usize {
        self.singles.len()
    }

    /// Number of names across all pending units
    pub fn identifier_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum::<usize>() + self.singles.len()
    }

    /// Consumes the queue into (batches, singles) for persistence
    pub fn into_parts(self) -> (Vec<Vec<String>>, Vec<String>) {
        (self.batches.into(), self.singles.into())
    }
}
