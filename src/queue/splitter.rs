//! Adaptive batch splitting
//!
//! When the bulk endpoint rejects a batch because of its shape, the batch is
//! halved and both halves are retried; small batches are dissolved into
//! single queries instead. Every split strictly shrinks the batch, so a batch
//! of `n` names reaches singles after at most `ceil(log2(n))` rejections.

/// What to do with a rejected batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitOutcome {
    /// Requeue both halves as new bulk batches
    Halves(Vec<String>, Vec<String>),

    /// Move every member to the singles queue
    Demote(Vec<String>),
}

/// Splits a rejected batch in half, or demotes it when it is already small
///
/// A batch with `min_split_size` or fewer members is demoted. The front half
/// receives the extra member of an odd-sized batch.
pub fn split_batch(mut batch: Vec<String>, min_split_size: usize) -> SplitOutcome {
    if batch.len() <= min_split_size.max(1) {
        return SplitOutcome::Demote(batch);
    }

    let mid = batch.len().div_ceil(2);
    let back = batch.split_off(mid);
    SplitOutcome::Halves(batch, back)
}
