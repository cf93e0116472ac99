//! State module for tracking cycle progress
//!
//! # Components
//!
//! - `BuildState`: the persisted checkpoint of one release cycle
//! - `Phase`: the action the next invocation performs, derived from the checkpoint

mod build_state;
mod phase;

// Re-export main types
pub use build_state::BuildState;
pub use phase::Phase;
