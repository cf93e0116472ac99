//! Build phase definitions for the per-invocation state machine
//!
//! The phase is derived from the persisted checkpoint alone; no file-system
//! probing takes part in the decision.

use crate::state::BuildState;
use std::fmt;

/// The single action an invocation performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No checkpoint exists: seed the queue from the name universe
    Init,

    /// Work remains: query a budget's worth of names and write a shard
    Fetching,

    /// Queue drained: merge every shard into the artifact
    Merging,

    /// Artifact written: hand it to the publisher
    Publishing,

    /// Artifact published: nothing left to do this cycle
    Done,
}

impl Phase {
    /// Transition function from persisted state to the phase to execute
    ///
    /// Checked in priority order: missing checkpoint, published, artifact
    /// built, queue drained, otherwise fetching.
    pub fn of(state: Option<&BuildState>) -> Self {
        match state {
            None => Self::Init,
            Some(s) if s.published => Self::Done,
            Some(s) if s.artifact_built => Self::Publishing,
            Some(s) if !s.has_pending_work() => Self::Merging,
            Some(_) => Self::Fetching,
        }
    }

    /// Returns true if no further invocation will change the cycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Converts the phase to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Fetching => "fetching",
            Self::Merging => "merging",
            Self::Publishing => "publishing",
            Self::Done => "done",
        }
    }

    /// Parses a phase from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "init" => Some(Self::Init),
            "fetching" => Some(Self::Fetching),
            "merging" => Some(Self::Merging),
            "publishing" => Some(Self::Publishing),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}
