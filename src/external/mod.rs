//! External collaborators
//!
//! - `NameSource`: where the package-name universe comes from
//! - `ArtifactPublisher`: where the finished artifact goes

mod names;
mod publisher;

pub use names::{FileNameSource, NameSource};
pub use publisher::{ArtifactPublisher, CommandPublisher, ARTIFACT_ENV, ENTRY_COUNT_ENV};
