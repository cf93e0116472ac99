//! Publishing the merged artifact

use crate::config::PublishConfig;
use crate::CensusError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Environment variable carrying the artifact path to the publish command
pub const ARTIFACT_ENV: &str = "CENSUS_ARTIFACT";

/// Environment variable carrying the number of counted names
pub const ENTRY_COUNT_ENV: &str = "CENSUS_ENTRY_COUNT";

/// Hands the finished artifact to whatever makes it public
pub trait ArtifactPublisher {
    /// Publishes the artifact; called at most once per successful cycle
    fn publish(&self, artifact_path: &Path, counts: &BTreeMap<String, u64>)
        -> Result<(), CensusError>;
}

/// Publishes by running an external command
///
/// The command runs with the artifact path in `CENSUS_ARTIFACT` and the entry
/// count in `CENSUS_ENTRY_COUNT`. A non-zero exit status fails the publish.
#[derive(Debug, Clone)]
pub struct CommandPublisher {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandPublisher {
    /// Creates a publisher from the `[publish]` config section
    pub fn from_config(config: &PublishConfig) -> Result<Self, CensusError> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| CensusError::Publish("publish command is empty".to_string()))?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            working_dir: config.working_dir.clone(),
        })
    }
}

impl ArtifactPublisher for CommandPublisher {
    fn publish(
        &self,
        artifact_path: &Path,
        counts: &BTreeMap<String, u64>,
    ) -> Result<(), CensusError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(ARTIFACT_ENV, artifact_path)
            .env(ENTRY_COUNT_ENV, counts.len().to_string());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        tracing::info!("Running publish command: {} {}", self.program, self.args.join(" "));

        let output = command
            .output()
            .map_err(|e| CensusError::Publish(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CensusError::Publish(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        tracing::info!("Published {} entries", counts.len());
        Ok(())
    }
}
