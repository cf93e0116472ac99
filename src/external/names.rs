//! Source of the package-name universe

use crate::CensusError;
use std::path::{Path, PathBuf};

/// Supplies every package name that should be counted this cycle
pub trait NameSource {
    /// Loads the full name universe
    fn load_names(&self) -> Result<Vec<String>, CensusError>;
}

/// Reads names from a local file
///
/// Two layouts are accepted:
/// - a JSON array of strings (the registry's all-names dump)
/// - plain text with one name per line; blank lines are skipped
#[derive(Debug, Clone)]
pub struct FileNameSource {
    path: PathBuf,
}

impl FileNameSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NameSource for FileNameSource {
    fn load_names(&self) -> Result<Vec<String>, CensusError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            CensusError::NameSource(format!("{}: {}", self.path.display(), e))
        })?;

        let names = parse_names(&content)
            .map_err(|e| CensusError::NameSource(format!("{}: {}", self.path.display(), e)))?;

        tracing::info!("Loaded {} names from {}", names.len(), self.path.display());
        Ok(names)
    }
}

/// Parses either layout of a names file
fn parse_names(content: &str) -> Result<Vec<String>, serde_json::Error> {
    if content.trim_start().starts_with('[') {
        let names: Vec<String> = serde_json::from_str(content)?;
        return Ok(names
            .into_iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect());
    }

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
