//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::storage::settings::PathSettings;

/// Where the deployer keeps its state, logs and install payloads
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Directory holding the per-platform install scripts
    pub scripts_dir: PathBuf,

    /// Directory for per-attempt device logs and the run log
    pub logs_dir: PathBuf,

    /// Persisted deployment state
    pub state_file: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(
        scripts_dir: impl Into<PathBuf>,
        logs_dir: impl Into<PathBuf>,
        state_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            logs_dir: logs_dir.into(),
            state_file: state_file.into(),
        }
    }

    /// Build a layout from settings, with optional per-run overrides
    pub fn from_settings(
        paths: &PathSettings,
        scripts_dir: Option<PathBuf>,
        logs_dir: Option<PathBuf>,
        state_file: Option<PathBuf>,
    ) -> Self {
        Self::new(
            scripts_dir.unwrap_or_else(|| paths.scripts_dir.clone()),
            logs_dir.unwrap_or_else(|| paths.logs_dir.clone()),
            state_file.unwrap_or_else(|| paths.state_file.clone()),
        )
    }

    /// Get the state file
    pub fn state_file(&self) -> File {
        File::new(&self.state_file)
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(&self.logs_dir)
    }

    /// Create the directories a deployment run writes into
    pub async fn setup(&self) -> Result<(), DeployError> {
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::from_settings(&PathSettings::default(), None, None, None)
    }
}
