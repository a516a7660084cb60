//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Storage layout for the engine
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the record store file path
    pub fn records_file(&self) -> File {
        File::new(self.base_dir.join("records.json"))
    }

    /// Root holding one scratch checkout per deployment
    pub fn builds_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("builds"))
    }

    /// Scratch checkout for one deployment
    pub fn scratch_dir(&self, deployment_id: &str) -> Dir {
        self.builds_dir().subdir(deployment_id)
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Persisted log for one deployment
    pub fn deployment_log(&self, deployment_id: &str) -> File {
        self.logs_dir().file(&format!("{}.log", deployment_id))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), EngineError> {
        self.builds_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let base_dir = std::env::var_os("BOOP_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/var/lib/boop"));
        Self::new(base_dir)
    }
}
