use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

pub mod filesystem;

pub use filesystem::FilesystemStorage;

/// Error type for storage operations
#[derive(Debug)]
pub enum StorageError {
    Io(std::io::Error),
    Path(String),
    Config(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "IO error: {}", e),
            StorageError::Path(e) => write!(f, "Path error: {}", e),
            StorageError::Config(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err)
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Transient storage for received objects and encoded reports
///
/// Keys are relative paths such as `incoming/<uid>.dcm`; keys escaping the
/// storage root are refused.
#[async_trait]
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Get the base path for this storage backend
    fn base_path(&self) -> &Path;

    /// Resolve a key relative to the storage root
    fn subpath_str(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::Path(format!("invalid storage key '{}'", key)));
        }
        Ok(self.base_path().join(relative))
    }

    /// Ensure a directory exists under the storage root, creating it if necessary
    fn ensure_dir_str(&self, key: &str) -> StorageResult<PathBuf> {
        let full_path = self.subpath_str(key)?;
        std::fs::create_dir_all(&full_path)?;
        Ok(full_path)
    }

    /// Write bytes at `key`, replacing any previous content
    async fn write_file_str(&self, key: &str, contents: &[u8]) -> StorageResult<PathBuf> {
        let full_path = self.subpath_str(key)?;

        // Ensure parent directory exists
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&full_path, contents).await?;
        Ok(full_path)
    }

    /// Read bytes from a file at the given relative path
    async fn read_file_str(&self, key: &str) -> StorageResult<Vec<u8>> {
        let full_path = self.subpath_str(key)?;
        tokio::fs::read(&full_path).await.map_err(StorageError::from)
    }

    /// Check if a file exists at the given relative path
    fn exists_str(&self, key: &str) -> bool {
        self.subpath_str(key).map(|p| p.exists()).unwrap_or(false)
    }

    /// Remove the file at `key`
    ///
    /// Returns `false` when there was nothing to remove.
    async fn remove_str(&self, key: &str) -> StorageResult<bool> {
        let full_path = self.subpath_str(key)?;
        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

/// Configuration for storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub options: std::collections::HashMap<String, serde_json::Value>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let mut options = std::collections::HashMap::new();
        options.insert(
            "path".to_string(),
            serde_json::Value::String("./tmp".to_string()),
        );

        Self {
            backend: default_backend(),
            options,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> StorageResult<()> {
        match self.backend.as_str() {
            "filesystem" => Ok(()),
            other => Err(StorageError::Config(format!(
                "Unknown storage backend: {}",
                other
            ))),
        }
    }
}

fn default_backend() -> String {
    "filesystem".to_string()
}

/// Create a storage backend from configuration
pub fn create_storage_backend(config: &StorageConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    match config.backend.as_str() {
        "filesystem" => {
            let path = config
                .options
                .get("path")
                .and_then(|v| v.as_str())
                .unwrap_or("./tmp");

            let storage = FilesystemStorage::new(path)?;
            Ok(Arc::new(storage))
        }
        _ => Err(StorageError::Config(format!(
            "Unknown storage backend: {}",
            config.backend
        ))),
    }
}
