//! Filesystem implementation of ExportStorage

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::domain::{DomainError, ExportStorage};

/// Stores export artifacts as files under a root directory
pub struct LocalExportStorage {
    root: PathBuf,
}

impl LocalExportStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Locations are paths under the root. Only the part below the root is
    /// checked for `..`, the root itself may be relative and climb.
    fn resolve(&self, location: &str) -> Result<PathBuf, DomainError> {
        let path = Path::new(location);
        let inside = path
            .strip_prefix(&self.root)
            .map(|rest| {
                rest.components()
                    .all(|c| matches!(c, Component::Normal(_)))
            })
            .unwrap_or(false);
        if !inside {
            return Err(DomainError::NotFound(format!(
                "export artifact '{}'",
                location
            )));
        }
        Ok(path.to_path_buf())
    }
}

#[async_trait]
impl ExportStorage for LocalExportStorage {
    async fn put(&self, name: &str, contents: Vec<u8>) -> Result<String, DomainError> {
        tokio::fs::create_dir_all(&self.root).await?;

        // Write next to the target then rename, so readers never see a partial file
        let path = self.root.join(name);
        let tmp = self.root.join(format!(".{}.part", name));
        tokio::fs::write(&tmp, &contents).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!("Stored export artifact {:?} ({} bytes)", path, contents.len());
        Ok(path.to_string_lossy().into_owned())
    }

    async fn get(&self, location: &str) -> Result<Option<Vec<u8>>, DomainError> {
        let path = self.resolve(location)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, location: &str) -> Result<(), DomainError> {
        let path = self.resolve(location)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
