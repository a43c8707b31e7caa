//! Metadata folder capability and its local filesystem implementation.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Callback invoked by [`MetadataFolder::browse`] with each record content.
pub type BrowseCallback<'a> = dyn FnMut(&[u8]) -> Result<()> + Send + 'a;

/// Key/value persistence of serialized resource records, organised as
/// `<path>/<name>` entries.
#[async_trait]
pub trait MetadataFolder: Send + Sync {
    /// Reads an entry, failing with `NotFound` if it does not exist.
    async fn read(&self, path: &str, name: &str) -> Result<Vec<u8>>;

    async fn write(&self, path: &str, name: &str, content: &[u8]) -> Result<()>;

    /// Deletes an entry. Deleting an absent entry is not an error.
    async fn delete(&self, path: &str, name: &str) -> Result<()>;

    /// Calls `callback` with the content of every entry under `path`,
    /// stopping at the first error.
    async fn browse(&self, path: &str, callback: &mut BrowseCallback<'_>) -> Result<()>;
}

/// Metadata folder stored as plain files under a root directory.
pub struct LocalFolder {
    root: PathBuf,
}

impl LocalFolder {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_matches('/'))
    }

    fn entry(&self, path: &str, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(Error::invalid_parameter(
                "name",
                format!("'{}' cannot be used as a metadata entry name", name),
            ));
        }
        Ok(self.dir(path).join(name))
    }
}

#[async_trait]
impl MetadataFolder for LocalFolder {
    async fn read(&self, path: &str, name: &str) -> Result<Vec<u8>> {
        let file = self.entry(path, name)?;
        match fs::read(&file).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("no metadata entry '{}/{}'", path, name)))
            }
            Err(e) => Err(Error::from(e).annotate(format!("reading '{}'", file.display()))),
        }
    }

    async fn write(&self, path: &str, name: &str, content: &[u8]) -> Result<()> {
        let file = self.entry(path, name)?;
        let dir = self.dir(path);
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created metadata directory: {}", dir.display());
        }

        // write then rename, so readers never see a truncated record
        let tmp = dir.join(format!(".{}.tmp", name));
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &file).await?;
        tracing::trace!("Wrote metadata entry {}", file.display());
        Ok(())
    }

    async fn delete(&self, path: &str, name: &str) -> Result<()> {
        let file = self.entry(path, name)?;
        match fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn browse(&self, path: &str, callback: &mut BrowseCallback<'_>) -> Result<()> {
        let dir = self.dir(path);
        if !dir.exists() {
            return Ok(());
        }

        let mut names = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            names.push(entry.path());
        }
        names.sort();

        for file in names {
            let content = fs::read(&file).await?;
            callback(&content)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_write_read_delete() {
        let temp_dir = tempdir().unwrap();
        let folder = LocalFolder::new(temp_dir.path());

        folder.write("hosts/byID", "srv-1", b"{}").await.unwrap();
        assert_eq!(folder.read("hosts/byID", "srv-1").await.unwrap(), b"{}");

        folder.delete("hosts/byID", "srv-1").await.unwrap();
        let err = folder.read("hosts/byID", "srv-1").await.unwrap_err();
        assert!(err.is_not_found());

        // deleting twice is fine
        assert_ok!(folder.delete("hosts/byID", "srv-1").await);
    }

    #[tokio::test]
    async fn test_browse_visits_every_entry() {
        let temp_dir = tempdir().unwrap();
        let folder = LocalFolder::new(temp_dir.path());
        folder.write("networks/byID", "b", b"2").await.unwrap();
        folder.write("networks/byID", "a", b"1").await.unwrap();

        let mut seen = Vec::new();
        folder
            .browse("networks/byID", &mut |content: &[u8]| {
                seen.push(content.to_vec());
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(seen, vec![b"1".to_vec(), b"2".to_vec()]);
    }

    #[tokio::test]
    async fn test_browse_missing_dir_is_empty() {
        let temp_dir = tempdir().unwrap();
        let folder = LocalFolder::new(temp_dir.path());
        let mut count = 0;
        folder
            .browse("nothing", &mut |_: &[u8]| {
                count += 1;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let temp_dir = tempdir().unwrap();
        let folder = LocalFolder::new(temp_dir.path());
        let err = assert_err!(folder.write("hosts", "../escape", b"x").await);
        assert!(matches!(err, Error::InvalidParameter { .. }));
    }
}
