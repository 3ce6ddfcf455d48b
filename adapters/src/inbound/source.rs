//! External work-item sources

use crate::settings::InboundSettings;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// Prefix of file fingerprints
pub const FINGERPRINT_PREFIX: &str = "file-";

/// Suffix appended to a committed source file
pub const SENT_SUFFIX: &str = ".sent";

/// One unit of external input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Location in the source
    pub location: PathBuf,
    /// Display name
    pub name: String,
    /// Last modification
    pub modified: SystemTime,
    /// Stable identity of this version of the item
    pub fingerprint: String,
}

/// Fingerprint of `path` as modified at `modified`
pub fn fingerprint(path: &Path, modified: SystemTime) -> String {
    let nanos = modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();

    let mut hasher = blake3::Hasher::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(&nanos.to_le_bytes());
    format!("{}{}", FINGERPRINT_PREFIX, hasher.finalize().to_hex())
}

/// Source of inbound work items
#[async_trait]
pub trait InboundSource: Send + Sync {
    /// Current item, if one is waiting
    async fn discover(&self) -> Result<Option<WorkItem>>;

    /// Item content
    async fn read(&self, item: &WorkItem) -> Result<Bytes>;

    /// Mark the item consumed so it is not discovered again
    async fn commit(&self, item: &WorkItem) -> Result<()>;
}

/// Builds the source of an inbound channel
pub trait SourceProvider: Send + Sync {
    /// Source described by `settings`
    fn source(&self, settings: &InboundSettings) -> Arc<dyn InboundSource>;
}

/// A single named file in a directory.
///
/// Committing renames it to `<name>.sent`, replacing an older `.sent` file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// Source polling `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Polled path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path the file is renamed to on commit
    pub fn sent_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(SENT_SUFFIX);
        PathBuf::from(name)
    }
}

#[async_trait]
impl InboundSource for FileSource {
    async fn discover(&self) -> Result<Option<WorkItem>> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Ok(None);
        }

        let modified = metadata.modified()?;
        Ok(Some(WorkItem {
            location: self.path.clone(),
            name: self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            modified,
            fingerprint: fingerprint(&self.path, modified),
        }))
    }

    async fn read(&self, item: &WorkItem) -> Result<Bytes> {
        Ok(Bytes::from(tokio::fs::read(&item.location).await?))
    }

    async fn commit(&self, item: &WorkItem) -> Result<()> {
        let sent = self.sent_path();
        match tokio::fs::remove_file(&sent).await {
            Ok(()) => debug!("Removed previous {}", sent.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }
        tokio::fs::rename(&item.location, &sent).await?;
        debug!("Renamed {} to {}", item.location.display(), sent.display());
        Ok(())
    }
}

/// Provides a [`FileSource`] for the channel's source path
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSourceProvider;

impl SourceProvider for FileSourceProvider {
    fn source(&self, settings: &InboundSettings) -> Arc<dyn InboundSource> {
        Arc::new(FileSource::new(settings.source_path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_changes_with_mtime() {
        let path = Path::new("/data/in/order.xml");
        let t0 = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
        let t1 = t0 + std::time::Duration::from_nanos(1);

        let a = fingerprint(path, t0);
        assert!(a.starts_with(FINGERPRINT_PREFIX));
        assert_eq!(a, fingerprint(path, t0));
        assert_ne!(a, fingerprint(path, t1));
        assert_ne!(a, fingerprint(Path::new("/data/in/other.xml"), t0));
    }

    #[tokio::test]
    async fn test_discover_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(dir.path().join("in.txt"));

        assert!(source.discover().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_replaces_previous_sent_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.txt");
        let source = FileSource::new(&path);
        std::fs::write(source.sent_path(), b"old").unwrap();
        std::fs::write(&path, b"new").unwrap();

        let item = source.discover().await.unwrap().unwrap();
        assert_eq!(item.name, "in.txt");
        assert_eq!(source.read(&item).await.unwrap(), Bytes::from_static(b"new"));

        source.commit(&item).await.unwrap();

        assert!(!path.exists());
        assert_eq!(std::fs::read(source.sent_path()).unwrap(), b"new");
        assert!(source.discover().await.unwrap().is_none());
    }
}
