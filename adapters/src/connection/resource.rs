//! Physical outbound resource: a file sink

use crate::settings::OutboundSettings;
use crate::types::FileMode;
use crate::{Error, Result};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Generation counter for sink file names, shared by one factory
#[derive(Debug, Default)]
pub struct FileSequence {
    next: AtomicU64,
}

impl FileSequence {
    /// Create a counter starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Next file name for `base`: `<base>.<n>.txt`
    pub fn next_path(&self, base: &Path) -> PathBuf {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        PathBuf::from(format!("{}.{}.txt", base.display(), n))
    }
}

/// Open outbound sink.
///
/// In `new` mode every generation writes to a fresh numbered file; in
/// `replace` mode a single file is truncated before each write.
#[derive(Debug)]
pub struct OutboundSink {
    mode: FileMode,
    base: PathBuf,
    path: PathBuf,
    file: File,
}

fn create(path: &Path) -> Result<File> {
    File::create(path).map_err(|source| Error::ResourceOpen {
        resource: path.display().to_string(),
        source,
    })
}

impl OutboundSink {
    /// Open the sink described by `settings`
    pub fn open(settings: &OutboundSettings, sequence: &FileSequence) -> Result<Self> {
        let base = settings.base_path();
        let path = match settings.file_mode {
            FileMode::Replace => base.clone(),
            FileMode::New => sequence.next_path(&base),
        };
        let file = create(&path)?;
        debug!("Opened sink {}", path.display());

        Ok(Self {
            mode: settings.file_mode,
            base,
            path,
            file,
        })
    }

    /// Current file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File mode
    pub fn mode(&self) -> FileMode {
        self.mode
    }

    /// Write `content`, returning the file written to
    pub fn write(&mut self, content: &[u8]) -> Result<PathBuf> {
        if self.mode == FileMode::Replace {
            self.file.set_len(0)?;
            self.file.seek(SeekFrom::Start(0))?;
        }
        self.file.write_all(content)?;
        self.file.flush()?;
        Ok(self.path.clone())
    }

    /// Start a new generation. Replace mode keeps its single file.
    pub fn recycle(&mut self, sequence: &FileSequence) -> Result<()> {
        if self.mode == FileMode::Replace {
            return Ok(());
        }
        self.file.flush()?;
        let path = sequence.next_path(&self.base);
        self.file = create(&path)?;
        debug!("Recycled sink {} -> {}", self.path.display(), path.display());
        self.path = path;
        Ok(())
    }

    /// Flush and close
    pub fn close(mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}
