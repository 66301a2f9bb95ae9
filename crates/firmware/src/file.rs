use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::{FirmwareError, MIB};

/// A firmware image selected for upload.
///
/// Immutable once created. The content is shared so that every attempt
/// of an upload (including retries) sends the same bytes without copying.
/// Files read from disk remember their path so they can be re-read.
#[derive(Clone, PartialEq, Eq)]
pub struct FirmwareFile {
    name: String,
    content: Arc<[u8]>,
    source: Option<PathBuf>,
}

impl FirmwareFile {
    /// Creates a file from a display name and its raw bytes.
    pub fn new(name: impl Into<String>, content: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            source: None,
        }
    }

    /// Reads a firmware image from disk.
    pub fn load(path: &Path) -> Result<Self, FirmwareError> {
        let meta = std::fs::metadata(path)?;
        if !meta.is_file() {
            return Err(FirmwareError::NotAFile(path.display().to_string()));
        }

        let content = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        debug!(path = %path.display(), bytes = content.len(), "firmware image loaded");
        Ok(Self {
            source: Some(path.to_path_buf()),
            ..Self::new(name, content)
        })
    }

    /// Reads the image again from where it was loaded.
    ///
    /// In-memory files have no source and come back unchanged.
    pub fn reload(&self) -> Result<Self, FirmwareError> {
        match &self.source {
            Some(path) => Self::load(path),
            None => Ok(self.clone()),
        }
    }

    /// Path the image was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// File name as selected by the user.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the image in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.content.len() as u64
    }

    /// Size in MB, as shown to the user.
    pub fn size_mb(&self) -> f64 {
        self.size_bytes() as f64 / MIB as f64
    }

    /// Shared handle to the raw image bytes.
    pub fn content(&self) -> Arc<[u8]> {
        Arc::clone(&self.content)
    }

    /// Borrowed view of the raw image bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.content
    }
}

impl fmt::Debug for FirmwareFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirmwareFile")
            .field("name", &self.name)
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}
