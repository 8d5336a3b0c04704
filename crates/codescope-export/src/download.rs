//! Where exported files end up.

use std::path::{Path, PathBuf};

use tracing::info;

use codescope_core::error::Result;

use crate::ExportedFile;

/// Hands an exported file to the user.
pub trait Downloader: Send + Sync {
    /// Store `file` and return where it went.
    fn save(&self, file: &ExportedFile) -> Result<PathBuf>;
}

/// Writes exports into a directory, replacing files with the same name.
#[derive(Clone, Debug)]
pub struct DirectoryDownloader {
    dir: PathBuf,
}

impl DirectoryDownloader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Downloader for DirectoryDownloader {
    fn save(&self, file: &ExportedFile) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(&file.filename);
        std::fs::write(&path, &file.bytes)?;
        info!(path = %path.display(), bytes = file.bytes.len(), "Export saved");
        Ok(path)
    }
}
