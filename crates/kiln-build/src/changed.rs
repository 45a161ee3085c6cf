//! Change detection for incremental style builds
//!
//! A source is considered changed when its destination counterpart is missing
//! or older than the source. Correspondence is by relative path only.

use crate::fileset::{FileSet, SourceFile};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Why a file passed the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// No destination file yet
    Added,
    /// Source modified after the destination was written
    Modified,
}

/// Filters a file set down to files whose outputs are stale
#[derive(Debug, Clone)]
pub struct ChangedFilter {
    dest_root: PathBuf,
    extension: Option<String>,
}

impl ChangedFilter {
    /// Create a filter comparing against `dest_root`
    pub fn new(dest_root: impl Into<PathBuf>) -> Self {
        Self {
            dest_root: dest_root.into(),
            extension: None,
        }
    }

    /// Compare against destinations with a different extension (e.g., "css")
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    /// Destination counterpart of a source file
    pub fn destination_for(&self, file: &SourceFile) -> PathBuf {
        let name = match (&self.extension, file.extension()) {
            (Some(ext), _) => format!("{}.{}", file.stem(), ext),
            (None, Some(ext)) => format!("{}.{}", file.stem(), ext),
            (None, None) => file.stem(),
        };
        self.dest_root.join(file.relative_dir()).join(name)
    }

    /// Classify one file, returning `None` when its destination is up to date
    pub fn classify(&self, file: &SourceFile) -> Option<ChangeType> {
        let dest = self.destination_for(file);
        let Some(dest_time) = modified(&dest) else {
            return Some(ChangeType::Added);
        };
        match modified(&file.path) {
            Some(source_time) if source_time > dest_time => Some(ChangeType::Modified),
            Some(_) => None,
            // Unreadable sources are passed through so the read error surfaces later
            None => Some(ChangeType::Modified),
        }
    }

    /// Keep only files whose destination is missing or older
    pub fn filter(&self, mut files: FileSet) -> FileSet {
        files.retain(|file| self.classify(file).is_some());
        files
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
