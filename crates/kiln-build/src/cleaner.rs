//! Output cleaning

use crate::error::{BuildError, BuildResult};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Paths actually removed by a clean
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub removed: Vec<PathBuf>,
}

/// Removes declared output locations under an output root
#[derive(Debug, Clone)]
pub struct Cleaner {
    output_root: PathBuf,
    targets: Vec<PathBuf>,
}

impl Cleaner {
    /// `targets` are relative to `output_root`
    pub fn new(output_root: impl Into<PathBuf>, targets: Vec<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            targets,
        }
    }

    /// Delete every target; missing paths are skipped
    pub async fn clean(&self) -> BuildResult<CleanReport> {
        let mut report = CleanReport::default();
        for target in &self.targets {
            let path = self.output_root.join(target);
            if remove(&path).await? {
                debug!(path = %path.display(), "removed");
                report.removed.push(path);
            }
        }
        Ok(report)
    }
}

async fn remove(path: &Path) -> BuildResult<bool> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(BuildError::io(path, e)),
    };

    let result = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };

    match result {
        Ok(()) => Ok(true),
        // Already removed along with an overlapping target
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BuildError::io(path, e)),
    }
}
