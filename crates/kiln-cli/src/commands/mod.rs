pub mod run;
pub mod tasks;
pub mod watch;

use anyhow::{Context, Result};
use kiln_build::{BuildMode, Builder, ConfigLoader};
use kiln_config::PROJECT_FILE;
use std::path::{Path, PathBuf};

/// Settings shared by every command
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory to search for kiln.toml (walks up from here)
    pub project_dir: PathBuf,
    /// Requested mode; task defaults may still escalate it
    pub mode: BuildMode,
    pub quiet: bool,
    pub json: bool,
}

/// Load the project's configuration and declarations
pub fn load_builder(options: &Options) -> Result<Builder> {
    let dir = absolute(&options.project_dir)?;
    let config = ConfigLoader::new()
        .load_from_directory(&dir)
        .with_context(|| format!("Failed to load {} from {}", PROJECT_FILE, dir.display()))?;
    let builder = Builder::from_config(&config).context("Invalid build declarations")?;
    Ok(builder.with_mode(options.mode))
}

/// Absolute project directory, so watch events compare against real paths
fn absolute(dir: &Path) -> Result<PathBuf> {
    dir.canonicalize()
        .with_context(|| format!("Project directory not found: {}", dir.display()))
}
