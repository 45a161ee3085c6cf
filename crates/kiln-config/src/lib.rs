//! Kiln Configuration System
//!
//! Provides configuration management for kiln projects including:
//! - Project configuration (kiln.toml): asset groups, styles, bundle, tools
//! - Global user configuration (~/.kiln/config.toml)
//! - Configuration precedence and merging
//!
//! # Configuration Hierarchy
//!
//! Tool commands are resolved in the following order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config (~/.kiln/config.toml)
//! 3. Project config (./kiln.toml)
//! 4. Environment variables (KILN_*)
//!
//! # Example
//!
//! ```no_run
//! use kiln_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("output root: {}", config.output_root().display());
//! ```

pub mod global;
pub mod loader;
pub mod project;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Name of the project configuration file
pub const PROJECT_FILE: &str = "kiln.toml";

// Re-export main types
pub use global::GlobalConfig;
pub use loader::{Config, ConfigLoader};
pub use project::{
    BundleConfig, LibConfig, LibFile, ModuleConfig, OutputConfig, PackagesConfig, ProjectConfig,
    RenameConfig, StylesConfig, ToolsConfig,
};
