//! CLI configuration via environment variables
//!
//! Project settings live in `kiln.toml`; these only affect how the CLI
//! itself behaves.

use anyhow::{Context, Result};
use kiln_build::BuildMode;
use std::env;

/// Default tracing directive when `KILN_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "kiln=info";

/// CLI configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Requested build mode (KILN_MODE=full|incremental)
    pub mode: BuildMode,
    /// Disable colored output (KILN_NO_COLOR=1 or NO_COLOR=1)
    pub no_color: bool,
    /// Tracing filter directives (KILN_LOG)
    pub log_filter: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mode = match env::var("KILN_MODE") {
            Ok(value) if !value.trim().is_empty() => BuildMode::from_str(value.trim())
                .with_context(|| format!("Invalid KILN_MODE '{}'", value))?,
            _ => BuildMode::Incremental,
        };

        Ok(Self {
            mode,
            no_color: env::var("KILN_NO_COLOR").is_ok() || env::var("NO_COLOR").is_ok(),
            log_filter: env::var("KILN_LOG").ok().filter(|v| !v.trim().is_empty()),
        })
    }

    /// Mode after applying the `--full` flag; full always wins
    pub fn effective_mode(&self, full_flag: bool) -> BuildMode {
        if full_flag {
            BuildMode::Full
        } else {
            self.mode
        }
    }

    /// Tracing directives for the requested verbosity
    pub fn log_directives(&self, verbose: bool, quiet: bool) -> String {
        if verbose {
            "kiln=debug".to_string()
        } else if quiet {
            "kiln=warn".to_string()
        } else {
            self.log_filter
                .clone()
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
        }
    }
}
