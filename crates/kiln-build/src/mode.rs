//! Build mode selection
//!
//! A single [`BuildMode`] value is chosen before an invocation starts and is
//! threaded through [`crate::BuildContext`] to every pipeline step and the
//! bundler adapter. Nothing reads it from ambient state.

use crate::error::{BuildError, BuildResult};
use serde::{Deserialize, Serialize};

/// Incremental developer builds or full release builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Fast rebuilds: no minification, no source maps, app modules left unbundled
    Incremental,
    /// Release builds: minified output, source maps, everything bundled
    Full,
}

impl BuildMode {
    /// Parse mode from string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> BuildResult<Self> {
        match s.to_lowercase().as_str() {
            "incremental" | "dev" => Ok(Self::Incremental),
            "full" | "release" => Ok(Self::Full),
            other => Err(BuildError::InvalidDeclaration(format!(
                "unknown build mode '{}' (expected 'incremental' or 'full')",
                other
            ))),
        }
    }

    /// Get mode name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::Full => "full",
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full)
    }

    /// Combine with another requested mode; full always wins
    pub fn escalate(self, other: BuildMode) -> BuildMode {
        self.max(other)
    }

    /// Style compiler output style for this mode
    pub fn output_style(&self) -> OutputStyle {
        match self {
            Self::Incremental => OutputStyle::Expanded,
            Self::Full => OutputStyle::Compressed,
        }
    }
}

#[allow(clippy::derivable_impls)]
impl Default for BuildMode {
    fn default() -> Self {
        Self::Incremental
    }
}

impl std::fmt::Display for BuildMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Output style requested from the style compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStyle {
    /// Readable, one declaration per line
    Expanded,
    /// Whitespace removed
    Compressed,
}

impl OutputStyle {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Expanded => "expanded",
            Self::Compressed => "compressed",
        }
    }
}

impl std::fmt::Display for OutputStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
