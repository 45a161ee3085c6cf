//! Project Configuration (kiln.toml)
//!
//! Handles project-level configuration stored in `kiln.toml` at the project root.
//! Every destination is a path relative to `[output].root`.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Default output root when `[output].root` is omitted
pub const DEFAULT_OUTPUT_ROOT: &str = "wwwroot";

/// Default source map directory, relative to a group destination
pub const DEFAULT_MAPS_DIR: &str = "maps";

/// Project configuration from kiln.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Output tree settings
    #[serde(default)]
    pub output: OutputConfig,

    /// Single-file libraries copied with an optional rename
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lib: Option<LibConfig>,

    /// Installed third-party packages copied under their package name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packages: Option<PackagesConfig>,

    /// Multi-file modules copied as whole trees
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<ModuleConfig>,

    /// Style sources compiled to CSS
    #[serde(skip_serializing_if = "Option::is_none")]
    pub styles: Option<StylesConfig>,

    /// Bundler configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<BundleConfig>,

    /// External tool commands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsConfig>,
}

/// Output tree configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Root of all build output (default: "wwwroot")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Extra locations removed by `clean`, relative to the output root
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub clean: Vec<PathBuf>,
}

/// Single-file library group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LibConfig {
    /// Destination directory
    pub dest: PathBuf,

    /// Source map directory, relative to `dest` (default: "maps")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maps: Option<PathBuf>,

    /// Fail the task when any file fails to transform
    #[serde(default)]
    pub strict: bool,

    /// Files to copy
    #[serde(default)]
    pub files: Vec<LibFile>,
}

/// One single-file library
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LibFile {
    /// Source file, relative to the project root
    pub file: PathBuf,

    /// Optional rename of the output base name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rename: Option<RenameConfig>,
}

/// Rename rule for an output base name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RenameConfig {
    /// Fixed base name (e.g., "system")
    Static(String),

    /// Base name computed from the original (`{name}` and `{ext}` placeholders)
    Template {
        /// Template string
        template: String,
    },
}

/// Installed package group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PackagesConfig {
    /// Destination directory
    pub dest: PathBuf,

    /// Source map directory, relative to `dest` (default: "maps")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maps: Option<PathBuf>,

    /// Directory holding installed packages (default: "node_modules")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_modules: Option<PathBuf>,

    /// Fail the task when any file fails to transform
    #[serde(default)]
    pub strict: bool,

    /// Package names (e.g., "@angular/core")
    #[serde(default)]
    pub names: Vec<String>,
}

/// Multi-file module group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ModuleConfig {
    /// Module name, used for its source map subdirectory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Source globs; a leading `!` excludes
    pub src: Vec<String>,

    /// Destination directory
    pub dest: PathBuf,

    /// Source map directory, relative to `dest`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maps: Option<PathBuf>,

    /// Fail the task when any file fails to transform
    #[serde(default)]
    pub strict: bool,
}

/// Style source group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StylesConfig {
    /// Source globs; a leading `!` excludes
    pub src: Vec<String>,

    /// Destination directory
    pub dest: PathBuf,

    /// Source map directory, relative to `dest` (default: "maps")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maps: Option<PathBuf>,

    /// Fail the task when any file fails to compile
    #[serde(default)]
    pub strict: bool,
}

/// Bundler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BundleConfig {
    /// Bundler root, relative to the project root (default: ".")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Entry module (e.g., "app/main.js")
    pub entry: String,

    /// Application module pattern excluded outside full mode (e.g., "app/**/*")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,

    /// Bundle artifact path, relative to the output root
    pub dest: PathBuf,

    /// Base URL for module resolution (default: the output root)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<PathBuf>,

    /// Default module extension (default: "js")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_extension: Option<String>,

    /// Module path aliases
    #[serde(default)]
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub paths: BTreeMap<String, String>,
}

/// External tool commands, each run through `sh -c`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ToolsConfig {
    /// Style compiler; `{style}` is replaced with the output style
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_compiler: Option<String>,

    /// Program compiler run before the first bundle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program_compiler: Option<String>,

    /// Module bundler
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundler: Option<String>,

    /// Script minifier reading stdin and writing stdout (default: built-in)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minifier: Option<String>,
}

impl ToolsConfig {
    /// Built-in tool commands
    pub fn builtin() -> Self {
        Self {
            style_compiler: Some("sass --stdin --style={style} --no-source-map".to_string()),
            program_compiler: Some("tsc".to_string()),
            bundler: None,
            minifier: None,
        }
    }

    /// Merge another tools config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &ToolsConfig) {
        if other.style_compiler.is_some() {
            self.style_compiler = other.style_compiler.clone();
        }
        if other.program_compiler.is_some() {
            self.program_compiler = other.program_compiler.clone();
        }
        if other.bundler.is_some() {
            self.bundler = other.bundler.clone();
        }
        if other.minifier.is_some() {
            self.minifier = other.minifier.clone();
        }
    }
}

impl ProjectConfig {
    /// Load project configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the project configuration
    ///
    /// Containment of destinations under the output root is checked when the
    /// build declarations are created, not here.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(root) = &self.output.root {
            if root.as_os_str().is_empty() {
                return Err(invalid("output.root", "root cannot be empty"));
            }
        }

        if let Some(lib) = &self.lib {
            validate_relative("lib.dest", &lib.dest)?;
            for (index, file) in lib.files.iter().enumerate() {
                if file.file.as_os_str().is_empty() {
                    return Err(invalid(
                        &format!("lib.files[{}].file", index),
                        "file cannot be empty",
                    ));
                }
                if let Some(rename) = &file.rename {
                    validate_rename(&format!("lib.files[{}].rename", index), rename)?;
                }
            }
        }

        if let Some(packages) = &self.packages {
            validate_relative("packages.dest", &packages.dest)?;
            if packages.names.iter().any(|n| n.trim().is_empty()) {
                return Err(invalid("packages.names", "package names cannot be empty"));
            }
        }

        let mut module_names = HashSet::new();
        for (index, module) in self.modules.iter().enumerate() {
            let field = format!("modules[{}]", index);
            if module.src.is_empty() {
                return Err(invalid(&format!("{}.src", field), "at least one pattern is required"));
            }
            validate_relative(&format!("{}.dest", field), &module.dest)?;
            if let Some(name) = &module.name {
                if !module_names.insert(name.as_str()) {
                    return Err(ConfigError::ValidationError(format!(
                        "duplicate module name '{}'",
                        name
                    )));
                }
            }
        }

        if let Some(styles) = &self.styles {
            if styles.src.is_empty() {
                return Err(invalid("styles.src", "at least one pattern is required"));
            }
            validate_relative("styles.dest", &styles.dest)?;
        }

        if let Some(bundle) = &self.bundle {
            if bundle.entry.trim().is_empty() {
                return Err(invalid("bundle.entry", "entry cannot be empty"));
            }
            validate_relative("bundle.dest", &bundle.dest)?;
        }

        Ok(())
    }

    /// Output root relative to the project root
    pub fn output_root(&self) -> &Path {
        self.output
            .root
            .as_deref()
            .unwrap_or(Path::new(DEFAULT_OUTPUT_ROOT))
    }

    /// Merge another project config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &ProjectConfig) {
        if other.output.root.is_some() {
            self.output.root = other.output.root.clone();
        }
        if !other.output.clean.is_empty() {
            self.output.clean.extend(other.output.clean.iter().cloned());
        }
        if other.lib.is_some() {
            self.lib = other.lib.clone();
        }
        if other.packages.is_some() {
            self.packages = other.packages.clone();
        }
        if !other.modules.is_empty() {
            self.modules = other.modules.clone();
        }
        if other.styles.is_some() {
            self.styles = other.styles.clone();
        }
        if other.bundle.is_some() {
            self.bundle = other.bundle.clone();
        }
        if let Some(tools) = &other.tools {
            self.tools.get_or_insert_with(Default::default).merge(tools);
        }
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Destinations are joined onto the output root, so they must be relative
fn validate_relative(field: &str, path: &Path) -> ConfigResult<()> {
    if path.is_absolute() {
        return Err(invalid(field, "must be relative to output.root"));
    }
    Ok(())
}

fn validate_rename(field: &str, rename: &RenameConfig) -> ConfigResult<()> {
    let value = match rename {
        RenameConfig::Static(name) => name,
        RenameConfig::Template { template } => template,
    };
    if value.trim().is_empty() {
        return Err(invalid(field, "rename cannot be empty"));
    }
    Ok(())
}
