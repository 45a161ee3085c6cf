//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::global::GlobalConfig;
use crate::project::{ProjectConfig, ToolsConfig};
use crate::{ConfigError, ConfigResult, PROJECT_FILE};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.kiln/config.toml) - lowest priority
/// 2. Project config (./kiln.toml) - overrides global
/// 3. Environment variables (KILN_*) - overrides project
/// 4. CLI flags - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Global configuration
    pub global: GlobalConfig,

    /// Project root directory (where kiln.toml was found)
    pub project_root: PathBuf,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Use a specific global config file instead of ~/.kiln/config.toml
    pub fn with_global_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_config_path = Some(path.into());
        self
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find kiln.toml, then loads and merges
    /// global config if it exists.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;
        let global_config = self.load_global_config().unwrap_or_default();
        let project_config = self.apply_env_overrides(project_config)?;

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let global_config = self.load_global_config().unwrap_or_default();
        let project_config = self.apply_env_overrides(project_config)?;

        let project_root = config_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Find project configuration by walking up directory tree
    fn find_project_config(&self, start_dir: &Path) -> ConfigResult<(PathBuf, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_FILE);

            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((current, project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Err(ConfigError::NotFound(start_dir.join(PROJECT_FILE))),
            }
        }
    }

    /// Load global configuration from ~/.kiln/config.toml
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => {
                let path = GlobalConfig::global_config_path()?;
                self.global_config_path = Some(path.clone());
                path
            }
        };

        // Global config is optional - if it doesn't exist, return default
        if !path.exists() {
            return Ok(GlobalConfig::default());
        }

        GlobalConfig::load_from_file(&path)
    }

    /// Apply environment variable overrides to project config
    ///
    /// Recognised: KILN_OUTPUT_ROOT, KILN_STYLE_COMPILER, KILN_PROGRAM_COMPILER, KILN_BUNDLER,
    /// KILN_MINIFIER
    fn apply_env_overrides(&self, mut config: ProjectConfig) -> ConfigResult<ProjectConfig> {
        if let Ok(root) = env::var("KILN_OUTPUT_ROOT") {
            if root.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "KILN_OUTPUT_ROOT".to_string(),
                    reason: "root cannot be empty".to_string(),
                });
            }
            config.output.root = Some(PathBuf::from(root));
        }

        let overrides = ToolsConfig {
            style_compiler: non_empty_var("KILN_STYLE_COMPILER"),
            program_compiler: non_empty_var("KILN_PROGRAM_COMPILER"),
            bundler: non_empty_var("KILN_BUNDLER"),
            minifier: non_empty_var("KILN_MINIFIER"),
        };
        if overrides != ToolsConfig::default() {
            config
                .tools
                .get_or_insert_with(Default::default)
                .merge(&overrides);
        }

        Ok(config)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Create a config for a project root without touching the filesystem
    pub fn new(project: ProjectConfig, project_root: impl Into<PathBuf>) -> Self {
        Self {
            project,
            global: GlobalConfig::default(),
            project_root: project_root.into(),
        }
    }

    /// Get the project root directory
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Output root joined onto the project root
    pub fn output_root(&self) -> PathBuf {
        self.project_root.join(self.project.output_root())
    }

    /// Effective tool commands (project > global > built-in)
    pub fn tools(&self) -> ToolsConfig {
        let mut tools = ToolsConfig::builtin();
        if let Some(global) = &self.global.tools {
            tools.merge(global);
        }
        if let Some(project) = &self.project.tools {
            tools.merge(project);
        }
        tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn create_config_file(dir: &Path, content: &str) -> PathBuf {
        let config_path = dir.join(PROJECT_FILE);
        fs::write(&config_path, content).unwrap();
        config_path
    }

    fn isolated_loader(dir: &Path) -> ConfigLoader {
        ConfigLoader::new().with_global_config_path(dir.join("no-global.toml"))
    }

    #[test]
    #[serial]
    fn test_load_project_config() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(
            temp_dir.path(),
            r#"
[output]
root = "dist"
"#,
        );

        let mut loader = isolated_loader(temp_dir.path());
        let config = loader.load_from_directory(temp_dir.path()).unwrap();

        assert_eq!(config.project_root(), temp_dir.path());
        assert_eq!(config.output_root(), temp_dir.path().join("dist"));
    }

    #[test]
    #[serial]
    fn test_find_config_in_parent() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "");

        let sub_dir = temp_dir.path().join("Styles");
        fs::create_dir(&sub_dir).unwrap();

        let mut loader = isolated_loader(temp_dir.path());
        let config = loader.load_from_directory(&sub_dir).unwrap();

        assert_eq!(config.project_root(), temp_dir.path());
    }

    #[test]
    #[serial]
    fn test_no_project_config() {
        let temp_dir = TempDir::new().unwrap();

        let mut loader = isolated_loader(temp_dir.path());
        let result = loader.load_from_directory(temp_dir.path());

        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    #[serial]
    fn test_env_override_output_root() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[output]\nroot = \"dist\"\n");

        env::set_var("KILN_OUTPUT_ROOT", "public");

        let mut loader = isolated_loader(temp_dir.path());
        let config = loader.load_from_directory(temp_dir.path()).unwrap();

        assert_eq!(config.output_root(), temp_dir.path().join("public"));

        env::remove_var("KILN_OUTPUT_ROOT");
    }

    #[test]
    #[serial]
    fn test_env_override_tools() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(
            temp_dir.path(),
            r#"
[tools]
bundler = "node bundle.js"
"#,
        );

        env::set_var("KILN_BUNDLER", "./bundle.sh");

        let mut loader = isolated_loader(temp_dir.path());
        let config = loader.load_from_directory(temp_dir.path()).unwrap();

        assert_eq!(config.tools().bundler.as_deref(), Some("./bundle.sh"));

        env::remove_var("KILN_BUNDLER");
    }

    #[test]
    #[serial]
    fn test_tools_precedence() {
        let temp_dir = TempDir::new().unwrap();
        let global_path = temp_dir.path().join("global.toml");
        fs::write(
            &global_path,
            r#"
[tools]
style_compiler = "global-sass"
program_compiler = "global-tsc"
"#,
        )
        .unwrap();
        create_config_file(
            temp_dir.path(),
            r#"
[tools]
style_compiler = "project-sass"
"#,
        );

        let mut loader = ConfigLoader::new().with_global_config_path(&global_path);
        let config = loader.load_from_directory(temp_dir.path()).unwrap();
        let tools = config.tools();

        assert_eq!(tools.style_compiler.as_deref(), Some("project-sass"));
        assert_eq!(tools.program_compiler.as_deref(), Some("global-tsc"));
        assert!(tools.bundler.is_none());
    }

    #[test]
    #[serial]
    fn test_default_tools() {
        let config = Config::new(ProjectConfig::default(), "/project");
        let tools = config.tools();

        assert_eq!(tools.program_compiler.as_deref(), Some("tsc"));
        assert!(tools.style_compiler.unwrap().contains("{style}"));
    }

    #[test]
    #[serial]
    fn test_load_from_specific_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_config_file(temp_dir.path(), "[output]\nroot = \"out\"\n");

        let mut loader = isolated_loader(temp_dir.path());
        let config = loader.load_from_file(&config_path).unwrap();

        assert_eq!(config.output_root(), temp_dir.path().join("out"));
    }
}
