//! Build orchestration
//!
//! [`Builder`] ties a project's declarations and toolchain to the standard
//! task graph. Each call to [`Builder::run`] is one invocation: a fresh
//! context, a fresh task graph and a fresh set of memoised runs.

use crate::assets::Declarations;
use crate::context::BuildContext;
use crate::error::BuildResult;
use crate::mode::BuildMode;
use crate::pipeline::PipelineReport;
use crate::scheduler::{RunReport, Scheduler};
use crate::tasks::{default_mode_for, standard_graph, OutputLog, Outputs};
use crate::tools::Toolchain;
use kiln_config::{Config, ConfigLoader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Result of a successful invocation
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub run: RunReport,
    pub outputs: Outputs,
}

impl BuildOutcome {
    pub fn pipelines(&self) -> &[PipelineReport] {
        &self.outputs.pipelines
    }

    /// Output files written across all groups
    pub fn files_written(&self) -> usize {
        self.pipelines().iter().map(|p| p.written.len()).sum()
    }

    pub fn maps_written(&self) -> usize {
        self.pipelines().iter().map(|p| p.maps.len()).sum()
    }

    /// Files skipped because their transform failed
    pub fn failures(&self) -> usize {
        self.pipelines().iter().map(|p| p.failures.len()).sum()
    }
}

/// Main entry point for running kiln tasks
pub struct Builder {
    project_root: PathBuf,
    output_root: PathBuf,
    declarations: Declarations,
    toolchain: Toolchain,
    /// Requested mode; combined with each task's default
    mode: BuildMode,
}

impl Builder {
    /// Load `kiln.toml` from `project_path` or one of its ancestors
    pub fn new(project_path: impl AsRef<Path>) -> BuildResult<Self> {
        let config = ConfigLoader::new().load_from_directory(project_path.as_ref())?;
        Self::from_config(&config)
    }

    /// Create a builder from an already loaded configuration
    pub fn from_config(config: &Config) -> BuildResult<Self> {
        let declarations = Declarations::from_config(config)?;
        debug!(
            root = %config.project_root().display(),
            groups = declarations.groups().len(),
            bundle = declarations.bundle().is_some(),
            "loaded declarations"
        );
        Ok(Self {
            project_root: config.project_root().to_path_buf(),
            output_root: config.output_root(),
            declarations,
            toolchain: Toolchain::from_config(&config.tools()),
            mode: BuildMode::default(),
        })
    }

    /// Create a builder over explicit declarations
    pub fn from_declarations(
        project_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        declarations: Declarations,
    ) -> BuildResult<Self> {
        declarations.validate()?;
        Ok(Self {
            project_root: project_root.into(),
            output_root: output_root.into(),
            declarations,
            toolchain: Toolchain::default(),
            mode: BuildMode::default(),
        })
    }

    /// Replace the external tools
    pub fn with_toolchain(mut self, toolchain: Toolchain) -> Self {
        self.toolchain = toolchain;
        self
    }

    /// Request a mode; `Full` escalates every task
    pub fn with_mode(mut self, mode: BuildMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn declarations(&self) -> &Declarations {
        &self.declarations
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    /// Effective mode for a task
    pub fn mode_for(&self, task: &str) -> BuildMode {
        default_mode_for(task).escalate(self.mode)
    }

    fn scheduler(&self, log: &OutputLog) -> BuildResult<Scheduler> {
        let graph = standard_graph(&self.declarations, &self.toolchain, &self.output_root, log)?;
        Ok(Scheduler::new(graph))
    }

    /// Waves of work-carrying tasks `task` would run
    pub fn plan(&self, task: &str) -> BuildResult<Vec<Vec<String>>> {
        self.scheduler(&OutputLog::new())?.graph().execution_plan(task)
    }

    /// Standard tasks with their descriptions, in declaration order
    pub fn tasks(&self) -> BuildResult<Vec<(String, String)>> {
        let scheduler = self.scheduler(&OutputLog::new())?;
        Ok(scheduler
            .graph()
            .tasks()
            .map(|(_, node)| {
                (
                    node.name.clone(),
                    node.description.clone().unwrap_or_default(),
                )
            })
            .collect())
    }

    /// Run one task and everything it requires
    pub async fn run(&self, task: &str) -> BuildResult<BuildOutcome> {
        let log = OutputLog::new();
        let scheduler = self.scheduler(&log)?;
        let ctx = Arc::new(BuildContext::new(
            &self.project_root,
            &self.output_root,
            self.mode_for(task),
        ));

        let run = scheduler.run(task, ctx).await?;
        Ok(BuildOutcome {
            run,
            outputs: log.take(),
        })
    }
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("project_root", &self.project_root)
            .field("output_root", &self.output_root)
            .field("declarations", &self.declarations)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetGroup, AssetKind, AssetSource};
    use crate::error::BuildError;
    use rstest::rstest;
    use std::fs;
    use tempfile::TempDir;

    fn styles() -> AssetGroup {
        AssetGroup {
            name: "sass".to_string(),
            kind: AssetKind::Style,
            source: AssetSource::Globs(vec!["Styles/**/*.css".to_string()]),
            dest: PathBuf::from("css"),
            rename: None,
            maps_dir: PathBuf::from("maps"),
            strict: false,
        }
    }

    #[rstest]
    #[case("build", BuildMode::Incremental, BuildMode::Incremental)]
    #[case("build", BuildMode::Full, BuildMode::Full)]
    #[case("publish", BuildMode::Incremental, BuildMode::Full)]
    #[case("full", BuildMode::Incremental, BuildMode::Full)]
    #[case("sass", BuildMode::Full, BuildMode::Full)]
    fn test_mode_for(#[case] task: &str, #[case] requested: BuildMode, #[case] expected: BuildMode) {
        let builder = Builder::from_declarations("/p", "/p/out", Declarations::new())
            .unwrap()
            .with_mode(requested);
        assert_eq!(builder.mode_for(task), expected);
    }

    #[test]
    fn test_rejects_escaping_destination() {
        let mut group = styles();
        group.dest = PathBuf::from("../elsewhere");
        let result = Builder::from_declarations("/p", "/p/out", Declarations::new().with_group(group));
        assert!(matches!(result, Err(BuildError::DestinationOutsideRoot { .. })));
    }

    #[test]
    fn test_tasks_listing() {
        let builder = Builder::from_declarations("/p", "/p/out", Declarations::new()).unwrap();
        let tasks = builder.tasks().unwrap();
        assert_eq!(tasks.first().map(|(n, _)| n.as_str()), Some("lib"));
        assert!(tasks.iter().any(|(n, d)| n == "publish" && !d.is_empty()));
    }

    #[tokio::test]
    async fn test_run_collects_outputs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("Styles")).unwrap();
        fs::write(dir.path().join("Styles/site.css"), "a{}").unwrap();

        let builder = Builder::from_declarations(
            dir.path(),
            dir.path().join("out"),
            Declarations::new().with_group(styles()),
        )
        .unwrap()
        .with_toolchain(Toolchain::default().with_style_compiler(crate::tools::Unconfigured::new("sass")));

        // Unconfigured compiler: the file fails but the group does not
        let outcome = builder.run("sass").await.unwrap();
        assert_eq!(outcome.run.mode, BuildMode::Incremental);
        assert!(outcome.run.ran("sass"));
        assert_eq!(outcome.files_written(), 0);
        assert_eq!(outcome.failures(), 1);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let builder = Builder::from_declarations("/p", "/p/out", Declarations::new()).unwrap();
        let err = builder.run("deploy").await.unwrap_err();
        assert!(matches!(err, BuildError::UnknownTask { .. }));
    }
}
