//! Standard task set
//!
//! | task         | definition                              |
//! |--------------|-----------------------------------------|
//! | `lib`        | copy single-file libraries              |
//! | `npm`        | copy installed package entry files      |
//! | `modules`    | copy multi-file modules                 |
//! | `sass`       | compile changed style sources           |
//! | `clean`      | remove declared outputs                 |
//! | `typescript` | run the program compiler                |
//! | `bundle`     | bundler adapter                         |
//! | `copy`       | depends on `lib`, `npm`, `modules`      |
//! | `compile`    | sequence `copy`, `sass`                 |
//! | `build`      | sequence `compile`, `bundle`            |
//! | `full`       | sequence `clean`, `compile`             |
//! | `publish`    | sequence `full`, `typescript`, `bundle` |

use crate::assets::{AssetGroup, AssetKind, Declarations};
use crate::bundler::{compile_program, BundleReport, BundlerAdapter};
use crate::cleaner::{CleanReport, Cleaner};
use crate::context::BuildContext;
use crate::error::BuildResult;
use crate::mode::BuildMode;
use crate::pipeline::{run_group, PipelineReport};
use crate::scheduler::WorkUnit;
use crate::task_graph::{TaskDef, TaskGraph, TaskGraphBuilder};
use crate::tools::{ProgramCompiler, Toolchain};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Names and descriptions of the standard tasks
pub const STANDARD_TASKS: &[(&str, &str)] = &[
    ("lib", "Copy single-file libraries"),
    ("npm", "Copy installed package entry files"),
    ("modules", "Copy multi-file modules"),
    ("sass", "Compile changed style sources to CSS"),
    ("clean", "Remove all declared outputs"),
    ("typescript", "Run the program compiler"),
    ("bundle", "Bundle modules into the bundle artifact"),
    ("copy", "Run lib, npm and modules"),
    ("compile", "Run copy, then sass"),
    ("build", "Run compile, then bundle"),
    ("full", "Run clean, then compile"),
    ("publish", "Run full, typescript and bundle for release"),
];

/// Mode a task runs in unless escalated
pub fn default_mode_for(task: &str) -> BuildMode {
    match task {
        "publish" | "full" => BuildMode::Full,
        _ => BuildMode::Incremental,
    }
}

/// Reports collected from the standard work units during one invocation
#[derive(Debug, Clone, Default)]
pub struct OutputLog {
    inner: Arc<Mutex<Outputs>>,
}

/// Everything the standard tasks produced
#[derive(Debug, Clone, Default)]
pub struct Outputs {
    pub pipelines: Vec<PipelineReport>,
    pub clean: Option<CleanReport>,
    pub bundle: Option<BundleReport>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Outputs) -> R) -> R {
        f(&mut self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Take the collected outputs, leaving the log empty
    pub fn take(&self) -> Outputs {
        self.with(std::mem::take)
    }
}

/// Runs a set of asset groups concurrently
struct GroupsWork {
    groups: Vec<AssetGroup>,
    toolchain: Toolchain,
    log: OutputLog,
}

#[async_trait]
impl WorkUnit for GroupsWork {
    async fn run(&self, ctx: &BuildContext) -> BuildResult<()> {
        let results = join_all(
            self.groups
                .iter()
                .map(|group| run_group(group, ctx, &self.toolchain)),
        )
        .await;

        let mut first_error = None;
        for result in results {
            match result {
                Ok(report) => self.log.with(|o| o.pipelines.push(report)),
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => warn!("{}", e),
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

struct CleanWork {
    cleaner: Cleaner,
    log: OutputLog,
}

#[async_trait]
impl WorkUnit for CleanWork {
    async fn run(&self, _ctx: &BuildContext) -> BuildResult<()> {
        let report = self.cleaner.clean().await?;
        self.log.with(|o| o.clean = Some(report));
        Ok(())
    }
}

struct CompileWork {
    compiler: Arc<dyn ProgramCompiler>,
}

#[async_trait]
impl WorkUnit for CompileWork {
    async fn run(&self, ctx: &BuildContext) -> BuildResult<()> {
        compile_program(self.compiler.as_ref(), ctx).await
    }
}

struct BundleWork {
    adapter: Option<BundlerAdapter>,
    log: OutputLog,
}

#[async_trait]
impl WorkUnit for BundleWork {
    async fn run(&self, ctx: &BuildContext) -> BuildResult<()> {
        let Some(adapter) = &self.adapter else {
            warn!("no [bundle] declared, skipping bundle");
            return Ok(());
        };
        let report = adapter.run(ctx).await?;
        self.log.with(|o| o.bundle = Some(report));
        Ok(())
    }
}

/// Build the standard task graph over a project's declarations
pub fn standard_graph(
    declarations: &Declarations,
    toolchain: &Toolchain,
    ctx_output_root: &std::path::Path,
    log: &OutputLog,
) -> BuildResult<TaskGraph> {
    let groups = |kind: AssetKind| GroupsWork {
        groups: declarations
            .groups_of(kind)
            .into_iter()
            .cloned()
            .collect(),
        toolchain: toolchain.clone(),
        log: log.clone(),
    };
    let describe = |name: &str| {
        STANDARD_TASKS
            .iter()
            .find(|(task, _)| *task == name)
            .map(|(_, description)| *description)
            .unwrap_or_default()
    };
    let task = |name: &str| TaskDef::new(name).with_description(describe(name));

    TaskGraphBuilder::new()
        .task(task("lib").with_work(groups(AssetKind::Lib)))
        .task(task("npm").with_work(groups(AssetKind::Package)))
        .task(task("modules").with_work(groups(AssetKind::Module)))
        .task(task("sass").with_work(groups(AssetKind::Style)))
        .task(task("clean").with_work(CleanWork {
            cleaner: Cleaner::new(ctx_output_root, declarations.clean_targets()),
            log: log.clone(),
        }))
        .task(task("typescript").with_work(CompileWork {
            compiler: Arc::clone(&toolchain.program_compiler),
        }))
        .task(task("bundle").with_work(BundleWork {
            adapter: declarations
                .bundle()
                .map(|spec| BundlerAdapter::new(spec.clone(), toolchain)),
            log: log.clone(),
        }))
        .task(task("copy").with_dependencies(["lib", "npm", "modules"]))
        .task(task("compile").with_sequence(["copy", "sass"]))
        .task(task("build").with_sequence(["compile", "bundle"]))
        .task(task("full").with_sequence(["clean", "compile"]))
        .task(task("publish").with_sequence(["full", "typescript", "bundle"]))
        .build()
}
