//! Kiln build system
//!
//! Provides build orchestration for front-end projects including:
//! - Named tasks with concurrent dependencies and ordered sequences
//! - Per-file asset pipelines gated on the build mode
//! - Changed-file filtering for style compilation
//! - Bundler and program compiler adapters
//! - Output cleaning

pub mod assets;
pub mod builder;
pub mod bundler;
pub mod changed;
pub mod cleaner;
pub mod context;
pub mod error;
pub mod fileset;
pub mod mode;
pub mod pipeline;
pub mod scheduler;
pub mod task_graph;
pub mod tasks;
pub mod tools;

// Re-export main types
pub use assets::{AssetGroup, AssetKind, AssetSource, BundleSpec, Declarations};
pub use builder::{BuildOutcome, Builder};
pub use bundler::{compile_program, BundleReport, BundleRequest, BundlerAdapter};
pub use changed::{ChangeType, ChangedFilter};
pub use cleaner::{CleanReport, Cleaner};
pub use context::BuildContext;
pub use error::{BuildError, BuildResult, TransformError};
pub use fileset::{FileSet, SourceFile, SourcePattern};
pub use mode::{BuildMode, OutputStyle};
pub use pipeline::{
    run_group, FileItem, LineMinifier, MapFile, Minifier, Pipeline, PipelineReport, PipelineStep,
    RenameRule, SourceMap,
};
pub use scheduler::{FnWork, RunReport, Scheduler, TaskRecord, WorkUnit};
pub use task_graph::{TaskDef, TaskGraph, TaskGraphBuilder, TaskId, TaskNode};
pub use tasks::{default_mode_for, standard_graph, OutputLog, Outputs, STANDARD_TASKS};
pub use tools::{
    Bundler, CommandBundler, CommandMinifier, CommandProgramCompiler, CommandStyleCompiler,
    ProgramCompiler, StyleCompiler, ToolCommand, ToolOutput, Toolchain, Unconfigured,
};

// Re-export kiln-config types for convenience
pub use kiln_config::{Config, ConfigLoader};
