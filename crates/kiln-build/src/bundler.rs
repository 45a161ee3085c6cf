//! Bundler adapter
//!
//! Wraps the external bundler with the first-run program compile and the
//! removal of the previous artifact. Outside full mode the application
//! modules are excluded so they load unbundled during development.

use crate::assets::BundleSpec;
use crate::context::BuildContext;
use crate::error::{BuildError, BuildResult};
use crate::tools::{Bundler, ProgramCompiler, Toolchain};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// What the bundler is asked to produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRequest {
    /// Bundler root (working directory)
    pub root: PathBuf,
    pub entry: String,
    /// Pattern excluded from the bundle, if any
    pub exclude: Option<String>,
    /// Bundle expression, e.g. `app/main.js - [app/**/*]`
    pub expression: String,
    /// Absolute artifact path
    pub output: PathBuf,
    pub source_maps: bool,
    pub base_url: PathBuf,
    pub default_extension: String,
    pub paths: BTreeMap<String, String>,
}

impl BundleRequest {
    /// Environment variables describing the request
    pub fn env(&self) -> Vec<(String, String)> {
        let paths = serde_json::to_string(&self.paths).unwrap_or_else(|_| "{}".to_string());
        vec![
            ("KILN_BUNDLE_ENTRY".to_string(), self.entry.clone()),
            ("KILN_BUNDLE_EXPRESSION".to_string(), self.expression.clone()),
            (
                "KILN_BUNDLE_EXCLUDE".to_string(),
                self.exclude.clone().unwrap_or_default(),
            ),
            (
                "KILN_BUNDLE_OUTPUT".to_string(),
                self.output.display().to_string(),
            ),
            (
                "KILN_BUNDLE_SOURCE_MAPS".to_string(),
                self.source_maps.to_string(),
            ),
            (
                "KILN_BUNDLE_BASE_URL".to_string(),
                self.base_url.display().to_string(),
            ),
            (
                "KILN_BUNDLE_DEFAULT_EXTENSION".to_string(),
                self.default_extension.clone(),
            ),
            ("KILN_BUNDLE_PATHS".to_string(), paths),
        ]
    }
}

/// Outcome of one bundle run
#[derive(Debug, Clone)]
pub struct BundleReport {
    pub output: PathBuf,
    /// Whether the program compiler ran first
    pub compiled: bool,
    pub duration: Duration,
}

/// Runs the program compiler (once per invocation) and marks the context
pub async fn compile_program(compiler: &dyn ProgramCompiler, ctx: &BuildContext) -> BuildResult<()> {
    let start = Instant::now();
    compiler.compile(ctx).await?;
    ctx.mark_program_compiled();
    info!(elapsed_ms = start.elapsed().as_millis() as u64, "program compiled");
    Ok(())
}

/// First-run compile, artifact removal, then the bundler
pub struct BundlerAdapter {
    spec: BundleSpec,
    program_compiler: Arc<dyn ProgramCompiler>,
    bundler: Arc<dyn Bundler>,
}

impl BundlerAdapter {
    pub fn new(spec: BundleSpec, toolchain: &Toolchain) -> Self {
        Self {
            spec,
            program_compiler: Arc::clone(&toolchain.program_compiler),
            bundler: Arc::clone(&toolchain.bundler),
        }
    }

    /// Request for the context's mode
    pub fn request(&self, ctx: &BuildContext) -> BundleRequest {
        let full = ctx.mode().is_full();
        let exclude = if full { None } else { self.spec.app.clone() };
        let expression = match &exclude {
            Some(app) => format!("{} - [{}]", self.spec.entry, app),
            None => self.spec.entry.clone(),
        };

        BundleRequest {
            root: self.spec.root.clone(),
            entry: self.spec.entry.clone(),
            exclude,
            expression,
            output: ctx.output_root().join(&self.spec.output),
            source_maps: full,
            base_url: self.spec.base_url.clone(),
            default_extension: self.spec.default_extension.clone(),
            paths: self.spec.paths.clone(),
        }
    }

    pub async fn run(&self, ctx: &BuildContext) -> BuildResult<BundleReport> {
        let start = Instant::now();
        let request = self.request(ctx);

        let artifact_exists = tokio::fs::try_exists(&request.output)
            .await
            .unwrap_or(false);
        let compiled = !artifact_exists && !ctx.program_compiled();
        if compiled {
            debug!(output = %request.output.display(), "no bundle yet, compiling program first");
            compile_program(self.program_compiler.as_ref(), ctx).await?;
        }

        match tokio::fs::remove_file(&request.output).await {
            Ok(()) => debug!(output = %request.output.display(), "removed previous bundle"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(BuildError::io(&request.output, e)),
        }
        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BuildError::io(parent, e))?;
        }

        self.bundler.bundle(&request, ctx).await?;

        info!(
            expression = %request.expression,
            output = %request.output.display(),
            source_maps = request.source_maps,
            "bundle written"
        );
        Ok(BundleReport {
            output: request.output,
            compiled,
            duration: start.elapsed(),
        })
    }
}
