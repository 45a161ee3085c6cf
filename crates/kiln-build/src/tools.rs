//! External tool collaborators
//!
//! The style compiler, program compiler, bundler and optional minifier are
//! opaque external programs. Each is a shell command run through `sh -c` with the build
//! context exported as `KILN_*` environment variables. The traits here are the
//! seams the pipeline and bundler adapter call through, so tests can swap in
//! in-process fakes.

use crate::bundler::BundleRequest;
use crate::context::BuildContext;
use crate::error::{BuildError, BuildResult};
use crate::fileset::SourceFile;
use crate::mode::OutputStyle;
use crate::pipeline::{LineMinifier, Minifier, SourceMap};
use async_trait::async_trait;
use kiln_config::ToolsConfig;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Compiles one style source to CSS
#[async_trait]
pub trait StyleCompiler: Send + Sync {
    /// Returns CSS text, or the compiler's diagnostic on failure
    async fn compile(
        &self,
        source: &SourceFile,
        text: &str,
        style: OutputStyle,
        ctx: &BuildContext,
    ) -> Result<String, String>;
}

/// Compiles the application program (e.g., TypeScript to JavaScript)
#[async_trait]
pub trait ProgramCompiler: Send + Sync {
    async fn compile(&self, ctx: &BuildContext) -> BuildResult<()>;
}

/// Produces the bundle artifact
#[async_trait]
pub trait Bundler: Send + Sync {
    async fn bundle(&self, request: &BundleRequest, ctx: &BuildContext) -> BuildResult<()>;
}

/// Captured result of one tool run
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Tool name
    pub name: String,
    /// Exit code (-1 when killed by a signal)
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub execution_time: Duration,
}

impl ToolOutput {
    /// Check if the tool succeeded
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get combined output
    pub fn output(&self) -> String {
        let mut output = String::new();
        if !self.stdout.is_empty() {
            output.push_str("STDOUT:\n");
            output.push_str(&self.stdout);
            output.push('\n');
        }
        if !self.stderr.is_empty() {
            output.push_str("STDERR:\n");
            output.push_str(&self.stderr);
        }
        output
    }
}

/// A shell command with its environment and working directory
#[derive(Debug, Clone)]
pub struct ToolCommand {
    name: String,
    command: String,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            env: HashMap::new(),
            cwd: None,
        }
    }

    /// Add environment variables
    pub fn with_env<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Run the command, optionally feeding `stdin`
    ///
    /// A non-zero exit is returned as an `Ok` output; see [`Self::run_checked`].
    pub async fn run(&self, stdin: Option<&[u8]>) -> BuildResult<ToolOutput> {
        debug!(tool = %self.name, command = %self.command, "running tool");
        let start = Instant::now();

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&self.command)
            .envs(&self.env)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| self.execution_error(e))?;

        // Fed from a separate task so a tool that writes before draining stdin cannot deadlock
        let writer = match (stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => {
                let input = input.to_vec();
                Some(tokio::spawn(async move {
                    pipe.write_all(&input).await?;
                    pipe.shutdown().await
                }))
            }
            _ => None,
        };

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| self.execution_error(e))?;

        if let Some(writer) = writer {
            if let Ok(Err(e)) = writer.await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(self.execution_error(e));
                }
            }
        }

        Ok(ToolOutput {
            name: self.name.clone(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            execution_time: start.elapsed(),
        })
    }

    /// Run the command and fail on a non-zero exit
    pub async fn run_checked(&self, stdin: Option<&[u8]>) -> BuildResult<ToolOutput> {
        let result = self.run(stdin).await?;
        if !result.success() {
            return Err(BuildError::ToolFailed {
                name: self.name.clone(),
                exit_code: result.exit_code,
                output: result.output(),
            });
        }
        Ok(result)
    }

    fn execution_error(&self, error: std::io::Error) -> BuildError {
        BuildError::ToolExecution {
            name: self.name.clone(),
            error: error.to_string(),
        }
    }
}

/// Style compiler backed by a shell command
///
/// The source arrives on stdin and CSS is read from stdout. `{style}` in the
/// command is replaced with the requested output style.
#[derive(Debug, Clone)]
pub struct CommandStyleCompiler {
    command: String,
}

impl CommandStyleCompiler {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl StyleCompiler for CommandStyleCompiler {
    async fn compile(
        &self,
        source: &SourceFile,
        text: &str,
        style: OutputStyle,
        ctx: &BuildContext,
    ) -> Result<String, String> {
        let mut tool = ToolCommand::new("style-compiler", self.command.replace("{style}", style.name()))
            .with_env(ctx.tool_env())
            .with_env([
                ("KILN_STYLE_OUTPUT", style.name().to_string()),
                ("KILN_STYLE_SOURCE", source.path.display().to_string()),
            ]);
        if let Some(dir) = source.path.parent() {
            tool = tool.with_cwd(dir);
        }

        match tool.run(Some(text.as_bytes())).await {
            Ok(output) if output.success() => Ok(output.stdout),
            Ok(output) if output.stderr.trim().is_empty() => {
                Err(format!("exited with code {}", output.exit_code))
            }
            Ok(output) => Err(output.stderr),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Minifier backed by a shell command run in the project root
///
/// The script arrives on stdin and the minified script is read from stdout.
/// Line origins are unknown afterwards, so the map collapses to file level.
#[derive(Debug, Clone)]
pub struct CommandMinifier {
    command: String,
}

impl CommandMinifier {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Minifier for CommandMinifier {
    async fn minify(
        &self,
        text: &str,
        map: Option<SourceMap>,
        ctx: &BuildContext,
    ) -> Result<(String, Option<SourceMap>), String> {
        let tool = ToolCommand::new("minifier", &self.command)
            .with_env(ctx.tool_env())
            .with_cwd(ctx.project_root());

        match tool.run(Some(text.as_bytes())).await {
            Ok(output) if output.success() => {
                let map = map.map(|mut map| {
                    map.collapse(output.stdout.lines().count());
                    map
                });
                Ok((output.stdout, map))
            }
            Ok(output) if output.stderr.trim().is_empty() => {
                Err(format!("exited with code {}", output.exit_code))
            }
            Ok(output) => Err(output.stderr),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Program compiler backed by a shell command run in the project root
#[derive(Debug, Clone)]
pub struct CommandProgramCompiler {
    command: String,
}

impl CommandProgramCompiler {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl ProgramCompiler for CommandProgramCompiler {
    async fn compile(&self, ctx: &BuildContext) -> BuildResult<()> {
        ToolCommand::new("program-compiler", &self.command)
            .with_env(ctx.tool_env())
            .with_cwd(ctx.project_root())
            .run_checked(None)
            .await?;
        Ok(())
    }
}

/// Bundler backed by a shell command run in the bundle root
#[derive(Debug, Clone)]
pub struct CommandBundler {
    command: String,
}

impl CommandBundler {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Bundler for CommandBundler {
    async fn bundle(&self, request: &BundleRequest, ctx: &BuildContext) -> BuildResult<()> {
        ToolCommand::new("bundler", &self.command)
            .with_env(ctx.tool_env())
            .with_env(request.env())
            .with_cwd(&request.root)
            .run_checked(None)
            .await?;
        Ok(())
    }
}

/// Stand-in for a tool with no configured command; fails when used
#[derive(Debug, Clone, Copy)]
pub struct Unconfigured {
    tool: &'static str,
}

impl Unconfigured {
    /// `tool` is the `[tools]` key that is missing
    pub fn new(tool: &'static str) -> Self {
        Self { tool }
    }

    fn error(&self) -> BuildError {
        BuildError::ToolExecution {
            name: self.tool.to_string(),
            error: format!("no command configured (set [tools].{})", self.tool),
        }
    }
}

#[async_trait]
impl StyleCompiler for Unconfigured {
    async fn compile(
        &self,
        _source: &SourceFile,
        _text: &str,
        _style: OutputStyle,
        _ctx: &BuildContext,
    ) -> Result<String, String> {
        Err(self.error().to_string())
    }
}

#[async_trait]
impl ProgramCompiler for Unconfigured {
    async fn compile(&self, _ctx: &BuildContext) -> BuildResult<()> {
        Err(self.error())
    }
}

#[async_trait]
impl Bundler for Unconfigured {
    async fn bundle(&self, _request: &BundleRequest, _ctx: &BuildContext) -> BuildResult<()> {
        Err(self.error())
    }
}

/// The collaborator implementations used by one build
#[derive(Clone)]
pub struct Toolchain {
    pub minifier: Arc<dyn Minifier>,
    pub style_compiler: Arc<dyn StyleCompiler>,
    pub program_compiler: Arc<dyn ProgramCompiler>,
    pub bundler: Arc<dyn Bundler>,
}

impl Toolchain {
    /// Build the command-backed toolchain from effective tool settings
    pub fn from_config(tools: &ToolsConfig) -> Self {
        let style_compiler: Arc<dyn StyleCompiler> = match &tools.style_compiler {
            Some(command) => Arc::new(CommandStyleCompiler::new(command)),
            None => Arc::new(Unconfigured::new("style_compiler")),
        };
        let program_compiler: Arc<dyn ProgramCompiler> = match &tools.program_compiler {
            Some(command) => Arc::new(CommandProgramCompiler::new(command)),
            None => Arc::new(Unconfigured::new("program_compiler")),
        };
        let bundler: Arc<dyn Bundler> = match &tools.bundler {
            Some(command) => Arc::new(CommandBundler::new(command)),
            None => Arc::new(Unconfigured::new("bundler")),
        };

        let minifier: Arc<dyn Minifier> = match &tools.minifier {
            Some(command) => Arc::new(CommandMinifier::new(command)),
            None => Arc::new(LineMinifier::new()),
        };

        Self {
            minifier,
            style_compiler,
            program_compiler,
            bundler,
        }
    }

    /// Replace the minifier
    pub fn with_minifier(mut self, minifier: impl Minifier + 'static) -> Self {
        self.minifier = Arc::new(minifier);
        self
    }

    /// Replace the style compiler
    pub fn with_style_compiler(mut self, compiler: impl StyleCompiler + 'static) -> Self {
        self.style_compiler = Arc::new(compiler);
        self
    }

    /// Replace the program compiler
    pub fn with_program_compiler(mut self, compiler: impl ProgramCompiler + 'static) -> Self {
        self.program_compiler = Arc::new(compiler);
        self
    }

    /// Replace the bundler
    pub fn with_bundler(mut self, bundler: impl Bundler + 'static) -> Self {
        self.bundler = Arc::new(bundler);
        self
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::from_config(&ToolsConfig::builtin())
    }
}

impl std::fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolchain").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::BuildMode;
    use tempfile::TempDir;

    fn context(dir: &TempDir, mode: BuildMode) -> BuildContext {
        BuildContext::new(dir.path(), dir.path().join("wwwroot"), mode)
    }

    #[tokio::test]
    async fn test_tool_captures_output() {
        let result = ToolCommand::new("echo", "echo hello; echo oops >&2")
            .run(None)
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.stderr.trim(), "oops");
        assert!(result.output().contains("STDERR:\noops"));
    }

    #[tokio::test]
    async fn test_tool_reads_stdin() {
        let result = ToolCommand::new("cat", "cat")
            .run(Some(b"body { color: red; }"))
            .await
            .unwrap();

        assert_eq!(result.stdout, "body { color: red; }");
    }

    #[tokio::test]
    async fn test_tool_failure_is_captured() {
        let err = ToolCommand::new("failing", "echo broken >&2; exit 3")
            .run_checked(None)
            .await
            .unwrap_err();

        match err {
            BuildError::ToolFailed {
                name,
                exit_code,
                output,
            } => {
                assert_eq!(name, "failing");
                assert_eq!(exit_code, 3);
                assert!(output.contains("broken"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_style_compiler_substitutes_style() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("site.scss"), "a{}").unwrap();
        let source = SourceFile::new(dir.path().join("site.scss"), dir.path());
        let ctx = context(&dir, BuildMode::Full);

        let compiler = CommandStyleCompiler::new("echo {style} $KILN_STYLE_OUTPUT $KILN_MODE");
        let css = compiler
            .compile(&source, "a{}", OutputStyle::Compressed, &ctx)
            .await
            .unwrap();

        assert_eq!(css.trim(), "compressed compressed full");
    }

    #[tokio::test]
    async fn test_style_compiler_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let source = SourceFile::new(dir.path().join("bad.scss"), dir.path());
        let ctx = context(&dir, BuildMode::Incremental);

        let compiler = CommandStyleCompiler::new("echo 'expected }' >&2; exit 65");
        let err = compiler
            .compile(&source, "a{", OutputStyle::Expanded, &ctx)
            .await
            .unwrap_err();

        assert_eq!(err.trim(), "expected }");
    }

    #[tokio::test]
    async fn test_command_minifier_keeps_literals() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, BuildMode::Full);
        let script = "var s = `a\n    // kept`;\n";
        let map = SourceMap::identity("a.js", "a.js", script);

        let (text, map) = CommandMinifier::new("cat")
            .minify(script, Some(map), &ctx)
            .await
            .unwrap();

        assert_eq!(text, script);
        assert_eq!(map.unwrap().lines(), &[Some(0), None]);
    }

    #[tokio::test]
    async fn test_command_minifier_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, BuildMode::Full);

        let err = CommandMinifier::new("echo 'Unexpected token' >&2; exit 1")
            .minify("var =", None, &ctx)
            .await
            .unwrap_err();

        assert_eq!(err.trim(), "Unexpected token");
    }

    #[tokio::test]
    async fn test_minifier_from_config() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, BuildMode::Full);

        let configured = Toolchain::from_config(&ToolsConfig {
            minifier: Some("tr a-z A-Z".to_string()),
            ..ToolsConfig::builtin()
        });
        let (text, _) = configured.minifier.minify("  var a;\n", None, &ctx).await.unwrap();
        assert_eq!(text, "  VAR A;\n");

        let builtin = Toolchain::from_config(&ToolsConfig::builtin());
        let (text, _) = builtin.minifier.minify("  var a;\n", None, &ctx).await.unwrap();
        assert_eq!(text, "var a;");
    }

    #[tokio::test]
    async fn test_program_compiler_runs_in_project_root() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, BuildMode::Incremental);

        CommandProgramCompiler::new("pwd > compiled.txt")
            .compile(&ctx)
            .await
            .unwrap();

        assert!(dir.path().join("compiled.txt").exists());
    }

    #[tokio::test]
    async fn test_unconfigured_tool_fails() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, BuildMode::Incremental);
        let toolchain = Toolchain::from_config(&ToolsConfig::default());

        let err = toolchain.program_compiler.compile(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("program_compiler"));
    }
}
