//! Per-invocation build context

use crate::mode::BuildMode;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// State shared by every work unit in one invocation
///
/// The mode is fixed at construction. The only mutable field is the
/// program-compiled flag, which keeps `publish` from compiling twice.
#[derive(Debug)]
pub struct BuildContext {
    project_root: PathBuf,
    output_root: PathBuf,
    mode: BuildMode,
    program_compiled: AtomicBool,
}

impl BuildContext {
    /// Create a context; `output_root` is usually `project_root/<output.root>`
    pub fn new(
        project_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        mode: BuildMode,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            output_root: output_root.into(),
            mode,
            program_compiled: AtomicBool::new(false),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    /// Whether the program compiler already ran in this invocation
    pub fn program_compiled(&self) -> bool {
        self.program_compiled.load(Ordering::SeqCst)
    }

    pub fn mark_program_compiled(&self) {
        self.program_compiled.store(true, Ordering::SeqCst);
    }

    /// Environment passed to every external tool
    pub fn tool_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("KILN_MODE".to_string(), self.mode.name().to_string());
        env.insert(
            "KILN_PROJECT_ROOT".to_string(),
            self.project_root.display().to_string(),
        );
        env.insert(
            "KILN_OUTPUT_ROOT".to_string(),
            self.output_root.display().to_string(),
        );
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_compiled_flag() {
        let ctx = BuildContext::new("/p", "/p/wwwroot", BuildMode::Incremental);
        assert!(!ctx.program_compiled());
        ctx.mark_program_compiled();
        assert!(ctx.program_compiled());
    }

    #[test]
    fn test_tool_env() {
        let ctx = BuildContext::new("/p", "/p/wwwroot", BuildMode::Full);
        let env = ctx.tool_env();

        assert_eq!(env.get("KILN_MODE"), Some(&"full".to_string()));
        assert_eq!(env.get("KILN_PROJECT_ROOT"), Some(&"/p".to_string()));
        assert_eq!(env.get("KILN_OUTPUT_ROOT"), Some(&"/p/wwwroot".to_string()));
    }
}
