/// Build system error types
use std::path::PathBuf;
use thiserror::Error;

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("Unknown task '{task}'{}", required_suffix(.required_by))]
    UnknownTask {
        task: String,
        required_by: Option<String>,
    },

    #[error("Task '{0}' is declared more than once")]
    DuplicateTask(String),

    #[error("Destination of '{group}' is outside the output root: {path}")]
    DestinationOutsideRoot { group: String, path: PathBuf },

    #[error("Invalid declaration: {0}")]
    InvalidDeclaration(String),

    #[error("Configuration error: {0}")]
    Config(#[from] kiln_config::ConfigError),

    #[error("Package '{name}' not found at {path}")]
    PackageNotFound { name: String, path: PathBuf },

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Task '{task}' failed: {message}")]
    TaskFailed { task: String, message: String },

    #[error("Tool '{name}' exited with code {exit_code}\n{output}")]
    ToolFailed {
        name: String,
        exit_code: i32,
        output: String,
    },

    #[error("Failed to run tool '{name}': {error}")]
    ToolExecution { name: String, error: String },

    #[error("I/O error at {path}: {error}")]
    IoError {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            error,
        }
    }

    /// Create an unknown task error
    pub fn unknown_task(task: impl Into<String>, required_by: Option<&str>) -> Self {
        Self::UnknownTask {
            task: task.into(),
            required_by: required_by.map(str::to_string),
        }
    }

    /// Create a task failure wrapping the underlying cause
    pub fn task_failed(task: impl Into<String>, cause: impl ToString) -> Self {
        Self::TaskFailed {
            task: task.into(),
            message: cause.to_string(),
        }
    }

    /// Whether this error is detected before any task executes
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::CircularDependency(_)
                | Self::UnknownTask { .. }
                | Self::DuplicateTask(_)
                | Self::DestinationOutsideRoot { .. }
                | Self::InvalidDeclaration(_)
                | Self::Config(_)
                | Self::PackageNotFound { .. }
        )
    }
}

/// A per-file transformation failure
///
/// Logged and skipped by the owning pipeline unless its group is strict.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{step} failed for {}: {}", .file.display(), .message.trim_end())]
pub struct TransformError {
    /// Source file that failed
    pub file: PathBuf,
    /// Step that failed (e.g., "style-compile")
    pub step: String,
    /// Diagnostic text from the step or collaborator
    pub message: String,
}

impl TransformError {
    pub fn new(file: impl Into<PathBuf>, step: impl Into<String>, message: impl ToString) -> Self {
        Self {
            file: file.into(),
            step: step.into(),
            message: message.to_string(),
        }
    }
}

fn required_suffix(required_by: &Option<String>) -> String {
    required_by
        .as_ref()
        .map(|r| format!(" (required by '{}')", r))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_task_message() {
        let err = BuildError::unknown_task("sass", Some("compile"));
        assert_eq!(
            err.to_string(),
            "Unknown task 'sass' (required by 'compile')"
        );

        let err = BuildError::unknown_task("deploy", None);
        assert_eq!(err.to_string(), "Unknown task 'deploy'");
    }

    #[test]
    fn test_configuration_classification() {
        assert!(BuildError::CircularDependency("a -> a".into()).is_configuration_error());
        assert!(BuildError::DuplicateTask("a".into()).is_configuration_error());
        assert!(!BuildError::task_failed("sass", "boom").is_configuration_error());
        assert!(!BuildError::Transform(TransformError::new("a.scss", "style-compile", "x"))
            .is_configuration_error());
    }

    #[test]
    fn test_transform_error_display() {
        let err = TransformError::new("Styles/site.scss", "style-compile", "expected '}'\n");
        assert_eq!(
            err.to_string(),
            "style-compile failed for Styles/site.scss: expected '}'"
        );
    }
}
