//! Task scheduler
//!
//! Runs a named task and everything it transitively requires. Each task runs
//! at most once per invocation: its execution is a memoised shared future, so
//! every dependent awaits the same run. Dependencies are polled concurrently,
//! sequence members strictly one after another, and the task's own work only
//! after both.
//!
//! The first failing work unit aborts the invocation. Tasks that have not
//! started yet are cancelled, tasks already running are allowed to finish, and
//! the first failure is reported.

use crate::context::BuildContext;
use crate::error::{BuildError, BuildResult};
use crate::mode::BuildMode;
use crate::task_graph::{TaskGraph, TaskId};
use async_trait::async_trait;
use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// A task's own work
#[async_trait]
pub trait WorkUnit: Send + Sync {
    async fn run(&self, ctx: &BuildContext) -> BuildResult<()>;
}

/// Work unit from a closure of the build mode
pub struct FnWork<F> {
    f: F,
}

impl<F> FnWork<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> WorkUnit for FnWork<F>
where
    F: Fn(BuildMode) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BuildResult<()>> + Send + 'static,
{
    async fn run(&self, ctx: &BuildContext) -> BuildResult<()> {
        (self.f)(ctx.mode()).await
    }
}

/// A task whose work ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub name: String,
    pub duration: Duration,
}

/// Summary of one successful invocation
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Requested task
    pub task: String,
    pub mode: BuildMode,
    /// Work-carrying tasks in completion order
    pub executed: Vec<TaskRecord>,
    pub total_time: Duration,
}

impl RunReport {
    /// Whether a task's work ran
    pub fn ran(&self, name: &str) -> bool {
        self.executed.iter().any(|r| r.name == name)
    }
}

#[derive(Debug, Clone)]
struct TaskFailure {
    task: String,
    message: String,
}

#[derive(Debug, Clone)]
enum Halt {
    Failed(TaskFailure),
    Cancelled,
}

type TaskRun = Shared<BoxFuture<'static, Result<(), Halt>>>;

/// Per-invocation scheduling state
struct Invocation {
    graph: Arc<TaskGraph>,
    ctx: Arc<BuildContext>,
    runs: Mutex<HashMap<TaskId, TaskRun>>,
    aborted: AtomicBool,
    first_failure: Mutex<Option<TaskFailure>>,
    executed: Mutex<Vec<TaskRecord>>,
}

impl Invocation {
    /// The memoised run of a task, created on first request
    fn task_run(self: &Arc<Self>, id: TaskId) -> TaskRun {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(run) = runs.get(&id) {
            return run.clone();
        }
        let this = Arc::clone(self);
        let run = async move { this.execute(id).await }.boxed().shared();
        runs.insert(id, run.clone());
        run
    }

    async fn execute(self: Arc<Self>, id: TaskId) -> Result<(), Halt> {
        let node = self.graph.node(id).clone();

        let dependencies: Vec<TaskRun> = node
            .dependencies
            .iter()
            .map(|&dependency| self.task_run(dependency))
            .collect();
        let mut halt = None;
        for result in join_all(dependencies).await {
            match result {
                Err(Halt::Failed(failure)) => {
                    halt = Some(Halt::Failed(failure));
                    break;
                }
                Err(Halt::Cancelled) => halt = Some(Halt::Cancelled),
                Ok(()) => {}
            }
        }
        if let Some(halt) = halt {
            return Err(halt);
        }

        for &member in &node.sequence {
            self.task_run(member).await?;
        }

        let Some(work) = node.work else {
            return Ok(());
        };
        if self.aborted.load(Ordering::SeqCst) {
            debug!(task = %node.name, "cancelled");
            return Err(Halt::Cancelled);
        }

        info!(task = %node.name, "starting");
        let start = Instant::now();
        match work.run(&self.ctx).await {
            Ok(()) => {
                let duration = start.elapsed();
                info!(task = %node.name, elapsed_ms = duration.as_millis() as u64, "finished");
                self.executed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(TaskRecord {
                        name: node.name,
                        duration,
                    });
                Ok(())
            }
            Err(e) => {
                error!(task = %node.name, "{}", e);
                let failure = TaskFailure {
                    task: node.name,
                    message: e.to_string(),
                };
                self.abort(&failure);
                Err(Halt::Failed(failure))
            }
        }
    }

    fn abort(&self, failure: &TaskFailure) {
        self.aborted.store(true, Ordering::SeqCst);
        let mut first = self
            .first_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if first.is_none() {
            *first = Some(failure.clone());
        }
    }
}

/// Runs tasks from a validated graph
#[derive(Debug, Clone)]
pub struct Scheduler {
    graph: Arc<TaskGraph>,
}

impl Scheduler {
    pub fn new(graph: TaskGraph) -> Self {
        Self {
            graph: Arc::new(graph),
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Run `name` and its prerequisites under `ctx`
    pub async fn run(&self, name: &str, ctx: Arc<BuildContext>) -> BuildResult<RunReport> {
        let root = self.graph.id(name)?;
        let mode = ctx.mode();
        let invocation = Arc::new(Invocation {
            graph: Arc::clone(&self.graph),
            ctx,
            runs: Mutex::new(HashMap::new()),
            aborted: AtomicBool::new(false),
            first_failure: Mutex::new(None),
            executed: Mutex::new(Vec::new()),
        });

        info!(task = name, mode = %mode, "running");
        let start = Instant::now();
        let result = invocation.task_run(root).await;
        let total_time = start.elapsed();
        // Unpolled runs hold the invocation alive
        invocation
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let first_failure = invocation
            .first_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match (result, first_failure) {
            (Ok(()), _) => {
                let executed = std::mem::take(
                    &mut *invocation
                        .executed
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner),
                );
                info!(task = name, elapsed_ms = total_time.as_millis() as u64, "done");
                Ok(RunReport {
                    task: name.to_string(),
                    mode,
                    executed,
                    total_time,
                })
            }
            (Err(_), Some(failure)) | (Err(Halt::Failed(failure)), None) => {
                Err(BuildError::TaskFailed {
                    task: failure.task,
                    message: failure.message,
                })
            }
            (Err(Halt::Cancelled), None) => Err(BuildError::task_failed(name, "cancelled")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_graph::{TaskDef, TaskGraphBuilder};
    use std::sync::atomic::AtomicUsize;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Work that logs `start:name` and `end:name` around a short sleep
    fn logged(name: &str, log: &Log, millis: u64) -> TaskDef {
        let log = Arc::clone(log);
        let task = name.to_string();
        TaskDef::new(name).with_work(FnWork::new(move |_| {
            let log = Arc::clone(&log);
            let task = task.clone();
            async move {
                log.lock().unwrap().push(format!("start:{task}"));
                tokio::time::sleep(Duration::from_millis(millis)).await;
                log.lock().unwrap().push(format!("end:{task}"));
                Ok(())
            }
        }))
    }

    fn failing(name: &str) -> TaskDef {
        TaskDef::new(name).with_work(FnWork::new(|_| async {
            Err(BuildError::InvalidDeclaration("boom".into()))
        }))
    }

    fn ctx() -> Arc<BuildContext> {
        Arc::new(BuildContext::new("/p", "/p/out", BuildMode::Incremental))
    }

    fn position(log: &[String], entry: &str) -> usize {
        log.iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{entry} missing from {log:?}"))
    }

    #[tokio::test]
    async fn test_dependencies_finish_first() {
        let log = Log::default();
        let graph = TaskGraphBuilder::new()
            .task(logged("a", &log, 20))
            .task(logged("b", &log, 5))
            .task(logged("c", &log, 1).with_dependencies(["a", "b"]))
            .build()
            .unwrap();

        let report = Scheduler::new(graph).run("c", ctx()).await.unwrap();
        let log = log.lock().unwrap().clone();

        assert!(position(&log, "start:c") > position(&log, "end:a"));
        assert!(position(&log, "start:c") > position(&log, "end:b"));
        // a and b overlap
        assert!(position(&log, "start:b") < position(&log, "end:a"));
        assert_eq!(report.executed.last().unwrap().name, "c");
    }

    #[tokio::test]
    async fn test_sequence_runs_in_order() {
        let log = Log::default();
        let graph = TaskGraphBuilder::new()
            .task(logged("a", &log, 20))
            .task(logged("b", &log, 1))
            .task(TaskDef::new("s").with_sequence(["a", "b"]))
            .build()
            .unwrap();

        Scheduler::new(graph).run("s", ctx()).await.unwrap();
        let log = log.lock().unwrap().clone();

        assert_eq!(log, vec!["start:a", "end:a", "start:b", "end:b"]);
    }

    #[tokio::test]
    async fn test_diamond_runs_shared_prerequisite_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let graph = TaskGraphBuilder::new()
            .task(TaskDef::new("d").with_work(FnWork::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })))
            .task(TaskDef::new("b").with_dependencies(["d"]))
            .task(TaskDef::new("c").with_sequence(["d"]))
            .task(TaskDef::new("a").with_dependencies(["b", "c"]))
            .build()
            .unwrap();

        let report = Scheduler::new(graph).run("a", ctx()).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(report.ran("d"));
        assert_eq!(report.executed.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_cancels_unstarted_tasks() {
        let log = Log::default();
        let graph = TaskGraphBuilder::new()
            .task(failing("a"))
            .task(logged("b", &log, 1))
            .task(TaskDef::new("s").with_sequence(["a", "b"]))
            .build()
            .unwrap();

        let err = Scheduler::new(graph).run("s", ctx()).await.unwrap_err();
        match err {
            BuildError::TaskFailed { task, message } => {
                assert_eq!(task, "a");
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_running_siblings_drain_after_failure() {
        let log = Log::default();
        let graph = TaskGraphBuilder::new()
            .task(failing("fast"))
            .task(logged("slow", &log, 30))
            .task(logged("after", &log, 1))
            .task(TaskDef::new("both").with_dependencies(["slow", "fast"]))
            .task(TaskDef::new("top").with_sequence(["both", "after"]))
            .build()
            .unwrap();

        let err = Scheduler::new(graph).run("top", ctx()).await.unwrap_err();
        assert!(matches!(err, BuildError::TaskFailed { ref task, .. } if task == "fast"));

        let log = log.lock().unwrap().clone();
        assert_eq!(log, vec!["start:slow", "end:slow"]);
    }

    #[tokio::test]
    async fn test_mode_reaches_work_units() {
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        let graph = TaskGraphBuilder::new()
            .task(TaskDef::new("m").with_work(FnWork::new(move |mode| {
                *slot.lock().unwrap() = Some(mode);
                async { Ok(()) }
            })))
            .build()
            .unwrap();

        let ctx = Arc::new(BuildContext::new("/p", "/p/out", BuildMode::Full));
        let report = Scheduler::new(graph).run("m", ctx).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(BuildMode::Full));
        assert_eq!(report.mode, BuildMode::Full);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let graph = TaskGraphBuilder::new().build().unwrap();
        let err = Scheduler::new(graph).run("deploy", ctx()).await.unwrap_err();
        assert!(matches!(err, BuildError::UnknownTask { .. }));
    }
}
