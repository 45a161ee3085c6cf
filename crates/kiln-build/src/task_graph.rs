//! Task graph construction and validation
//!
//! Tasks are declared by name and resolved to [`TaskId`] handles when the
//! graph is built. Duplicate names, unknown references and cycles are all
//! rejected here, before anything runs.

use crate::error::{BuildError, BuildResult};
use crate::scheduler::WorkUnit;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Handle to a task in a built graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(usize);

/// A task declaration
#[derive(Clone)]
pub struct TaskDef {
    /// Task name
    pub name: String,
    /// One-line description for listings
    pub description: Option<String>,
    /// Prerequisites run concurrently, in no particular order
    pub dependencies: Vec<String>,
    /// Prerequisites run one after another, in list order
    pub sequence: Vec<String>,
    /// The task's own work, run after all prerequisites
    pub work: Option<Arc<dyn WorkUnit>>,
}

impl TaskDef {
    /// Create a new task with no prerequisites and no work
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            dependencies: Vec::new(),
            sequence: Vec::new(),
            work: None,
        }
    }

    /// Add unordered prerequisites
    pub fn with_dependencies<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.dependencies = names.into_iter().map(Into::into).collect();
        self
    }

    /// Add ordered prerequisites
    pub fn with_sequence<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.sequence = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the task's work unit
    pub fn with_work(mut self, work: impl WorkUnit + 'static) -> Self {
        self.work = Some(Arc::new(work));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl std::fmt::Debug for TaskDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDef")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("sequence", &self.sequence)
            .field("work", &self.work.is_some())
            .finish()
    }
}

/// A resolved task
#[derive(Clone)]
pub struct TaskNode {
    pub name: String,
    pub description: Option<String>,
    pub dependencies: Vec<TaskId>,
    pub sequence: Vec<TaskId>,
    pub work: Option<Arc<dyn WorkUnit>>,
}

impl TaskNode {
    /// All prerequisites, dependencies first
    pub fn prerequisites(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.dependencies.iter().chain(self.sequence.iter()).copied()
    }
}

/// Collects task declarations and validates them into a [`TaskGraph`]
#[derive(Debug, Default)]
pub struct TaskGraphBuilder {
    tasks: Vec<TaskDef>,
}

impl TaskGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task
    pub fn task(mut self, task: TaskDef) -> Self {
        self.tasks.push(task);
        self
    }

    /// Validate and resolve all declarations
    pub fn build(self) -> BuildResult<TaskGraph> {
        let mut by_name = HashMap::new();
        for (index, task) in self.tasks.iter().enumerate() {
            if by_name.insert(task.name.clone(), TaskId(index)).is_some() {
                return Err(BuildError::DuplicateTask(task.name.clone()));
            }
        }

        let resolve = |names: &[String], required_by: &str| -> BuildResult<Vec<TaskId>> {
            names
                .iter()
                .map(|name| {
                    by_name
                        .get(name)
                        .copied()
                        .ok_or_else(|| BuildError::unknown_task(name, Some(required_by)))
                })
                .collect()
        };

        let mut nodes = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            nodes.push(TaskNode {
                name: task.name.clone(),
                description: task.description.clone(),
                dependencies: resolve(&task.dependencies, &task.name)?,
                sequence: resolve(&task.sequence, &task.name)?,
                work: task.work.clone(),
            });
        }

        let graph = TaskGraph { nodes, by_name };
        if let Some(cycle) = graph.find_cycle() {
            return Err(BuildError::CircularDependency(cycle));
        }
        Ok(graph)
    }
}

/// A validated, acyclic task graph
#[derive(Clone)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    by_name: HashMap<String, TaskId>,
}

impl TaskGraph {
    /// Look up a task by name
    pub fn id(&self, name: &str) -> BuildResult<TaskId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| BuildError::unknown_task(name, None))
    }

    pub fn node(&self, id: TaskId) -> &TaskNode {
        &self.nodes[id.0]
    }

    pub fn name(&self, id: TaskId) -> &str {
        &self.nodes[id.0].name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Tasks in declaration order
    pub fn tasks(&self) -> impl Iterator<Item = (TaskId, &TaskNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (TaskId(i), n))
    }

    /// Group the work-carrying tasks reachable from `name` into waves
    ///
    /// Tasks in one wave may run concurrently; each wave starts once the
    /// previous one has finished. Tasks without work only order their
    /// prerequisites and do not appear.
    pub fn execution_plan(&self, name: &str) -> BuildResult<Vec<Vec<String>>> {
        let root = self.id(name)?;
        let mut ends: HashMap<TaskId, usize> = HashMap::new();
        let mut starts: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        self.plan_task(root, 0, &mut ends, &mut starts);

        Ok(starts
            .into_values()
            .map(|mut wave| {
                wave.sort();
                wave
            })
            .collect())
    }

    /// Returns the wave after which `id` has finished
    fn plan_task(
        &self,
        id: TaskId,
        floor: usize,
        ends: &mut HashMap<TaskId, usize>,
        starts: &mut BTreeMap<usize, Vec<String>>,
    ) -> usize {
        if let Some(&end) = ends.get(&id) {
            return end;
        }

        let node = self.node(id);
        let mut ready = floor;
        for &dependency in &node.dependencies {
            ready = ready.max(self.plan_task(dependency, floor, ends, starts));
        }
        for &member in &node.sequence {
            ready = ready.max(self.plan_task(member, ready, ends, starts));
        }

        let end = if node.work.is_some() {
            starts.entry(ready).or_default().push(node.name.clone());
            ready + 1
        } else {
            ready
        };
        ends.insert(id, end);
        end
    }

    /// Find a cycle in the graph (for error reporting)
    fn find_cycle(&self) -> Option<String> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for index in 0..self.nodes.len() {
            if let Some(cycle) = self.dfs_find_cycle(TaskId(index), &mut visited, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    /// DFS to find a cycle
    fn dfs_find_cycle(
        &self,
        id: TaskId,
        visited: &mut HashSet<TaskId>,
        stack: &mut Vec<TaskId>,
    ) -> Option<String> {
        if let Some(start) = stack.iter().position(|&t| t == id) {
            let mut path: Vec<&str> = stack[start..].iter().map(|&t| self.name(t)).collect();
            path.push(self.name(id));
            return Some(path.join(" -> "));
        }

        if !visited.insert(id) {
            return None;
        }

        stack.push(id);
        for prerequisite in self.node(id).prerequisites() {
            if let Some(cycle) = self.dfs_find_cycle(prerequisite, visited, stack) {
                return Some(cycle);
            }
        }
        stack.pop();
        None
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.nodes.iter().map(|n| &n.name))
            .finish()
    }
}
