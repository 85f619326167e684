pub(crate) mod runner;
mod validate;

use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::TaskContext;

pub use crate::engine::runner::{Diagnostics, TaskExecution, run};
pub use crate::engine::validate::validate;

/// Result from a single executed task.
pub type TaskResult<T> = anyhow::Result<T, anyhow::Error>;

/// What a task does to the world, used to check ordering before a graph runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effect {
    /// Fixes the build mode, must precede every other task.
    Mode,
    /// Removes the output root.
    Clean,
    /// Writes into the output root.
    Output,
    /// Writes converted assets back into the source tree.
    Source,
    /// Serves the output root.
    Serve,
    /// Registers file watchers.
    Watch,
}

/// A named, indivisible unit of work.
pub trait Task: Send + Sync {
    fn name(&self) -> &'static str;

    fn effect(&self) -> Effect;

    fn run(&self, ctx: &TaskContext) -> TaskResult<()>;
}

/// A task graph: leaves composed in series or in parallel.
///
/// Graphs are plain data. They are built once per entry point and checked
/// with [`validate`] before anything runs.
#[derive(Clone)]
pub enum Node {
    Task(Arc<dyn Task>),
    /// Each member starts after the previous one completed.
    Sequence(Vec<Node>),
    /// All members start together, no ordering among them.
    Concurrent(Vec<Node>),
}

/// Sequential composition.
pub fn series(nodes: impl IntoIterator<Item = Node>) -> Node {
    Node::Sequence(nodes.into_iter().collect())
}

/// Concurrent composition.
pub fn parallel(nodes: impl IntoIterator<Item = Node>) -> Node {
    Node::Concurrent(nodes.into_iter().collect())
}

impl Node {
    pub fn task(task: impl Task + 'static) -> Self {
        Node::Task(Arc::new(task))
    }

    /// Wraps a closure as a leaf task.
    pub fn from_fn<F>(name: &'static str, effect: Effect, func: F) -> Self
    where
        F: Fn(&TaskContext) -> TaskResult<()> + Send + Sync + 'static,
    {
        Node::task(FnTask { name, effect, func })
    }

    /// All leaves in declaration order.
    pub fn leaves(&self) -> Vec<&Arc<dyn Task>> {
        let mut acc = Vec::new();
        self.collect_leaves(&mut acc);
        acc
    }

    fn collect_leaves<'a>(&'a self, acc: &mut Vec<&'a Arc<dyn Task>>) {
        match self {
            Node::Task(task) => acc.push(task),
            Node::Sequence(nodes) | Node::Concurrent(nodes) => {
                for node in nodes {
                    node.collect_leaves(acc);
                }
            }
        }
    }
}

impl From<Arc<dyn Task>> for Node {
    fn from(task: Arc<dyn Task>) -> Self {
        Node::Task(task)
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Task(task) => write!(f, "{}", task.name()),
            Node::Sequence(nodes) => f.debug_tuple("series").field(nodes).finish(),
            Node::Concurrent(nodes) => f.debug_tuple("parallel").field(nodes).finish(),
        }
    }
}

/// Renders the graph as a Mermaid diagram.
impl Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        validate::render_mermaid(self, f)
    }
}

struct FnTask<F> {
    name: &'static str,
    effect: Effect,
    func: F,
}

impl<F> Task for FnTask<F>
where
    F: Fn(&TaskContext) -> TaskResult<()> + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn effect(&self) -> Effect {
        self.effect
    }

    fn run(&self, ctx: &TaskContext) -> TaskResult<()> {
        (self.func)(ctx)
    }
}
