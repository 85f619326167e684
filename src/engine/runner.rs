#[cfg(feature = "server")]
pub(crate) mod http;
#[cfg(feature = "live")]
pub(crate) mod reload;
#[cfg(feature = "live")]
mod watch;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use indicatif::ProgressStyle;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::lock;
use crate::engine::{Node, Task, validate};
use crate::error::BuildError;
use crate::{Session, TaskContext};

#[cfg(feature = "live")]
pub(crate) use watch::{Registration, dispatch, register};

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Timing of every task that ran, in completion order.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub execution_times: Vec<(&'static str, TaskExecution)>,
}

impl Diagnostics {
    /// Names of the tasks that ran, in completion order.
    pub fn completed(&self) -> Vec<&'static str> {
        self.execution_times.iter().map(|(name, _)| *name).collect()
    }

    pub fn total(&self) -> Duration {
        self.execution_times
            .iter()
            .map(|(_, exec)| exec.duration)
            .sum()
    }
}

struct Run<'a> {
    session: &'a Session,
    root: tracing::Span,
    style: ProgressStyle,
    times: Mutex<Vec<(&'static str, TaskExecution)>>,
}

/// Validates and executes a task graph.
///
/// A series stops at its first failing member and fails with its error. A
/// parallel composition lets every member run to completion, then fails with
/// the first error in declaration order; later errors are logged.
pub fn run(node: &Node, session: &Session) -> Result<Diagnostics, BuildError> {
    validate(node)?;

    let leaves = node.leaves().len() as u64;

    let root = tracing::span!(Level::INFO, "building", mode = session.env.mode.as_str());
    root.pb_set_length(leaves);
    root.pb_set_style(
        &ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    root.pb_set_message("Running tasks...");

    let run = Run {
        session,
        root: root.clone(),
        style: ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        times: Mutex::new(Vec::new()),
    };

    let s = Instant::now();
    let result = {
        let _enter = root.enter();
        execute(&run, node)
    };

    let execution_times = std::mem::take(&mut *lock(&run.times));
    let diagnostics = Diagnostics { execution_times };

    result?;

    tracing::info!(
        "finished {} task(s) {}",
        diagnostics.execution_times.len(),
        crate::io::as_overhead(s)
    );

    Ok(diagnostics)
}

fn execute(run: &Run, node: &Node) -> Result<(), BuildError> {
    match node {
        Node::Task(task) => execute_task(run, task),
        Node::Sequence(nodes) => {
            for node in nodes {
                execute(run, node)?;
            }
            Ok(())
        }
        Node::Concurrent(nodes) => {
            let results: Vec<_> = nodes.par_iter().map(|node| execute(run, node)).collect();

            let mut errors = results.into_iter().filter_map(Result::err);
            match errors.next() {
                Some(first) => {
                    for error in errors {
                        tracing::error!("{error}");
                    }
                    Err(first)
                }
                None => Ok(()),
            }
        }
    }
}

fn execute_task(run: &Run, task: &Arc<dyn Task>) -> Result<(), BuildError> {
    let name = task.name();

    let span = tracing::span!(parent: &run.root, Level::INFO, "task", name = name);
    span.pb_set_style(&run.style);
    span.pb_set_message(&format!("Running {name}"));
    let _enter = span.enter();

    let context = TaskContext::new(run.session, span.clone());
    let start = Instant::now();

    // A panicking task only ever touches its own context, the session's
    // shared slots are behind mutexes that tolerate poisoning.
    let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task.run(&context)))
    {
        Ok(result) => result,
        Err(panic) => {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                format!("Task panicked: {s}")
            } else if let Some(s) = panic.downcast_ref::<String>() {
                format!("Task panicked: {s}")
            } else {
                String::from("Task panicked with unknown payload")
            };

            Err(anyhow::anyhow!(msg))
        }
    };

    let duration = start.elapsed();
    run.root.pb_inc(1);

    match result {
        Ok(()) => {
            tracing::info!("{name} done {}", crate::io::as_overhead(start));
            lock(&run.times).push((name, TaskExecution { start, duration }));
            Ok(())
        }
        Err(e) => Err(BuildError::Task(name, e)),
    }
}
