#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod config;
mod core;
pub mod engine;
mod error;
pub mod graph;
mod io;
#[cfg(feature = "logging")]
pub mod logging;
pub mod tasks;
mod tools;

use camino::Utf8PathBuf;

pub use crate::config::Config;
pub use crate::core::{Asset, Environment, LiveReload, Mode, Paths, Session, TaskContext, sources};
pub use crate::engine::{Diagnostics, Effect, Node, Task, TaskResult, parallel, series};
pub use crate::error::*;
pub use crate::graph::Entry;
pub use crate::tools::ToolError;

/// Runs an entry point against the project in `root`.
///
/// Loads `nagare.toml`, builds the environment for the entry's mode, runs
/// the entry graph once and then stays alive for as long as the services it
/// started need to, i.e. forever in development.
pub fn run(entry: Entry, root: impl Into<Utf8PathBuf>) -> Result<(), NagareError> {
    let root = root.into();
    let config = Config::load(&root)?;
    let session = Session::new(Environment::new(entry.mode(), root, config));

    let diagnostics = engine::run(&entry.graph(), &session)?;
    tracing::debug!(
        tasks = ?diagnostics.completed(),
        total = ?diagnostics.total(),
        "initial build finished"
    );

    session.idle()
}
