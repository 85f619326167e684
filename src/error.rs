#[cfg(feature = "live")]
use std::sync::mpsc::RecvError;

use thiserror::Error;

pub use anyhow::Error as RuntimeError;

#[derive(Debug, Error)]
pub enum NagareError {
    #[error("Couldn't load configuration:\n{0}")]
    Config(#[from] ConfigError),

    #[error("Invalid task graph:\n{0}")]
    Graph(#[from] GraphError),

    #[error("Error while building assets.\n{0}")]
    Build(#[from] BuildError),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error("Server stopped:\n{0}")]
    Server(anyhow::Error),

    #[error("Feature '{0}' is disabled in this build")]
    FeatureDisabled(&'static str),
}

/// Errors raised while collecting source files for a task.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Couldn't read source file.\n{0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read {0}.\n{1}")]
    Io(camino::Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse {0}.\n{1}")]
    Parse(camino::Utf8PathBuf, toml::de::Error),
}

/// Structural problems found while validating a task graph before it runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("A {0} composition must contain at least one member")]
    Empty(&'static str),

    #[error("Cycle detected in task graph")]
    Cycle,

    #[error("Task '{after}' may start before '{before}' completes")]
    Unordered {
        before: &'static str,
        after: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Task '{0}':\n{1:?}")]
    Task(&'static str, anyhow::Error),
}

impl BuildError {
    /// Name of the task that failed, if the failure came from a task body.
    pub fn task(&self) -> Option<&'static str> {
        match self {
            BuildError::Task(name, _) => Some(name),
            BuildError::Graph(_) => None,
        }
    }
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error(transparent)]
    Recv(#[from] RecvError),
}
