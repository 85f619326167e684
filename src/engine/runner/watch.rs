//! Watch mode is a dispatch table in front of the regular executor.
//!
//! 1. **Registration**: every route pairs a project-relative glob with the
//!    task it re-runs. The static part of each glob becomes a recursive
//!    `notify` watch (debounced), the full glob becomes a matcher.
//! 2. **Dispatch**: each debounced batch of changed paths is matched against
//!    the routes. Every matched task runs once per batch through [`run`],
//!    the same executor the initial build uses.
//!
//! Tasks notify the live-reload bus themselves, so browsers refresh as soon
//! as a re-run writes its output.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, channel};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};

use crate::engine::{Node, Task, run};
use crate::error::WatchError;
use crate::io::MATCH_OPTIONS;
use crate::{Environment, Session};

/// Maps changed paths to the tasks they re-run.
pub struct Dispatch {
    routes: Vec<(Pattern, Arc<dyn Task>)>,
}

impl Dispatch {
    /// Compiles project-relative globs against the canonical project root.
    pub(crate) fn new(
        root: &Utf8Path,
        routes: &[(&'static str, Arc<dyn Task>)],
    ) -> Result<Self, WatchError> {
        let root = Pattern::escape(root.as_str());

        let routes = routes
            .iter()
            .map(|(glob, task)| Ok((Pattern::new(&format!("{root}/{glob}"))?, task.clone())))
            .collect::<Result<_, WatchError>>()?;

        Ok(Self { routes })
    }

    /// Tasks matched by any of `paths`, each once, in route order.
    pub(crate) fn matches<'a>(
        &self,
        paths: impl IntoIterator<Item = &'a Path>,
    ) -> Vec<Arc<dyn Task>> {
        let paths: Vec<_> = paths.into_iter().collect();

        let mut seen = HashSet::new();
        self.routes
            .iter()
            .filter(|(pattern, _)| {
                paths
                    .iter()
                    .any(|path| pattern.matches_path_with(path, MATCH_OPTIONS))
            })
            .filter(|(_, task)| seen.insert(task.name()))
            .map(|(_, task)| task.clone())
            .collect()
    }
}

/// Live watchers plus the table their events are dispatched through.
pub struct Registration {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    rx: Receiver<DebounceEventResult>,
    table: Dispatch,
}

/// Starts watching every route. Events queue up until [`dispatch`] runs.
pub(crate) fn register(
    env: &Environment,
    routes: &[(&'static str, Arc<dyn Task>)],
) -> Result<Registration, WatchError> {
    let root = env.root.canonicalize_utf8()?;

    let (tx, rx) = channel();
    let mut debouncer = new_debouncer(Duration::from_millis(250), None, tx)?;

    let mut watched = HashSet::new();
    for (glob, _) in routes {
        watched.insert(resolve_watch_root(&root, glob));
    }

    // Collapse watched paths to reduce the number of watches
    for path in collapse_watch_paths(watched) {
        tracing::info!("watching {}", path);
        debouncer.watch(&path, RecursiveMode::Recursive)?;
    }

    Ok(Registration {
        _debouncer: debouncer,
        rx,
        table: Dispatch::new(&root, routes)?,
    })
}

/// Runs matched tasks for every debounced batch, for as long as the watcher
/// lives. A failing re-run is logged and the loop continues.
pub(crate) fn dispatch(session: &Session, registration: Registration) -> Result<(), WatchError> {
    tracing::info!("initial build completed, now watching for changes...");

    loop {
        match registration.rx.recv()? {
            Ok(events) => {
                let paths = events
                    .iter()
                    .filter(|de| !matches!(de.event.kind, EventKind::Access(_)))
                    .flat_map(|de| de.event.paths.iter())
                    .map(|path| path.as_path());

                for task in registration.table.matches(paths) {
                    tracing::info!("change detected, re-running {}...", task.name());

                    if let Err(e) = run(&Node::Task(task), session) {
                        tracing::error!("{e}");
                    }
                }
            }
            Err(errors) => {
                for e in errors {
                    tracing::error!("watch error: {e:?}");
                }
            }
        }
    }
}

/// Static directory a glob lives under, i.e. every component before the
/// first wildcard. Missing directories are replaced by their nearest
/// existing ancestor so the watch can still be registered.
pub(crate) fn resolve_watch_root(root: &Utf8Path, glob: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(glob);

    let split_idx = path
        .components()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or_else(|| path.components().count());

    let static_part: Utf8PathBuf = path.components().take(split_idx).collect();
    let mut watch_root = root.join(static_part);

    while !watch_root.is_dir() {
        match watch_root.parent() {
            Some(parent) if parent.starts_with(root) => watch_root = parent.to_path_buf(),
            _ => return root.to_path_buf(),
        }
    }

    watch_root
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive. This function sorts the paths and filters
/// out any path that is a subdirectory of a previously accepted path.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::engine::Effect;

    fn task(name: &'static str) -> Arc<dyn Task> {
        match Node::from_fn(name, Effect::Output, |_| Ok(())) {
            Node::Task(task) => task,
            _ => unreachable!(),
        }
    }

    fn routes() -> Vec<(&'static str, Arc<dyn Task>)> {
        let images = task("images");
        vec![
            ("src/html/**/*.html", task("html")),
            ("src/img/*.*", images.clone()),
            ("src/img/convert_images/*.*", task("convert_images")),
            ("src/img/*.png", images),
        ]
    }

    #[test]
    fn test_dispatch_matches_single_task() {
        let table = Dispatch::new(Utf8Path::new("/p"), &routes()).unwrap();

        let matched = table.matches([Path::new("/p/src/html/pages/about.html")]);
        let names: Vec<_> = matched.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["html"]);
    }

    #[test]
    fn test_dispatch_star_does_not_cross_directories() {
        let table = Dispatch::new(Utf8Path::new("/p"), &routes()).unwrap();

        let matched = table.matches([Path::new("/p/src/img/convert_images/a.png")]);
        let names: Vec<_> = matched.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["convert_images"]);
    }

    #[test]
    fn test_dispatch_deduplicates_tasks() {
        let table = Dispatch::new(Utf8Path::new("/p"), &routes()).unwrap();

        let matched = table.matches([Path::new("/p/src/img/a.png"), Path::new("/p/src/img/b.jpg")]);
        let names: Vec<_> = matched.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["images"]);
    }

    #[test]
    fn test_dispatch_ignores_unrelated() {
        let table = Dispatch::new(Utf8Path::new("/p"), &routes()).unwrap();
        assert!(table.matches([Path::new("/p/dev/index.html")]).is_empty());
    }

    #[test]
    fn test_resolve_watch_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("src/html")).unwrap();

        // Existing static part
        assert_eq!(
            resolve_watch_root(&root, "src/html/**/*.html"),
            root.join("src/html")
        );

        // Missing directory falls back to the nearest existing ancestor
        assert_eq!(
            resolve_watch_root(&root, "src/fonts/convert_fonts/*.ttf"),
            root.join("src")
        );
    }

    #[test]
    fn test_collapse_watch_paths() {
        let mut paths = HashSet::new();
        paths.insert(Utf8PathBuf::from("/a"));
        paths.insert(Utf8PathBuf::from("/a/b"));
        paths.insert(Utf8PathBuf::from("/a/b/c"));
        paths.insert(Utf8PathBuf::from("/b"));
        paths.insert(Utf8PathBuf::from("/c/d"));

        let collapsed = collapse_watch_paths(paths);

        // /a/b and /a/b/c are covered by /a.
        assert_eq!(
            collapsed,
            vec![
                Utf8PathBuf::from("/a"),
                Utf8PathBuf::from("/b"),
                Utf8PathBuf::from("/c/d")
            ]
        );
    }

    #[test]
    fn test_collapse_watch_paths_similar_names() {
        let mut paths = HashSet::new();
        paths.insert(Utf8PathBuf::from("/foo"));
        paths.insert(Utf8PathBuf::from("/foo-bar"));

        let collapsed = collapse_watch_paths(paths);

        // /foo-bar is not a subdirectory of /foo
        assert_eq!(
            collapsed,
            vec![Utf8PathBuf::from("/foo"), Utf8PathBuf::from("/foo-bar")]
        );
    }
}
