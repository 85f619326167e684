use std::sync::mpsc::Sender;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use camino::{Utf8Path, Utf8PathBuf};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::Config;

/// Source tree layout, relative to the project root.
pub mod sources {
    pub const HTML: &str = "src/html";
    pub const HTML_GLOB: &str = "src/html/**/*.html";
    pub const HTML_COMPONENTS: &str = "src/html/components";
    pub const SCSS_ENTRY: &str = "src/scss/styles.scss";
    pub const SCSS_GLOB: &str = "src/scss/**/*.scss";
    pub const JS_ENTRY: &str = "src/js/main.js";
    pub const JS_GLOB: &str = "src/js/**/*.js";
    pub const FONTS: &str = "src/fonts";
    pub const FONTS_GLOB: &str = "src/fonts/*.*";
    pub const FONTS_STAGING_GLOB: &str = "src/fonts/convert_fonts/*.*";
    pub const FONTS_STAGING_TTF: &str = "src/fonts/convert_fonts/*.ttf";
    pub const IMG: &str = "src/img";
    pub const IMG_GLOB: &str = "src/img/*.*";
    pub const IMG_STAGING_GLOB: &str = "src/img/convert_images/*.*";
}

/// Selects output directories and which transformations run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Unminified output with inline source maps.
    #[default]
    Dev,
    /// Minified, browser-compatible output without source maps.
    Prod,
}

impl Mode {
    pub const fn is_prod(self) -> bool {
        matches!(self, Mode::Prod)
    }

    pub const fn paths(self) -> &'static Paths {
        match self {
            Mode::Dev => &DEV,
            Mode::Prod => &PROD,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Mode::Dev => "dev",
            Mode::Prod => "prod",
        }
    }
}

/// Asset classes with a dedicated output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asset {
    Root,
    Css,
    Js,
    Fonts,
    Img,
}

/// One row of the output path table.
#[derive(Debug)]
pub struct Paths {
    pub root: &'static str,
    pub css: &'static str,
    pub js: &'static str,
    pub fonts: &'static str,
    pub img: &'static str,
}

impl Paths {
    pub const fn get(&self, asset: Asset) -> &'static str {
        match asset {
            Asset::Root => self.root,
            Asset::Css => self.css,
            Asset::Js => self.js,
            Asset::Fonts => self.fonts,
            Asset::Img => self.img,
        }
    }
}

const DEV: Paths = Paths {
    root: "dev",
    css: "dev/css",
    js: "dev/js",
    fonts: "dev/fonts",
    img: "dev/img",
};

const PROD: Paths = Paths {
    root: "prod",
    css: "prod/css",
    js: "prod/js",
    fonts: "prod/fonts",
    img: "prod/img",
};

/// Immutable build configuration shared by every task of a run.
///
/// The environment is built once per entry point, before the graph runs, and
/// tasks read the mode from it when they are invoked. Nothing mutates it
/// afterwards.
#[derive(Debug, Clone)]
pub struct Environment {
    /// The name of the generator.
    pub generator: &'static str,
    /// Development or production.
    pub mode: Mode,
    /// Project root, all source and output paths are relative to it.
    pub root: Utf8PathBuf,
    /// Settings loaded from `nagare.toml`.
    pub config: Config,
}

impl Environment {
    /// A relative `root` is anchored at the current directory, so every path
    /// a task derives from it (and every glob match) is absolute.
    pub fn new(mode: Mode, root: impl Into<Utf8PathBuf>, config: Config) -> Self {
        Self {
            generator: "nagare",
            mode,
            root: absolute(root.into()),
            config,
        }
    }

    /// Resolves a project-relative path against the root.
    pub fn resolve(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.root.join(path)
    }

    /// Output directory for an asset class in the current mode.
    pub fn out(&self, asset: Asset) -> Utf8PathBuf {
        self.resolve(self.mode.paths().get(asset))
    }
}

fn absolute(root: Utf8PathBuf) -> Utf8PathBuf {
    let root = match std::path::absolute(&root).map(Utf8PathBuf::try_from) {
        Ok(Ok(path)) => path,
        _ => root,
    };
    crate::io::normalize_path(&root)
}

/// In-process notification bus for browser reloads.
///
/// Tasks publish after writing output. Until a reload server connects a
/// sender, publishing does nothing.
#[derive(Debug, Default)]
pub struct LiveReload {
    tx: Mutex<Option<Sender<()>>>,
    port: Mutex<Option<u16>>,
}

impl LiveReload {
    pub fn notify(&self) {
        if let Some(tx) = lock(&self.tx).as_ref()
            && tx.send(()).is_err()
        {
            tracing::warn!("live reload channel closed");
        }
    }

    /// Port of the WebSocket reload server, once it runs.
    pub fn port(&self) -> Option<u16> {
        *lock(&self.port)
    }

    #[cfg_attr(not(feature = "live"), allow(dead_code))]
    pub(crate) fn connect(&self, tx: Sender<()>, port: u16) {
        *lock(&self.tx) = Some(tx);
        *lock(&self.port) = Some(port);
    }
}

/// Long-lived services started by tasks and owned by the session.
#[derive(Default)]
pub(crate) struct Services {
    pub(crate) server: Mutex<Option<JoinHandle<anyhow::Result<()>>>>,
    #[cfg(feature = "live")]
    pub(crate) watch: Mutex<Option<crate::engine::runner::Registration>>,
}

/// Everything one invocation of an entry point shares: the environment, the
/// reload bus and the services tasks start.
pub struct Session {
    pub env: Environment,
    pub reload: LiveReload,
    pub(crate) services: Services,
}

impl Session {
    pub fn new(env: Environment) -> Self {
        Self {
            env,
            reload: LiveReload::default(),
            services: Services::default(),
        }
    }

    /// Blocks for as long as a service started during the run needs the
    /// process: dispatches watch events forever when watchers were
    /// registered, otherwise waits on the HTTP server. Returns immediately
    /// when neither was started.
    pub fn idle(&self) -> Result<(), crate::NagareError> {
        #[cfg(feature = "live")]
        if let Some(registration) = lock(&self.services.watch).take() {
            crate::engine::runner::dispatch(self, registration)?;
        }

        if let Some(server) = lock(&self.services.server).take() {
            tracing::info!("serving, press Ctrl+C to stop");
            return match server.join() {
                Ok(result) => result.map_err(crate::NagareError::Server),
                Err(_) => Err(crate::NagareError::Server(anyhow::anyhow!(
                    "server thread panicked"
                ))),
            };
        }

        Ok(())
    }
}

/// The context passed to every task execution.
pub struct TaskContext<'a> {
    /// Build configuration for this run.
    pub env: &'a Environment,
    pub(crate) session: &'a Session,
    /// Tracing span assigned to this task.
    pub(crate) span: tracing::Span,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(session: &'a Session, span: tracing::Span) -> Self {
        Self {
            env: &session.env,
            session,
            span,
        }
    }

    /// Publishes a reload to connected browsers.
    pub fn notify(&self) {
        self.session.reload.notify();
    }

    /// Updates the progress message of this task.
    pub fn progress(&self, msg: impl AsRef<str>) {
        self.span.pb_set_message(msg.as_ref());
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_table() {
        assert_eq!(Mode::Dev.paths().get(Asset::Root), "dev");
        assert_eq!(Mode::Dev.paths().get(Asset::Css), "dev/css");
        assert_eq!(Mode::Prod.paths().get(Asset::Js), "prod/js");
        assert_eq!(Mode::Prod.paths().get(Asset::Fonts), "prod/fonts");
        assert_eq!(Mode::Prod.paths().get(Asset::Img), "prod/img");
    }

    #[test]
    fn test_environment_out() {
        let env = Environment::new(Mode::Prod, "/project", Config::default());
        assert_eq!(env.out(Asset::Css), Utf8Path::new("/project/prod/css"));
        assert_eq!(env.resolve(sources::HTML), Utf8Path::new("/project/src/html"));
    }

    #[test]
    fn test_relative_root_is_anchored() {
        let cwd = Utf8PathBuf::try_from(std::env::current_dir().unwrap()).unwrap();

        let env = Environment::new(Mode::Dev, ".", Config::default());
        assert_eq!(env.root, cwd);

        let env = Environment::new(Mode::Dev, "./site/../web", Config::default());
        assert_eq!(env.root, cwd.join("web"));
        assert_eq!(env.out(Asset::Root), cwd.join("web/dev"));
    }

    #[test]
    fn test_default_mode_is_dev() {
        assert_eq!(Mode::default(), Mode::Dev);
        assert!(!Mode::Dev.is_prod());
        assert!(Mode::Prod.is_prod());
    }

    #[test]
    fn test_reload_without_server_is_noop() {
        let reload = LiveReload::default();
        reload.notify();
        assert_eq!(reload.port(), None);
    }

    #[test]
    fn test_reload_delivers_after_connect() {
        let reload = LiveReload::default();
        let (tx, rx) = std::sync::mpsc::channel();
        reload.connect(tx, 1337);
        reload.notify();
        assert!(rx.try_recv().is_ok());
        assert_eq!(reload.port(), Some(1337));
    }
}
