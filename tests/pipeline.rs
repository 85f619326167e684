//! End-to-end runs of task graphs against throwaway project roots.
//!
//! Only tasks that need no external programs are exercised here: esbuild and
//! fonttools are covered by the unit tests of their argument builders.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use image::{Rgba, RgbaImage};
use nagare::tasks::{Clean, ConvertImages, Fonts, Html, Images, Styles, ToProd};
use nagare::{BuildError, Config, Effect, Environment, GraphError, Mode, Node, Session, parallel, series};

struct Project {
    _guard: tempfile::TempDir,
    root: Utf8PathBuf,
}

impl Project {
    fn new() -> Self {
        let guard = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(guard.path().to_path_buf()).unwrap();
        Self {
            _guard: guard,
            root,
        }
    }

    fn write(&self, path: &str, data: impl AsRef<[u8]>) -> &Self {
        let path = self.root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
        self
    }

    fn png(&self, path: &str) -> &Self {
        let path = self.root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbaImage::from_pixel(4, 4, Rgba([0, 128, 255, 255]))
            .save(&path)
            .unwrap();
        self
    }

    fn path(&self, path: &str) -> Utf8PathBuf {
        self.root.join(path)
    }

    fn read(&self, path: &str) -> String {
        fs::read_to_string(self.path(path)).unwrap()
    }

    fn session(&self, mode: Mode) -> Session {
        Session::new(Environment::new(mode, self.root.clone(), Config::default()))
    }
}

fn recorder(name: &'static str, ran: &Arc<AtomicBool>) -> Node {
    let ran = ran.clone();
    Node::from_fn(name, Effect::Output, move |_| {
        ran.store(true, Ordering::SeqCst);
        Ok(())
    })
}

fn site() -> Project {
    let project = Project::new();
    project
        .write(
            "src/html/index.html",
            "<body>@@include('components/nav.html')<img src=\"img/a.png\"></body>",
        )
        .write("src/html/components/nav.html", "<nav>home</nav>")
        .write("src/html/pages/about.html", "<h1>about</h1>")
        .write("src/scss/_colors.scss", "$accent: #c0ffee;")
        .write(
            "src/scss/styles.scss",
            "@use 'colors';\n.hero { background: colors.$accent; }",
        )
        .write("src/fonts/inter.woff2", "font")
        .png("src/img/convert_images/a.png");
    project
}

#[test]
fn dev_pipeline_builds_without_external_tools() {
    let project = site();
    let session = project.session(Mode::Dev);

    let graph = series([
        Node::task(Clean),
        Node::task(ConvertImages),
        Node::task(Html),
        Node::task(Styles),
        Node::task(Images),
        Node::task(Fonts),
    ]);

    let diagnostics = nagare::engine::run(&graph, &session).unwrap();
    assert_eq!(
        diagnostics.completed(),
        vec!["clean", "convert_images", "html", "styles", "images", "fonts"]
    );

    // Pages keep their layout, partials are inlined but never emitted.
    assert_eq!(
        project.read("dev/index.html"),
        "<body><nav>home</nav><img src=\"img/a.png\"></body>"
    );
    assert_eq!(project.read("dev/pages/about.html"), "<h1>about</h1>");
    assert!(!project.path("dev/components").exists());

    let css = project.read("dev/css/styles.min.css");
    assert!(css.contains("#c0ffee"));
    assert!(css.contains("sourceMappingURL=data:application/json"));

    // Conversions land in the source tree and are then copied out.
    assert!(project.path("src/img/a.webp").is_file());
    assert!(project.path("src/img/a.png").is_file());
    assert!(project.path("dev/img/a.webp").is_file());
    assert!(project.path("dev/img/a.png").is_file());
    assert_eq!(project.read("dev/fonts/inter.woff2"), "font");
}

#[test]
fn clean_runs_before_any_write() {
    let project = site();
    project.write("dev/stale.html", "old");
    let session = project.session(Mode::Dev);

    nagare::engine::run(&series([Node::task(Clean), Node::task(Html)]), &session).unwrap();

    assert!(!project.path("dev/stale.html").exists());
    assert!(project.path("dev/index.html").is_file());
}

#[test]
fn clean_without_output_root_succeeds() {
    let project = Project::new();
    let session = project.session(Mode::Prod);

    nagare::engine::run(&Node::task(Clean), &session).unwrap();
    assert!(!project.path("prod").exists());
}

#[test]
fn unordered_clean_is_rejected_before_running() {
    let project = site();
    let session = project.session(Mode::Dev);

    let result = nagare::engine::run(&parallel([Node::task(Clean), Node::task(Html)]), &session);

    assert!(matches!(
        result,
        Err(BuildError::Graph(GraphError::Unordered {
            before: "clean",
            after: "html"
        }))
    ));
    assert!(!project.path("dev").exists());
}

#[test]
fn failing_html_stops_the_production_series() {
    let project = Project::new();
    project.write("src/html/index.html", "@@include('components/missing.html')");
    let session = project.session(Mode::Prod);

    let styles = Arc::new(AtomicBool::new(false));
    let scripts = Arc::new(AtomicBool::new(false));

    let graph = series([
        Node::task(ToProd),
        Node::task(Clean),
        Node::task(Html),
        recorder("styles", &styles),
        recorder("scripts", &scripts),
    ]);

    let err = nagare::engine::run(&graph, &session).unwrap_err();
    assert_eq!(err.task(), Some("html"));
    assert!(!styles.load(Ordering::SeqCst));
    assert!(!scripts.load(Ordering::SeqCst));
}

#[test]
fn production_html_offers_webp() {
    let project = site();
    let session = project.session(Mode::Prod);

    let graph = series([Node::task(ToProd), Node::task(Clean), Node::task(Html)]);
    nagare::engine::run(&graph, &session).unwrap();

    assert_eq!(
        project.read("prod/index.html"),
        "<body><nav>home</nav><picture><source srcset=\"img/a.webp\" type=\"image/webp\"><img src=\"img/a.png\"></picture></body>"
    );
}

#[test]
fn to_prod_rejects_development_environment() {
    let project = Project::new();
    let session = project.session(Mode::Dev);

    let err = nagare::engine::run(&Node::task(ToProd), &session).unwrap_err();
    assert_eq!(err.task(), Some("to_prod"));
}

#[test]
fn fonts_copies_only_newer_files() {
    let project = site();
    let session = project.session(Mode::Dev);

    nagare::engine::run(&Node::task(Fonts), &session).unwrap();
    let copy = project.path("dev/fonts/inter.woff2");

    // The copy stays newer than the rewritten source.
    let later = SystemTime::UNIX_EPOCH + Duration::from_secs(4_000_000_000);
    set_modified(&copy, later);
    project.write("src/fonts/inter.woff2", "changed");
    set_modified(&project.path("src/fonts/inter.woff2"), later - Duration::from_secs(30));

    nagare::engine::run(&Node::task(Fonts), &session).unwrap();
    assert_eq!(fs::read_to_string(&copy).unwrap(), "font");

    set_modified(&project.path("src/fonts/inter.woff2"), later + Duration::from_secs(30));
    nagare::engine::run(&Node::task(Fonts), &session).unwrap();
    assert_eq!(fs::read_to_string(&copy).unwrap(), "changed");
}

#[test]
fn convert_images_twice_skips_webp_but_recompresses() {
    let project = site();
    let session = project.session(Mode::Dev);

    nagare::engine::run(&Node::task(ConvertImages), &session).unwrap();

    let webp = project.path("src/img/a.webp");
    let png = project.path("src/img/a.png");
    let past = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    // The staged original stays older than its webp sibling.
    set_modified(&project.path("src/img/convert_images/a.png"), past);
    set_modified(&webp, past + Duration::from_secs(60));
    set_modified(&png, past);

    nagare::engine::run(&Node::task(ConvertImages), &session).unwrap();

    assert_eq!(modified(&webp), past + Duration::from_secs(60));
    assert!(modified(&png) > past + Duration::from_secs(60));
}

fn set_modified(path: &Utf8Path, time: SystemTime) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}

fn modified(path: &Utf8Path) -> SystemTime {
    fs::metadata(path).unwrap().modified().unwrap()
}
