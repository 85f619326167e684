use std::fs;
use std::sync::LazyLock;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::{Asset, sources};
use crate::engine::{Effect, Task, TaskResult};
use crate::io::normalize_path;
use crate::{SourceError, TaskContext};

/// Errors that can occur when assembling HTML pages.
#[derive(Debug, Error)]
pub enum HtmlError {
    #[error("Couldn't read '{0}': {1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't write '{0}': {1}")]
    Write(Utf8PathBuf, std::io::Error),

    /// A file includes itself, directly or through other includes.
    #[error("Include cycle: {}", .0.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(" -> "))]
    Cycle(Vec<Utf8PathBuf>),

    /// The context argument of an include is not a JSON object.
    #[error("Invalid include context in '{0}': {1}")]
    Context(Utf8PathBuf, serde_json::Error),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// `@@include('path')`, `@@include("path")`, optionally with a JSON object
/// of variables as a second argument.
static INCLUDE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@@include\(\s*(?:'([^']*)'|"([^"]*)")\s*(?:,\s*(\{[^)]*\}))?\s*\)"#)
        .expect("include pattern")
});

/// `@@name` or `@@a.b`. A dot only joins two identifiers, so punctuation
/// after a variable stays text.
static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@@([A-Za-z_]\w*(?:\.[A-Za-z_]\w*)*)").expect("variable pattern")
});

static PICTURE_OR_IMG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<picture\b.*?</picture>|<img\b[^>]*>").expect("picture pattern")
});

static SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("src pattern")
});

const RASTER: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

/// Assembles pages from `src/html`, skipping the shared components.
pub struct Html;

impl Task for Html {
    fn name(&self) -> &'static str {
        "html"
    }

    fn effect(&self) -> Effect {
        Effect::Output
    }

    fn run(&self, ctx: &TaskContext) -> TaskResult<()> {
        let s = Instant::now();
        let src = ctx.env.resolve(sources::HTML);
        let components = ctx.env.resolve(sources::HTML_COMPONENTS);
        let out = ctx.env.out(Asset::Root);
        let prod = ctx.env.mode.is_prod();

        let pages: Vec<_> = crate::io::find(&ctx.env.root, sources::HTML_GLOB)
            .map_err(HtmlError::Source)?
            .into_iter()
            .filter(|path| !path.starts_with(&components))
            .collect();

        pages
            .par_iter()
            .map(|page| {
                let html = render_page(page)?;
                let html = if prod { picture_webp(&html) } else { html };

                // Pages always live under `src/html`.
                let rel = page.strip_prefix(&src).unwrap_or(page);
                let dst = out.join(rel);
                crate::io::write(&dst, html).map_err(|e| HtmlError::Write(dst, e))
            })
            .collect::<Result<Vec<_>, HtmlError>>()?;

        tracing::info!("assembled {} pages {}", pages.len(), crate::io::as_overhead(s));
        ctx.notify();
        Ok(())
    }
}

/// Reads a page and expands every include in it.
fn render_page(page: &Utf8Path) -> Result<String, HtmlError> {
    let page = normalize_path(page);
    let text = fs::read_to_string(&page).map_err(|e| HtmlError::Read(page.clone(), e))?;
    let mut stack = vec![page];
    resolve_includes(&text, &Map::new(), &mut stack)
}

/// Expands includes in `text`, which was read from the last file on `stack`.
/// Include paths are relative to that file. Variables passed to an include
/// are visible in everything it includes in turn.
fn resolve_includes(
    text: &str,
    vars: &Map<String, Value>,
    stack: &mut Vec<Utf8PathBuf>,
) -> Result<String, HtmlError> {
    let Some(file) = stack.last().cloned() else {
        return Ok(text.to_string());
    };
    let dir = file.parent().unwrap_or(Utf8Path::new(""));

    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in INCLUDE.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&text[last..whole.start()]);
        last = whole.end();

        let target = caps.get(1).or(caps.get(2)).map_or("", |m| m.as_str());
        let path = normalize_path(&dir.join(target));

        if stack.contains(&path) {
            let mut cycle = stack.clone();
            cycle.push(path);
            return Err(HtmlError::Cycle(cycle));
        }

        let mut scope = vars.clone();
        if let Some(context) = caps.get(3) {
            let context: Map<String, Value> = serde_json::from_str(context.as_str())
                .map_err(|e| HtmlError::Context(file.clone(), e))?;
            scope.extend(context);
        }

        let included = fs::read_to_string(&path).map_err(|e| HtmlError::Read(path.clone(), e))?;

        stack.push(path);
        let included = resolve_includes(&included, &scope, stack)?;
        stack.pop();

        out.push_str(&substitute(&included, &scope));
    }

    out.push_str(&text[last..]);
    Ok(out)
}

/// Replaces `@@name` (or `@@a.b` for nested objects) with the variable's
/// value. Unknown names are left as they are.
fn substitute(text: &str, vars: &Map<String, Value>) -> String {
    if vars.is_empty() {
        return text.to_string();
    }

    VARIABLE
        .replace_all(text, |caps: &Captures| {
            let mut keys = caps[1].split('.');
            let first = keys.next().and_then(|key| vars.get(key));
            let value = keys.fold(first, |value, key| value.and_then(|v| v.get(key)));

            match value {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) => String::new(),
                Some(other) => other.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Wraps each raster `<img>` in a `<picture>` that offers the `.webp`
/// sibling first. Images already inside a `<picture>` are kept as they are.
pub(crate) fn picture_webp(html: &str) -> String {
    PICTURE_OR_IMG
        .replace_all(html, |caps: &Captures| {
            let tag = &caps[0];

            if tag
                .get(..8)
                .is_some_and(|head| head.eq_ignore_ascii_case("<picture"))
            {
                return tag.to_string();
            }

            let webp = SRC
                .captures(tag)
                .and_then(|src| src.get(1).or(src.get(2)))
                .and_then(|src| webp_sibling(src.as_str()));

            match webp {
                Some(webp) => format!(
                    r#"<picture><source srcset="{webp}" type="image/webp">{tag}</picture>"#
                ),
                None => tag.to_string(),
            }
        })
        .into_owned()
}

/// `img/a.png?v=2` becomes `img/a.webp?v=2`. `None` for anything that is not
/// a raster image reference.
fn webp_sibling(src: &str) -> Option<String> {
    if src.starts_with("data:") {
        return None;
    }

    let split = src.find(['?', '#']).unwrap_or(src.len());
    let (path, suffix) = src.split_at(split);
    let (stem, ext) = path.rsplit_once('.')?;

    if stem.is_empty() || stem.ends_with('/') || ext.contains('/') {
        return None;
    }

    RASTER
        .iter()
        .any(|raster| ext.eq_ignore_ascii_case(raster))
        .then(|| format!("{stem}.webp{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_includes_are_relative_and_recursive() {
        let (_guard, root) = tempdir();
        let html = root.join("src/html");
        crate::io::write(
            &html.join("index.html"),
            "<body>@@include('components/header.html')</body>",
        )
        .unwrap();
        crate::io::write(
            &html.join("components/header.html"),
            r#"<header>@@include("nav.html")</header>"#,
        )
        .unwrap();
        crate::io::write(&html.join("components/nav.html"), "<nav></nav>").unwrap();

        let page = render_page(&html.join("index.html")).unwrap();
        assert_eq!(page, "<body><header><nav></nav></header></body>");
    }

    #[test]
    fn test_include_cycle_is_an_error() {
        let (_guard, root) = tempdir();
        crate::io::write(&root.join("a.html"), "@@include('b.html')").unwrap();
        crate::io::write(&root.join("b.html"), "@@include('./a.html')").unwrap();

        let err = render_page(&root.join("a.html")).unwrap_err();
        match err {
            HtmlError::Cycle(chain) => {
                assert_eq!(chain.len(), 3);
                assert_eq!(chain.first(), chain.last());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_include_is_an_error() {
        let (_guard, root) = tempdir();
        crate::io::write(&root.join("a.html"), "@@include('missing.html')").unwrap();

        assert!(matches!(
            render_page(&root.join("a.html")),
            Err(HtmlError::Read(path, _)) if path.ends_with("missing.html")
        ));
    }

    #[test]
    fn test_include_variables_are_inherited() {
        let (_guard, root) = tempdir();
        crate::io::write(
            &root.join("a.html"),
            r#"@@include('title.html', {"title": "Home", "meta": {"lang": "en"}})"#,
        )
        .unwrap();
        crate::io::write(&root.join("title.html"), "<h1>@@title</h1>@@include('lang.html')")
            .unwrap();
        crate::io::write(&root.join("lang.html"), "<p>@@meta.lang @@unknown</p>").unwrap();

        let page = render_page(&root.join("a.html")).unwrap();
        assert_eq!(page, "<h1>Home</h1><p>en @@unknown</p>");
    }

    #[test]
    fn test_variable_before_punctuation() {
        let (_guard, root) = tempdir();
        crate::io::write(
            &root.join("a.html"),
            r#"@@include('b.html', {"site": "Nagare", "meta": {"year": 2024}})"#,
        )
        .unwrap();
        crate::io::write(
            &root.join("b.html"),
            "<p>Welcome to @@site.</p><p>@@meta.year. @@site...</p>",
        )
        .unwrap();

        let page = render_page(&root.join("a.html")).unwrap();
        assert_eq!(page, "<p>Welcome to Nagare.</p><p>2024. Nagare...</p>");
    }

    #[test]
    fn test_picture_wraps_raster_images() {
        let html = r#"<img src="img/cat.jpg" alt="cat">"#;
        assert_eq!(
            picture_webp(html),
            r#"<picture><source srcset="img/cat.webp" type="image/webp"><img src="img/cat.jpg" alt="cat"></picture>"#
        );
    }

    #[test]
    fn test_picture_skips_svg_and_existing_pictures() {
        let svg = r#"<img src="img/logo.svg">"#;
        assert_eq!(picture_webp(svg), svg);

        let existing = r#"<picture><source srcset="a.avif"><img src="a.png"></picture>"#;
        assert_eq!(picture_webp(existing), existing);

        let inline = r#"<img src="data:image/png;base64,AAAA">"#;
        assert_eq!(picture_webp(inline), inline);
    }

    #[test]
    fn test_webp_sibling_keeps_query() {
        assert_eq!(webp_sibling("a/b.PNG?v=1").as_deref(), Some("a/b.webp?v=1"));
        assert_eq!(webp_sibling("a.b/c"), None);
        assert_eq!(webp_sibling(".png"), None);
    }
}
