use std::fs;
use std::sync::LazyLock;
use std::time::Instant;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use thiserror::Error;

use crate::core::{Asset, Environment, sources};
use crate::engine::{Effect, Task, TaskResult};
use crate::tools::{self, ToolError};
use crate::{SourceError, TaskContext};

const OUTPUT: &str = "styles.min.css";

/// Errors that can occur when compiling stylesheets.
#[derive(Debug, Error)]
pub enum StyleError {
    #[error("IO error on '{0}': {1}")]
    Io(Utf8PathBuf, std::io::Error),

    #[error("Sass compilation error: {0}")]
    Sass(#[from] Box<grass::Error>),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("esbuild produced invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Image references that get a `.webp` variant.
static IMAGE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(url\(\s*['"]?[^'"()]+?)\.(?:png|jpe?g)([?#][^'"()]*)?(['"]?\s*\))"#)
        .expect("image url pattern")
});

/// Compiles `src/scss/styles.scss` into `<mode>/css/styles.min.css`.
pub struct Styles;

impl Task for Styles {
    fn name(&self) -> &'static str {
        "styles"
    }

    fn effect(&self) -> Effect {
        Effect::Output
    }

    fn run(&self, ctx: &TaskContext) -> TaskResult<()> {
        let s = Instant::now();
        let css = compile(ctx.env)?;

        let dst = ctx.env.out(Asset::Css).join(OUTPUT);
        crate::io::write(&dst, css).map_err(|e| StyleError::Io(dst.clone(), e))?;

        tracing::info!("compiled {} {}", dst, crate::io::as_overhead(s));
        ctx.notify();
        Ok(())
    }
}

fn compile(env: &Environment) -> Result<String, StyleError> {
    let entry = env.resolve(sources::SCSS_ENTRY);
    let style = match env.mode.is_prod() {
        true => grass::OutputStyle::Compressed,
        false => grass::OutputStyle::Expanded,
    };

    let mut options = grass::Options::default().style(style);
    if let Some(dir) = entry.parent() {
        options = options.load_path(dir);
    }

    let css = grass::from_path(&entry, &options)?;

    if !env.mode.is_prod() {
        let map = source_map(env)?;
        return Ok(format!(
            "{css}\n/*# sourceMappingURL=data:application/json;charset=utf-8;base64,{} */\n",
            STANDARD.encode(map)
        ));
    }

    let css = webp_css(&css);
    let css = tools::run(
        &env.config.tools.esbuild,
        &esbuild_css_args(env),
        Some(css.as_bytes()),
    )?;

    Ok(String::from_utf8(css)?)
}

/// Command line that prefixes and minifies CSS read from standard input.
fn esbuild_css_args(env: &Environment) -> Vec<String> {
    vec![
        "--loader=css".to_string(),
        "--minify".to_string(),
        format!("--target={}", env.config.targets.styles.join(",")),
    ]
}

/// A version 3 source map embedding every stylesheet of the project, paths
/// relative to the output directory.
fn source_map(env: &Environment) -> Result<String, StyleError> {
    let out = env.out(Asset::Css);

    let mut sources = Vec::new();
    let mut contents = Vec::new();
    for path in crate::io::find(&env.root, sources::SCSS_GLOB)? {
        let text = fs::read_to_string(&path).map_err(|e| StyleError::Io(path.clone(), e))?;
        sources.push(relative_to(&path, &out));
        contents.push(text);
    }

    let map = serde_json::json!({
        "version": 3,
        "file": OUTPUT,
        "sources": sources,
        "sourcesContent": contents,
        "names": [],
        "mappings": "",
    });

    Ok(map.to_string())
}

/// Relative URL from `dir` to `path`, both absolute.
fn relative_to(path: &Utf8Path, dir: &Utf8Path) -> String {
    let shared = path
        .components()
        .zip(dir.components())
        .take_while(|(a, b)| a == b)
        .count();

    let ups = dir.components().count() - shared;
    let rest = path.components().skip(shared).map(|c| c.as_str());

    std::iter::repeat_n("..", ups)
        .chain(rest)
        .collect::<Vec<_>>()
        .join("/")
}

/// Splits every declaration that references a PNG or JPEG into a
/// `.no-webp` rule keeping the original image and a `.webp` rule pointing at
/// the `.webp` sibling. Grouping at-rules are rewritten recursively, other
/// at-rules are copied as they are.
pub(crate) fn webp_css(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;

    while let Some((item, tail)) = next_item(rest) {
        rest = tail;

        match item {
            Item::Statement(text) => out.push_str(text),
            Item::Block { prelude, body } if prelude.starts_with('@') => {
                let name = prelude[1..]
                    .split(|c: char| c.is_whitespace() || c == '(')
                    .next()
                    .unwrap_or_default()
                    .to_ascii_lowercase();

                let body = match name.as_str() {
                    "media" | "supports" | "layer" | "container" | "document" => webp_css(body),
                    _ => body.to_string(),
                };

                out.push_str(prelude);
                out.push('{');
                out.push_str(&body);
                out.push('}');
            }
            Item::Block { prelude, body } => webp_rule(prelude, body, &mut out),
        }
    }

    out
}

fn webp_rule(prelude: &str, body: &str, out: &mut String) {
    let (images, plain): (Vec<&str>, Vec<&str>) = split_top(body, ';')
        .into_iter()
        .map(str::trim)
        .filter(|decl| !decl.is_empty())
        .partition(|decl| IMAGE_URL.is_match(decl));

    if images.is_empty() {
        out.push_str(prelude);
        out.push('{');
        out.push_str(body);
        out.push('}');
        return;
    }

    if !plain.is_empty() {
        out.push_str(&format!("{prelude}{{{}}}", plain.join(";")));
    }

    let selectors: Vec<&str> = split_top(prelude, ',').into_iter().map(str::trim).collect();
    let scoped = |class: &str| {
        selectors
            .iter()
            .map(|sel| format!("{class} {sel}"))
            .collect::<Vec<_>>()
            .join(",")
    };

    let webp: Vec<_> = images
        .iter()
        .map(|decl| IMAGE_URL.replace_all(decl, "${1}.webp${2}${3}"))
        .collect();

    out.push_str(&format!("{}{{{}}}", scoped(".no-webp"), images.join(";")));
    out.push_str(&format!("{}{{{}}}", scoped(".webp"), webp.join(";")));
}

enum Item<'a> {
    /// Anything up to and including a top-level `;`, or trailing text.
    Statement(&'a str),
    Block { prelude: &'a str, body: &'a str },
}

/// Cuts the next statement or block off the front of `css`.
fn next_item(css: &str) -> Option<(Item<'_>, &str)> {
    let start = css.len() - css.trim_start().len();
    let css = &css[start..];
    if css.is_empty() {
        return None;
    }

    let mut scan = Scanner::new(css);
    while let Some((i, c)) = scan.next_code() {
        match c {
            ';' if scan.depth == 0 => return Some((Item::Statement(&css[..=i]), &css[i + 1..])),
            '{' if scan.depth == 1 => {
                let open = i;
                while let Some((j, c)) = scan.next_code() {
                    if c == '}' && scan.depth == 0 {
                        let item = Item::Block {
                            prelude: css[..open].trim(),
                            body: &css[open + 1..j],
                        };
                        return Some((item, &css[j + 1..]));
                    }
                }
                // Unterminated block
                return Some((Item::Statement(css), ""));
            }
            _ => {}
        }
    }

    Some((Item::Statement(css), ""))
}

/// Splits on `sep` outside of strings, comments, parentheses and blocks.
fn split_top(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut last = 0;
    let mut scan = Scanner::new(text);

    while let Some((i, c)) = scan.next_code() {
        if c == sep && scan.depth == 0 && scan.parens == 0 {
            parts.push(&text[last..i]);
            last = i + c.len_utf8();
        }
    }

    parts.push(&text[last..]);
    parts
}

/// Walks CSS source, skipping over strings and comments, while tracking
/// brace and parenthesis depth.
struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    depth: usize,
    parens: usize,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.char_indices().peekable(),
            depth: 0,
            parens: 0,
        }
    }

    /// Next character outside strings and comments. Depth counters are
    /// already updated for the returned character.
    fn next_code(&mut self) -> Option<(usize, char)> {
        while let Some((i, c)) = self.chars.next() {
            match c {
                '"' | '\'' => self.skip_string(c),
                '/' if matches!(self.chars.peek(), Some((_, '*'))) => self.skip_comment(),
                '{' => {
                    self.depth += 1;
                    return Some((i, c));
                }
                '}' => {
                    self.depth = self.depth.saturating_sub(1);
                    return Some((i, c));
                }
                '(' => {
                    self.parens += 1;
                    return Some((i, c));
                }
                ')' => {
                    self.parens = self.parens.saturating_sub(1);
                    return Some((i, c));
                }
                _ => return Some((i, c)),
            }
        }
        None
    }

    fn skip_string(&mut self, quote: char) {
        while let Some((_, c)) = self.chars.next() {
            match c {
                '\\' => {
                    self.chars.next();
                }
                c if c == quote => return,
                _ => {}
            }
        }
    }

    fn skip_comment(&mut self) {
        self.chars.next();
        let mut star = false;
        for (_, c) in self.chars.by_ref() {
            if star && c == '/' {
                return;
            }
            star = c == '*';
        }
    }
}
