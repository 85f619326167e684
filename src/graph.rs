//! The two entry points and the graphs they run.
//!
//! ```text
//! dev  = parallel(series(clean, convert_images, convert_fonts, html, styles,
//!                        scripts, images, fonts, server), watch)
//! prod = series(to_prod, clean, convert_images, convert_fonts, html, styles,
//!               scripts, images, fonts, server)
//! ```

use std::sync::Arc;

use crate::core::{Mode, sources};
use crate::engine::{Node, Task, parallel, series};
use crate::tasks::{
    Clean, ConvertFonts, ConvertImages, Fonts, Html, Images, Scripts, Server, Styles, ToProd,
    Watch,
};

/// Named entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Entry {
    #[default]
    Dev,
    Prod,
}

impl Entry {
    pub const fn mode(self) -> Mode {
        match self {
            Entry::Dev => Mode::Dev,
            Entry::Prod => Mode::Prod,
        }
    }

    pub fn graph(self) -> Node {
        match self {
            Entry::Dev => dev(),
            Entry::Prod => prod(),
        }
    }
}

/// Leaf tasks shared between the build series and the watch table, so a
/// watch-triggered run executes the very task the initial build did.
struct Leaves {
    convert_images: Arc<dyn Task>,
    convert_fonts: Arc<dyn Task>,
    html: Arc<dyn Task>,
    styles: Arc<dyn Task>,
    scripts: Arc<dyn Task>,
    images: Arc<dyn Task>,
    fonts: Arc<dyn Task>,
}

impl Leaves {
    fn new() -> Self {
        Self {
            convert_images: Arc::new(ConvertImages),
            convert_fonts: Arc::new(ConvertFonts),
            html: Arc::new(Html),
            styles: Arc::new(Styles),
            scripts: Arc::new(Scripts),
            images: Arc::new(Images),
            fonts: Arc::new(Fonts),
        }
    }

    /// Everything between `clean` and `server`, in build order.
    fn build(&self) -> Vec<Node> {
        [
            &self.convert_images,
            &self.convert_fonts,
            &self.html,
            &self.styles,
            &self.scripts,
            &self.images,
            &self.fonts,
        ]
        .into_iter()
        .map(|task| Node::Task(task.clone()))
        .collect()
    }

    fn routes(&self) -> Vec<(&'static str, Arc<dyn Task>)> {
        vec![
            (sources::HTML_GLOB, self.html.clone()),
            (sources::SCSS_GLOB, self.styles.clone()),
            (sources::JS_GLOB, self.scripts.clone()),
            (sources::IMG_GLOB, self.images.clone()),
            (sources::IMG_STAGING_GLOB, self.convert_images.clone()),
            (sources::FONTS_GLOB, self.fonts.clone()),
            (sources::FONTS_STAGING_TTF, self.convert_fonts.clone()),
        ]
    }
}

/// Development build, then serve and watch.
pub fn dev() -> Node {
    let leaves = Leaves::new();

    let build = std::iter::once(Node::task(Clean))
        .chain(leaves.build())
        .chain(std::iter::once(Node::task(Server)));

    parallel([series(build), Node::task(Watch::new(leaves.routes()))])
}

/// Production build, then serve.
pub fn prod() -> Node {
    let leaves = Leaves::new();

    series(
        [Node::task(ToProd), Node::task(Clean)]
            .into_iter()
            .chain(leaves.build())
            .chain(std::iter::once(Node::task(Server))),
    )
}
