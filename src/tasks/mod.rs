//! Leaf tasks of the asset pipeline.
//!
//! Each task reads from a fixed location under `src/`, applies a chain of
//! transformations selected by the environment's mode, writes into the
//! mode's output directory (or back into the source tree for conversions)
//! and, when it touched the output, notifies the live-reload bus.

mod clean;
mod fonts;
mod html;
mod images;
mod mode;
mod scripts;
mod server;
mod styles;
mod watch;

pub use clean::Clean;
pub use fonts::{ConvertFonts, FontError, Fonts};
pub use html::{Html, HtmlError};
pub use images::{ConvertImages, ImageError, Images};
pub use mode::ToProd;
pub use scripts::{ScriptError, Scripts};
pub use server::Server;
pub use styles::{StyleError, Styles};
pub use watch::Watch;
