use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use thiserror::Error;

use crate::core::{Asset, sources};
use crate::engine::{Effect, Task, TaskResult};
use crate::tools::{self, ToolError};
use crate::{SourceError, TaskContext};

#[derive(Debug, Error)]
pub enum FontError {
    #[error("Couldn't convert '{0}': {1}")]
    Convert(Utf8PathBuf, ToolError),

    #[error("Couldn't copy fonts: {0}")]
    Copy(std::io::Error),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Web font flavours produced from a staged font.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Woff,
    Woff2,
}

impl Flavor {
    fn extension(self) -> &'static str {
        match self {
            Flavor::Woff => "woff",
            Flavor::Woff2 => "woff2",
        }
    }

    /// Flavours built from a source with this extension, in order.
    fn for_extension(ext: &str) -> &'static [Flavor] {
        match ext.to_ascii_lowercase().as_str() {
            "ttf" => &[Flavor::Woff, Flavor::Woff2],
            "otf" => &[Flavor::Woff],
            _ => &[],
        }
    }
}

/// Converts staged TrueType and OpenType fonts into web fonts next to the
/// other fonts in `src/fonts`.
pub struct ConvertFonts;

impl Task for ConvertFonts {
    fn name(&self) -> &'static str {
        "convert_fonts"
    }

    fn effect(&self) -> Effect {
        Effect::Source
    }

    fn run(&self, ctx: &TaskContext) -> TaskResult<()> {
        let s = Instant::now();
        let staged = crate::io::find(&ctx.env.root, sources::FONTS_STAGING_GLOB)
            .map_err(FontError::Source)?;
        let dir = ctx.env.resolve(sources::FONTS);
        let tools = &ctx.env.config.tools;

        let jobs: Vec<_> = staged
            .iter()
            .flat_map(|file| {
                let flavors = Flavor::for_extension(file.extension().unwrap_or_default());
                if flavors.is_empty() {
                    tracing::warn!("skipping {file}, only .ttf and .otf can be converted");
                }
                flavors.iter().map(move |&flavor| (file, flavor))
            })
            .collect();

        jobs.par_iter()
            .map(|&(file, flavor)| {
                let template = match flavor {
                    Flavor::Woff => &tools.woff,
                    Flavor::Woff2 => &tools.woff2,
                };
                let output = target(&dir, file, flavor);

                ctx.progress(file.as_str());
                tools::convert(template, file, &output)
                    .map_err(|e| FontError::Convert(file.clone(), e))
            })
            .collect::<Result<Vec<_>, FontError>>()?;

        if !jobs.is_empty() {
            tracing::info!("converted {} fonts {}", jobs.len(), crate::io::as_overhead(s));
        }

        Ok(())
    }
}

fn target(dir: &Utf8Path, file: &Utf8Path, flavor: Flavor) -> Utf8PathBuf {
    let stem = file.file_stem().unwrap_or_default();
    dir.join(format!("{stem}.{}", flavor.extension()))
}

/// Copies fonts from `src/fonts` into the output, skipping unchanged files.
pub struct Fonts;

impl Task for Fonts {
    fn name(&self) -> &'static str {
        "fonts"
    }

    fn effect(&self) -> Effect {
        Effect::Output
    }

    fn run(&self, ctx: &TaskContext) -> TaskResult<()> {
        let s = Instant::now();
        let files = crate::io::find(&ctx.env.root, sources::FONTS_GLOB).map_err(FontError::Source)?;

        let copied =
            crate::io::copy_newer(&files, &ctx.env.out(Asset::Fonts)).map_err(FontError::Copy)?;

        if copied > 0 {
            tracing::info!("copied {copied} fonts {}", crate::io::as_overhead(s));
            ctx.notify();
        }

        Ok(())
    }
}
