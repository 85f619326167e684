use std::collections::HashMap;
use std::fs;
use std::sync::LazyLock;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageReader};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use regex::Regex;
use thiserror::Error;

use crate::core::{Asset, sources};
use crate::engine::{Effect, Task, TaskResult};
use crate::{SourceError, TaskContext};

/// Errors that can occur when processing images.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("IO error on '{0}': {1}")]
    Io(Utf8PathBuf, std::io::Error),

    #[error("Couldn't process '{0}': {1}")]
    Image(Utf8PathBuf, image::ImageError),

    #[error("Couldn't copy images: {0}")]
    Copy(std::io::Error),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Formats the WebP step decodes.
const WEBP_SOURCES: [&str; 7] = ["png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff"];

static SVG_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern"));

static SVG_GAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s+<").expect("whitespace pattern"));

fn extension(path: &Utf8Path) -> String {
    path.extension().unwrap_or_default().to_ascii_lowercase()
}

/// Turns staged images into WebP variants and recompressed originals inside
/// `src/img`.
pub struct ConvertImages;

impl Task for ConvertImages {
    fn name(&self) -> &'static str {
        "convert_images"
    }

    fn effect(&self) -> Effect {
        Effect::Source
    }

    fn run(&self, ctx: &TaskContext) -> TaskResult<()> {
        let s = Instant::now();
        let staged = crate::io::find(&ctx.env.root, sources::IMG_STAGING_GLOB)
            .map_err(ImageError::Source)?;
        let dir = ctx.env.resolve(sources::IMG);

        let encoded = webp_step(&staged, &dir)?;
        let compressed = compress_step(&staged, &dir)?;

        if encoded + compressed > 0 {
            tracing::info!(
                "encoded {encoded} webp, compressed {compressed} images {}",
                crate::io::as_overhead(s)
            );
        }

        Ok(())
    }
}

/// Encodes every decodable image that is newer than its `.webp` sibling.
/// When several files share a stem, the first in lexical order owns the
/// `.webp`. Returns the number of files written.
fn webp_step(files: &[Utf8PathBuf], dir: &Utf8Path) -> Result<usize, ImageError> {
    let mut owners = HashMap::new();
    let mut pending = Vec::new();
    for file in files {
        if !WEBP_SOURCES.contains(&extension(file).as_str()) {
            continue;
        }

        let dst = dir.join(format!("{}.webp", file.file_stem().unwrap_or_default()));
        if let Some(owner) = owners.get(&dst) {
            tracing::warn!("skipping {file}, {dst} is produced from {owner}");
            continue;
        }
        owners.insert(dst.clone(), file);

        if crate::io::is_newer(file, &dst).map_err(|e| ImageError::Io(file.clone(), e))? {
            pending.push((file, dst));
        }
    }

    pending
        .par_iter()
        .map(|(file, dst)| {
            let data = encode_webp(file)?;
            crate::io::write(dst, data).map_err(|e| ImageError::Io(dst.clone(), e))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(pending.len())
}

/// Writes a recompressed copy of every file under its own name. Not gated on
/// modification times. Returns the number of files written.
fn compress_step(files: &[Utf8PathBuf], dir: &Utf8Path) -> Result<usize, ImageError> {
    files
        .par_iter()
        .map(|file| {
            let data = compress(file)?;
            let dst = dir.join(file.file_name().unwrap_or_default());
            crate::io::write(&dst, data).map_err(|e| ImageError::Io(dst, e))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(files.len())
}

fn decode(path: &Utf8Path) -> Result<DynamicImage, ImageError> {
    let image_err = |e| ImageError::Image(path.to_path_buf(), e);

    ImageReader::open(path)
        .map_err(|e| ImageError::Io(path.to_path_buf(), e))?
        .with_guessed_format()
        .map_err(|e| ImageError::Io(path.to_path_buf(), e))?
        .decode()
        .map_err(image_err)
}

fn encode_webp(path: &Utf8Path) -> Result<Vec<u8>, ImageError> {
    let img = decode(path)?;
    let rgba = img.to_rgba8();

    let mut buffer = Vec::new();
    WebPEncoder::new_lossless(&mut buffer)
        .encode(&rgba, img.width(), img.height(), ExtendedColorType::Rgba8)
        .map_err(|e| ImageError::Image(path.to_path_buf(), e))?;

    Ok(buffer)
}

/// PNG at maximum compression, JPEG at quality 80, SVG without comments or
/// whitespace between tags. Raster output that ends up larger than the
/// original is discarded in favour of the original. Anything else is copied.
fn compress(path: &Utf8Path) -> Result<Vec<u8>, ImageError> {
    let original = fs::read(path).map_err(|e| ImageError::Io(path.to_path_buf(), e))?;
    let image_err = |e| ImageError::Image(path.to_path_buf(), e);

    let mut buffer = Vec::new();
    match extension(path).as_str() {
        "png" => {
            let encoder =
                PngEncoder::new_with_quality(&mut buffer, CompressionType::Best, FilterType::Adaptive);
            decode(path)?.write_with_encoder(encoder).map_err(image_err)?;
        }
        "jpg" | "jpeg" => {
            let encoder = JpegEncoder::new_with_quality(&mut buffer, 80);
            decode(path)?.write_with_encoder(encoder).map_err(image_err)?;
        }
        "svg" => return Ok(minify_svg(&String::from_utf8_lossy(&original)).into_bytes()),
        _ => return Ok(original),
    }

    Ok(if buffer.len() < original.len() {
        buffer
    } else {
        original
    })
}

fn minify_svg(svg: &str) -> String {
    let svg = SVG_COMMENT.replace_all(svg, "");
    SVG_GAP.replace_all(&svg, "><").trim().to_string()
}

/// Copies `src/img` into the output, skipping unchanged files.
pub struct Images;

impl Task for Images {
    fn name(&self) -> &'static str {
        "images"
    }

    fn effect(&self) -> Effect {
        Effect::Output
    }

    fn run(&self, ctx: &TaskContext) -> TaskResult<()> {
        let s = Instant::now();
        let files = crate::io::find(&ctx.env.root, sources::IMG_GLOB).map_err(ImageError::Source)?;

        let copied =
            crate::io::copy_newer(&files, &ctx.env.out(Asset::Img)).map_err(ImageError::Copy)?;

        if copied > 0 {
            tracing::info!("copied {copied} images {}", crate::io::as_overhead(s));
            ctx.notify();
        }

        Ok(())
    }
}
