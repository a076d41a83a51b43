use std::fs;
use std::io::{Cursor, Write};

use camino::{Utf8Path, Utf8PathBuf};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, ImageReader};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::{Hash32, IMAGE_EXTENSIONS};
use crate::engine::{Task, TaskContext};
use crate::error::ImageError;
use crate::tasks::glob_files;

/// Quality used when re-encoding JPEG images.
const JPEG_QUALITY: u8 = 80;

/// Optimizes every image under the image source tree.
///
/// Each image keeps its relative path under `dist/img`. Optimized bytes are
/// cached by the hash of the source, so unchanged images are only copied.
pub struct Images;

impl Task for Images {
    fn name(&self) -> &str {
        "images"
    }

    fn execute(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        let layout = &ctx.env.layout;
        let sources = find_images(&layout.images)?;
        let total = sources.len();

        ctx.span.pb_set_message(&format!("images: {total} files"));

        let cache = layout.cache_img();
        let dist = layout.dist_img();
        fs::create_dir_all(&cache).map_err(ImageError::Io)?;

        let saved = sources
            .into_par_iter()
            .map(|source| {
                let relative = source.strip_prefix(&layout.images).unwrap_or(&source);
                let (before, after) = process_image(&source, &cache, &dist.join(relative))?;
                Ok(before.saturating_sub(after))
            })
            .collect::<Result<Vec<_>, ImageError>>()?;

        tracing::info!(
            "Optimized {total} images, saved {}",
            indicatif::HumanBytes(saved.iter().sum::<usize>() as u64)
        );

        Ok(())
    }
}

/// Every file with a supported extension, in sorted order.
fn find_images(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, ImageError> {
    let mut images = Vec::new();

    for ext in IMAGE_EXTENSIONS {
        images.extend(glob_files::<ImageError>(&root.join(format!("**/*.{ext}")))?);
    }

    images.sort();
    Ok(images)
}

/// Writes the optimized form of `source` to `target` and returns the sizes
/// before and after.
fn process_image(
    source: &Utf8Path,
    cache: &Utf8Path,
    target: &Utf8Path,
) -> Result<(usize, usize), ImageError> {
    let buffer = fs::read(source)?;
    let ext = extension(source);

    let path_cache = cache
        .join(Hash32::hash(&buffer).to_hex())
        .with_extension(&ext);

    // If this hash exists it means the work is already done.
    let optimized = if path_cache.exists() {
        fs::read(&path_cache)?
    } else {
        let optimized = optimize(&buffer, &ext)
            .map_err(|err| ImageError::Image(source.to_path_buf(), err))?;
        write_cache(cache, &path_cache, &optimized)?;
        optimized
    };

    crate::utils::write_file(target, &optimized)?;

    Ok((buffer.len(), optimized.len()))
}

/// Cache entries appear in one rename, so a reader never sees a partial file.
fn write_cache(cache: &Utf8Path, path: &Utf8Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tempfile::NamedTempFile::new_in(cache)?;
    file.write_all(data)?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

fn extension(path: &Utf8Path) -> String {
    path.extension().unwrap_or_default().to_ascii_lowercase()
}

/// Optimizes the encoded image. The original bytes win whenever the result
/// would not be smaller.
pub fn optimize(buffer: &[u8], ext: &str) -> Result<Vec<u8>, image::ImageError> {
    let optimized = match ext {
        "png" => reencode_png(buffer)?,
        "jpg" | "jpeg" => reencode_jpeg(buffer)?,
        "svg" => minify_svg(buffer),
        _ => return Ok(buffer.to_vec()),
    };

    if optimized.len() < buffer.len() {
        Ok(optimized)
    } else {
        Ok(buffer.to_vec())
    }
}

fn reencode_png(buffer: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let img = ImageReader::with_format(Cursor::new(buffer), image::ImageFormat::Png).decode()?;

    let mut out = Vec::new();
    PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive).write_image(
        img.as_bytes(),
        img.width(),
        img.height(),
        img.color().into(),
    )?;

    Ok(out)
}

fn reencode_jpeg(buffer: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let img = ImageReader::with_format(Cursor::new(buffer), image::ImageFormat::Jpeg).decode()?;
    let rgb = img.to_rgb8();

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).write_image(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ExtendedColorType::Rgb8,
    )?;

    Ok(out)
}

/// How whitespace inside an SVG element is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Space {
    /// Structural markup, whitespace next to tags doesn't render.
    Drop,
    /// Text content, any run renders as a single space.
    Collapse,
    /// `xml:space="preserve"`, every character renders.
    Preserve,
}

/// Elements whose whitespace is part of the rendered text.
const SVG_TEXT: [&str; 3] = ["text", "tspan", "textPath"];

/// Drops comments and the whitespace that doesn't render.
fn minify_svg(buffer: &[u8]) -> Vec<u8> {
    let Ok(text) = std::str::from_utf8(buffer) else {
        return buffer.to_vec();
    };

    let text = strip_comments(text);

    let mut out = String::with_capacity(text.len());
    let mut stack: Vec<Space> = Vec::new();
    let mut rest = text.trim();

    while !rest.is_empty() {
        let mode = stack.last().copied().unwrap_or(Space::Drop);

        if rest.starts_with('<') {
            let end = rest.find('>').map_or(rest.len(), |i| i + 1);
            let tag = &rest[..end];
            out.push_str(tag);
            track_element(&mut stack, tag, mode);
            rest = &rest[end..];
        } else {
            let end = rest.find('<').unwrap_or(rest.len());
            push_text(&mut out, &rest[..end], mode);
            rest = &rest[end..];
        }
    }

    out.into_bytes()
}

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        rest = match rest[start..].find("-->") {
            Some(end) => &rest[start + end + 3..],
            None => "",
        };
    }

    out.push_str(rest);
    out
}

fn track_element(stack: &mut Vec<Space>, tag: &str, parent: Space) {
    if tag.starts_with("</") {
        stack.pop();
        return;
    }

    if tag.starts_with("<?") || tag.starts_with("<!") || tag.ends_with("/>") {
        return;
    }

    let name = tag[1..]
        .split(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .next()
        .unwrap_or_default();

    let preserve = tag.contains("xml:space=\"preserve\"") || tag.contains("xml:space='preserve'");

    let mode = match parent {
        Space::Preserve => Space::Preserve,
        _ if preserve => Space::Preserve,
        Space::Collapse => Space::Collapse,
        Space::Drop if SVG_TEXT.contains(&name) => Space::Collapse,
        Space::Drop => Space::Drop,
    };

    stack.push(mode);
}

fn push_text(out: &mut String, text: &str, mode: Space) {
    let text = match mode {
        Space::Preserve => {
            out.push_str(text);
            return;
        }
        Space::Collapse => text,
        Space::Drop => text.trim(),
    };

    let mut pending = false;
    for c in text.chars() {
        if c.is_whitespace() {
            pending = true;
            continue;
        }
        if pending {
            out.push(' ');
            pending = false;
        }
        out.push(c);
    }

    if pending {
        out.push(' ');
    }
}
