//! Per-image transforms: resize, recompression to a byte ceiling, SVG
//! rasterization, or passthrough.

use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat, ImageReader, RgbaImage};
use resvg::{tiny_skia, usvg};
use serde::Serialize;

use crate::config::PackConfig;
use crate::discover::ImageReference;
use crate::error::ImageError;

/// JPEG quality used when re-encoding a resized image.
const RESIZE_JPEG_QUALITY: u8 = 80;

/// Where an archived image's bytes come from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Buffer(Vec<u8>),
    /// Unchanged file, streamed from disk when archived.
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ProcessedImage {
    /// Path inside the archive.
    pub name: String,
    pub content: ImageSource,
}

/// What happened to a single image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageAction {
    Resized,
    Recompressed,
    Rasterized,
    Passthrough,
}

#[derive(Debug, Clone)]
pub struct ImageOutcome {
    pub image: ProcessedImage,
    pub action: ImageAction,
    /// Original document path when the archived name differs from it.
    pub renamed_from: Option<String>,
}

/// Limits for the recompression loop, taken from [`PackConfig`].
#[derive(Debug, Clone, Copy)]
pub struct CompressionSettings {
    pub ceiling: u64,
    pub quality_step: u8,
    pub max_attempts: usize,
}

impl From<&PackConfig> for CompressionSettings {
    fn from(config: &PackConfig) -> Self {
        Self {
            ceiling: config.gate_image_size,
            quality_step: config.quality_step.max(1),
            max_attempts: config.max_compression_attempts(),
        }
    }
}

/// Result of the recompression loop.
#[derive(Debug, Clone)]
pub struct CompressionState {
    pub buffer: Vec<u8>,
    pub quality: u8,
    /// Whether `buffer` fits under the ceiling.
    pub converged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageKind {
    Raster(ImageFormat),
    Animated,
    Vector,
}

impl ImageKind {
    fn detect(path: &Path) -> Result<Self, ImageError> {
        let is_svg = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("svg"))
            .unwrap_or(false);
        if is_svg {
            return Ok(Self::Vector);
        }
        let reader = ImageReader::open(path)?.with_guessed_format()?;
        match reader.format() {
            Some(ImageFormat::Gif) => Ok(Self::Animated),
            Some(format) => Ok(Self::Raster(format)),
            None => {
                let head = std::fs::read(path)?;
                let prefix = String::from_utf8_lossy(&head[..head.len().min(1024)]).to_ascii_lowercase();
                if prefix.contains("<svg") {
                    Ok(Self::Vector)
                } else {
                    Err(ImageError::Decode {
                        path: path.display().to_string(),
                        detail: "unrecognized image format".into(),
                    })
                }
            }
        }
    }
}

fn is_recompressible(format: ImageFormat) -> bool {
    matches!(format, ImageFormat::Jpeg | ImageFormat::Png)
}

/// Transform every referenced image concurrently. Results keep input order;
/// failures and missing files are logged and left out.
pub async fn transform_images(
    references: Vec<ImageReference>,
    base_dir: &Path,
    images_dir: &Path,
    settings: CompressionSettings,
) -> Vec<ImageOutcome> {
    let handles: Vec<_> = references
        .into_iter()
        .map(|reference| {
            let base_dir = base_dir.to_path_buf();
            let images_dir = images_dir.to_path_buf();
            let path = reference.path.clone();
            let handle = tokio::task::spawn_blocking(move || {
                transform_image(&reference, &base_dir, &images_dir, settings)
            });
            (path, handle)
        })
        .collect();

    let mut outcomes = Vec::new();
    for (path, handle) in handles {
        let result = handle.await.unwrap_or_else(|e| {
            Err(ImageError::Task {
                path: path.clone(),
                detail: e.to_string(),
            })
        });
        match result {
            Ok(Some(outcome)) => outcomes.push(outcome),
            Ok(None) => {}
            Err(e) => tracing::warn!("Skipping image {}: {}", path, e),
        }
    }
    assign_unique_names(&mut outcomes);
    outcomes
}

/// Keep archive names unique. Images archived under their document path keep
/// it; a renamed image that lands on a taken name gets a numbered suffix
/// (`logo.png` -> `logo-1.png`). Any remaining duplicate is dropped.
fn assign_unique_names(outcomes: &mut Vec<ImageOutcome>) {
    let mut taken: HashSet<String> = outcomes
        .iter()
        .filter(|o| o.renamed_from.is_none())
        .map(|o| o.image.name.clone())
        .collect();

    for outcome in outcomes.iter_mut().filter(|o| o.renamed_from.is_some()) {
        if taken.insert(outcome.image.name.clone()) {
            continue;
        }
        let stem = outcome
            .image
            .name
            .strip_suffix(".png")
            .unwrap_or(&outcome.image.name)
            .to_string();
        let mut n = 1;
        while taken.contains(&format!("{stem}-{n}.png")) {
            n += 1;
        }
        let name = format!("{stem}-{n}.png");
        tracing::warn!("{} is already in use; archiving as {}", outcome.image.name, name);
        taken.insert(name.clone());
        outcome.image.name = name;
    }

    let mut seen = HashSet::new();
    outcomes.retain(|o| {
        let fresh = seen.insert(o.image.name.clone());
        if !fresh {
            tracing::warn!("Skipping image {}: duplicate archive name", o.image.name);
        }
        fresh
    });
}

/// Apply the first matching transform to one image. `Ok(None)` means the
/// file is missing or outside the image directory.
///
/// SVG files are always rasterized, even when they declare a width.
pub fn transform_image(
    reference: &ImageReference,
    base_dir: &Path,
    images_dir: &Path,
    settings: CompressionSettings,
) -> Result<Option<ImageOutcome>, ImageError> {
    let Some(file) = resolve_within(&base_dir.join(&reference.path), images_dir) else {
        tracing::warn!("Image {} not found in {}", reference.path, images_dir.display());
        return Ok(None);
    };

    let outcome = match ImageKind::detect(&file)? {
        ImageKind::Vector => {
            let data = std::fs::read(&file)?;
            let name = png_name(&reference.path);
            ImageOutcome {
                image: ProcessedImage {
                    name: name.clone(),
                    content: ImageSource::Buffer(rasterize_svg(&data, reference.declared_width, &file)?),
                },
                action: ImageAction::Rasterized,
                renamed_from: (name != reference.path).then(|| reference.path.clone()),
            }
        }
        ImageKind::Animated => passthrough(reference, file),
        ImageKind::Raster(format) => {
            let file_size = std::fs::metadata(&file)?.len();
            if let Some(buffer) = resize(&file, format, reference.declared_width, settings)? {
                ImageOutcome {
                    image: ProcessedImage {
                        name: reference.path.clone(),
                        content: ImageSource::Buffer(buffer),
                    },
                    action: ImageAction::Resized,
                    renamed_from: None,
                }
            } else if file_size >= settings.ceiling && is_recompressible(format) {
                let img = decode(&file)?;
                match recompress(&img, format, settings).map_err(|e| encode_error(&file, e))? {
                    Some(state) => {
                        if !state.converged {
                            tracing::warn!(
                                "Could not bring {} under {} bytes; using {} bytes at quality {}",
                                reference.path,
                                settings.ceiling,
                                state.buffer.len(),
                                state.quality
                            );
                        }
                        ImageOutcome {
                            image: ProcessedImage {
                                name: reference.path.clone(),
                                content: ImageSource::Buffer(state.buffer),
                            },
                            action: ImageAction::Recompressed,
                            renamed_from: None,
                        }
                    }
                    None => passthrough(reference, file),
                }
            } else {
                passthrough(reference, file)
            }
        }
    };
    tracing::debug!("{}: {:?}", reference.path, outcome.action);
    Ok(Some(outcome))
}

fn passthrough(reference: &ImageReference, file: PathBuf) -> ImageOutcome {
    ImageOutcome {
        image: ProcessedImage {
            name: reference.path.clone(),
            content: ImageSource::File(file),
        },
        action: ImageAction::Passthrough,
        renamed_from: None,
    }
}

/// Canonical path of `path` if it is a file inside `root`.
fn resolve_within(path: &Path, root: &Path) -> Option<PathBuf> {
    let file = path.canonicalize().ok()?;
    let root = root.canonicalize().ok()?;
    (file.starts_with(&root) && file.is_file()).then_some(file)
}

fn decode(path: &Path) -> Result<DynamicImage, ImageError> {
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| ImageError::Decode {
            path: path.display().to_string(),
            detail: e.to_string(),
        })
}

fn encode_error(path: &Path, e: image::ImageError) -> ImageError {
    ImageError::Encode {
        path: path.display().to_string(),
        detail: e.to_string(),
    }
}

/// Shrink to `declared_width` when the image is wider. Returns `None` when no
/// resize applies.
fn resize(
    path: &Path,
    format: ImageFormat,
    declared_width: Option<u32>,
    settings: CompressionSettings,
) -> Result<Option<Vec<u8>>, ImageError> {
    let Some(width) = declared_width else {
        return Ok(None);
    };
    let (natural_width, _) = image::image_dimensions(path).map_err(|e| ImageError::Decode {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;
    if natural_width <= width {
        return Ok(None);
    }

    let img = decode(path)?;
    let height = scaled_height(img.width(), img.height(), width);
    let resized = img.resize_exact(width, height, FilterType::Lanczos3);
    let buffer = encode(&resized, format, RESIZE_JPEG_QUALITY).map_err(|e| encode_error(path, e))?;
    if (buffer.len() as u64) <= settings.ceiling || !is_recompressible(format) {
        return Ok(Some(buffer));
    }

    match recompress(&resized, format, settings).map_err(|e| encode_error(path, e))? {
        Some(state) if state.buffer.len() < buffer.len() => {
            if !state.converged {
                tracing::warn!(
                    "Resized {} still exceeds {} bytes at quality {}",
                    path.display(),
                    settings.ceiling,
                    state.quality
                );
            }
            Ok(Some(state.buffer))
        }
        _ => Ok(Some(buffer)),
    }
}

fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    let scaled = f64::from(height) * f64::from(target_width) / f64::from(width.max(1));
    (scaled.round() as u32).max(1)
}

/// Encode at quality 100, then lower by the configured step until the result
/// fits the ceiling. Returns `None` for formats other than JPEG and PNG.
///
/// At most `max_attempts` encodes are performed. If none fits, the smallest
/// attempt is returned with `converged == false`.
pub fn recompress(
    img: &DynamicImage,
    format: ImageFormat,
    settings: CompressionSettings,
) -> Result<Option<CompressionState>, image::ImageError> {
    if !is_recompressible(format) {
        return Ok(None);
    }

    let step = i32::from(settings.quality_step.max(1));
    let mut quality = 100i32;
    let mut best: Option<CompressionState> = None;

    for _ in 0..settings.max_attempts {
        if quality <= 0 {
            break;
        }
        let buffer = encode(img, format, quality as u8)?;
        let fits = buffer.len() as u64 <= settings.ceiling;
        if best.as_ref().map_or(true, |b| buffer.len() < b.buffer.len()) {
            best = Some(CompressionState {
                buffer,
                quality: quality as u8,
                converged: fits,
            });
        }
        if fits {
            break;
        }
        quality -= step;
    }
    Ok(best)
}

fn encode(img: &DynamicImage, format: ImageFormat, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            let rgb = img.to_rgb8();
            JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(&rgb)?;
        }
        ImageFormat::Png if quality >= 100 => {
            img.write_with_encoder(PngEncoder::new_with_quality(
                &mut buffer,
                CompressionType::Best,
                PngFilter::Adaptive,
            ))?;
        }
        ImageFormat::Png => {
            let pixels = posterize(img.to_rgba8(), quality);
            PngEncoder::new_with_quality(&mut buffer, CompressionType::Best, PngFilter::Adaptive).write_image(
                pixels.as_raw(),
                pixels.width(),
                pixels.height(),
                ExtendedColorType::Rgba8,
            )?;
        }
        other => img.write_to(&mut Cursor::new(&mut buffer), other)?,
    }
    Ok(buffer)
}

/// Reduce colour depth as PNG "quality" drops: 8 bits per channel at 100,
/// down to 1 bit near 0. Alpha is left alone.
fn posterize(mut pixels: RgbaImage, quality: u8) -> RgbaImage {
    let bits = 1 + u32::from(quality.min(100)) * 7 / 100;
    if bits >= 8 {
        return pixels;
    }
    let max = (1u32 << bits) - 1;
    for pixel in pixels.pixels_mut() {
        for channel in pixel.0.iter_mut().take(3) {
            let level = (u32::from(*channel) * max + 127) / 255;
            *channel = (level * 255 / max) as u8;
        }
    }
    pixels
}

/// Render an SVG to PNG. A declared width scales the output proportionally;
/// otherwise the document's intrinsic size is used.
pub fn rasterize_svg(data: &[u8], declared_width: Option<u32>, path: &Path) -> Result<Vec<u8>, ImageError> {
    let rasterize_error = |detail: String| ImageError::Rasterize {
        path: path.display().to_string(),
        detail,
    };

    let options = usvg::Options {
        resources_dir: path.parent().map(Path::to_path_buf),
        ..usvg::Options::default()
    };
    let tree = usvg::Tree::from_data(data, &options).map_err(|e| rasterize_error(e.to_string()))?;

    let size = tree.size();
    let scale = match declared_width {
        Some(w) if size.width() > 0.0 => w as f32 / size.width(),
        _ => 1.0,
    };
    let width = (size.width() * scale).round().max(1.0) as u32;
    let height = (size.height() * scale).round().max(1.0) as u32;

    let mut pixmap = tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| rasterize_error(format!("invalid canvas size {width}x{height}")))?;
    resvg::render(&tree, tiny_skia::Transform::from_scale(scale, scale), &mut pixmap.as_mut());
    pixmap.encode_png().map_err(|e| rasterize_error(e.to_string()))
}

/// `images/logo.svg` -> `images/logo.png`
fn png_name(path: &str) -> String {
    let file_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[file_start..].rfind('.') {
        Some(dot) if dot > 0 => format!("{}.png", &path[..file_start + dot]),
        _ => format!("{path}.png"),
    }
}
