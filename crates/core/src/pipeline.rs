//! End-to-end packaging: template in, ZIP archive (and optional extraction or
//! webletter) out.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;

use crate::archive::{extract_archive, ArchiveBuilder};
use crate::config::PackConfig;
use crate::discover::discover_images;
use crate::document::{load_stylesheet, Document, TemplateLayout};
use crate::error::{PackError, PublishError, SourceError};
use crate::images::{transform_images, CompressionSettings, ImageAction};
use crate::links::{check_links, http_client, remote_links, LinkReport};
use crate::minify::minify_html;
use crate::progress::{emit_progress, PipelineState, ProgressHandler};
use crate::security::ExtractLimits;
use crate::transform::{apply_stages, text_stages, Stage, TrimHrefs};
use crate::webletter;

/// Cleaned HTML at or above this size triggers a warning.
pub const HTML_SIZE_WARNING: usize = 100_000;

/// What the positional CLI argument points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Html,
    Archive,
}

impl InputKind {
    /// Classify `path` by extension. Missing files and other extensions are errors.
    pub fn detect(path: &Path) -> Result<Self, SourceError> {
        if !path.is_file() {
            return Err(SourceError::NotFound(path.display().to_string()));
        }
        match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
            Some("html") | Some("htm") => Ok(Self::Html),
            Some("zip") => Ok(Self::Archive),
            _ => Err(SourceError::Unsupported(path.display().to_string())),
        }
    }
}

/// Follow-up steps once the archive is written.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackOptions {
    pub extract: bool,
    pub publish: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    pub name: String,
    pub action: ImageAction,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub archive_path: PathBuf,
    pub images: Vec<ImageSummary>,
    pub original_size: usize,
    pub cleaned_size: usize,
    pub bytes_saved: usize,
    pub archive_size: u64,
    pub elapsed_ms: u64,
    pub links: LinkReport,
    pub extracted_to: Option<PathBuf>,
    pub webletter_url: Option<String>,
}

impl ProcessReport {
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Size change of the HTML as a whole percentage (negative when smaller).
    pub fn html_change_percent(&self) -> i64 {
        if self.original_size == 0 {
            return 0;
        }
        let ratio = self.cleaned_size as f64 / self.original_size as f64 * 100.0;
        ratio.round() as i64 - 100
    }
}

/// Result of a run on an existing `.zip`.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveReport {
    pub archive_path: PathBuf,
    pub extracted_to: Option<PathBuf>,
    pub webletter_url: Option<String>,
}

/// Package the HTML template at `source`.
pub async fn package(
    source: &Path,
    config: &PackConfig,
    options: &PackOptions,
    progress: Option<&dyn ProgressHandler>,
) -> Result<ProcessReport, PackError> {
    let started = Instant::now();
    let layout = TemplateLayout::new(source, config);
    let mut doc = Document::load(source)?;
    tracing::info!("Packaging {}", source.display());

    emit_progress(progress, PipelineState::Discovering, None);
    let references = if layout.images_dir.is_dir() {
        let references = discover_images(&doc.html);
        if references.is_empty() {
            tracing::warn!("No local images found");
        }
        references
    } else {
        tracing::warn!("Images directory is missing: {}", layout.images_dir.display());
        Vec::new()
    };

    emit_progress(
        progress,
        PipelineState::TransformingImages,
        Some(&format!("{} images", references.len())),
    );
    let outcomes = transform_images(
        references,
        &layout.dir,
        &layout.images_dir,
        CompressionSettings::from(config),
    )
    .await;
    for outcome in &outcomes {
        if let Some(old) = &outcome.renamed_from {
            doc.rewrite_path(old, &outcome.image.name);
        }
    }

    if !doc.declares_utf8() {
        tracing::warn!("Meta tag \"Content-Type\" missing");
    }

    let trim = TrimHrefs;
    emit_progress(progress, trim.state(), None);
    let html = trim.apply(&doc.html)?;
    let links = verify_links(&html, config).await;

    let css = load_stylesheet(&layout.css_path)?;
    let html = apply_stages(html, &text_stages(css, &config.css_file_name), progress)?;

    emit_progress(progress, PipelineState::Minifying, None);
    let (html, minified) = minify_html(&html)?;
    if minified.cleaned_length >= HTML_SIZE_WARNING {
        tracing::warn!("The size of the HTML file exceeds 100 KB");
    }

    emit_progress(progress, PipelineState::Archiving, None);
    let mut builder = ArchiveBuilder::create(&layout.archive_path, config.compression_level)?;
    for outcome in &outcomes {
        builder.add_image(&outcome.image)?;
    }
    builder.add_bytes(&config.html_file_name, html.as_bytes())?;
    let archive_size = builder.finish()?;
    tracing::info!("Archive created: {}", layout.archive_path.display());

    emit_progress(progress, PipelineState::Finalizing, None);
    let extracted_to = if options.extract {
        Some(extract_to_sibling(&layout.archive_path, config)?)
    } else {
        None
    };
    let webletter_url = if options.publish {
        Some(publish_archive(&layout.archive_path, &layout.state_path, config).await?)
    } else {
        None
    };

    emit_progress(progress, PipelineState::Done, None);
    Ok(ProcessReport {
        archive_path: layout.archive_path,
        images: outcomes
            .iter()
            .map(|o| ImageSummary {
                name: o.image.name.clone(),
                action: o.action,
            })
            .collect(),
        original_size: doc.original_size,
        cleaned_size: minified.cleaned_length,
        bytes_saved: doc.original_size.saturating_sub(minified.cleaned_length),
        archive_size,
        elapsed_ms: started.elapsed().as_millis() as u64,
        links,
        extracted_to,
        webletter_url,
    })
}

/// Handle an existing archive: publish it when `publish` is set, otherwise
/// extract it next to itself.
pub async fn process_archive(
    archive: &Path,
    config: &PackConfig,
    publish: bool,
    progress: Option<&dyn ProgressHandler>,
) -> Result<ArchiveReport, PackError> {
    emit_progress(progress, PipelineState::Finalizing, None);
    let mut report = ArchiveReport {
        archive_path: archive.to_path_buf(),
        extracted_to: None,
        webletter_url: None,
    };
    if publish {
        let dir = archive.parent().unwrap_or(Path::new("."));
        let state_path = dir.join(&config.state_file_name);
        report.webletter_url = Some(publish_archive(archive, &state_path, config).await?);
    } else {
        report.extracted_to = Some(extract_to_sibling(archive, config)?);
    }
    emit_progress(progress, PipelineState::Done, None);
    Ok(report)
}

async fn verify_links(html: &str, config: &PackConfig) -> LinkReport {
    let urls = remote_links(html);
    if urls.is_empty() {
        return LinkReport::default();
    }
    match http_client(config) {
        Ok(client) => check_links(&client, urls).await,
        Err(e) => {
            tracing::warn!("Skipping link checks: {}", e);
            LinkReport::default()
        }
    }
}

fn extract_to_sibling(archive: &Path, config: &PackConfig) -> Result<PathBuf, PackError> {
    let dest = archive
        .parent()
        .unwrap_or(Path::new("."))
        .join(&config.extract_dir_name);
    extract_archive(archive, &dest, &ExtractLimits::default())?;
    Ok(dest)
}

async fn publish_archive(archive: &Path, state_path: &Path, config: &PackConfig) -> Result<String, PackError> {
    let client = webletter::upload_client(config).map_err(|e| PublishError::Network(e.to_string()))?;
    let outcome = webletter::publish(&client, config, archive, state_path).await?;
    Ok(outcome.url)
}
