//! The HTML template being packaged and the paths derived from it.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::PackConfig;
use crate::error::SourceError;

/// Paths next to a template file, resolved once from the config.
#[derive(Debug, Clone)]
pub struct TemplateLayout {
    /// The `.html` source file.
    pub source: PathBuf,
    /// Directory containing the source file.
    pub dir: PathBuf,
    /// File stem of the source (`template` for `template.html`).
    pub stem: String,
    pub images_dir: PathBuf,
    pub css_path: PathBuf,
    /// `<dir>/<stem>.zip`
    pub archive_path: PathBuf,
    pub state_path: PathBuf,
}

impl TemplateLayout {
    pub fn new(source: &Path, config: &PackConfig) -> Self {
        let dir = source
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("template")
            .to_string();
        Self {
            source: source.to_path_buf(),
            images_dir: dir.join(&config.image_dir_name),
            css_path: dir.join(&config.css_file_name),
            archive_path: dir.join(format!("{stem}.zip")),
            state_path: dir.join(&config.state_file_name),
            dir,
            stem,
        }
    }
}

/// HTML text flowing through the pipeline.
#[derive(Debug, Clone)]
pub struct Document {
    pub html: String,
    /// Byte length of the HTML as loaded from disk.
    pub original_size: usize,
}

impl Document {
    /// Load the template. An empty (or whitespace-only) file is an error.
    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let html = std::fs::read_to_string(path)?;
        Self::from_html(html).ok_or_else(|| SourceError::Empty(path.display().to_string()))
    }

    pub fn from_html(html: String) -> Option<Self> {
        if html.trim().is_empty() {
            return None;
        }
        Some(Self {
            original_size: html.len(),
            html,
        })
    }

    /// Whether the document carries
    /// `<meta http-equiv="Content-Type" content="text/html; charset=utf-8">`.
    pub fn declares_utf8(&self) -> bool {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(r#"(?i)<meta\b[^>]*http-equiv\s*=\s*["']?content-type["']?[^>]*charset\s*=\s*utf-8"#)
                .expect("valid regex")
        })
        .is_match(&self.html)
    }

    /// Replace every literal occurrence of `from` with `to`.
    pub fn rewrite_path(&mut self, from: &str, to: &str) {
        if from != to && self.html.contains(from) {
            self.html = self.html.replace(from, to);
        }
    }
}

/// Load the companion stylesheet if it exists.
pub fn load_stylesheet(path: &Path) -> Result<Option<String>, SourceError> {
    if !path.is_file() {
        return Ok(None);
    }
    Ok(Some(std::fs::read_to_string(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_derives_sibling_paths() {
        let cfg = PackConfig::default();
        let layout = TemplateLayout::new(Path::new("/mail/spring/template.html"), &cfg);
        assert_eq!(layout.dir, PathBuf::from("/mail/spring"));
        assert_eq!(layout.stem, "template");
        assert_eq!(layout.images_dir, PathBuf::from("/mail/spring/images"));
        assert_eq!(layout.css_path, PathBuf::from("/mail/spring/style.css"));
        assert_eq!(layout.archive_path, PathBuf::from("/mail/spring/template.zip"));
        assert_eq!(layout.state_path, PathBuf::from("/mail/spring/config.json"));
    }

    #[test]
    fn bare_file_name_uses_current_dir() {
        let layout = TemplateLayout::new(Path::new("letter.html"), &PackConfig::default());
        assert_eq!(layout.dir, PathBuf::from("."));
        assert_eq!(layout.archive_path, PathBuf::from("./letter.zip"));
    }

    #[test]
    fn empty_document_is_rejected() {
        assert!(Document::from_html("  \n".to_string()).is_none());
        let doc = Document::from_html("<p>hi</p>".to_string()).unwrap();
        assert_eq!(doc.original_size, 9);
    }

    #[test]
    fn load_reports_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.html");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(Document::load(&path), Err(SourceError::Empty(_))));
    }

    #[test]
    fn utf8_meta_tag_detection() {
        let doc = Document::from_html(
            r#"<head><meta http-equiv="Content-Type" content="text/html; charset=utf-8" /></head>"#.to_string(),
        )
        .unwrap();
        assert!(doc.declares_utf8());
        let doc = Document::from_html(r#"<head><meta charset="utf-8"></head>"#.to_string()).unwrap();
        assert!(!doc.declares_utf8());
    }

    #[test]
    fn rewrite_path_replaces_all_literal_occurrences() {
        let mut doc = Document::from_html(
            r#"<img src="images/logo.svg"><a href="images/logo.svg">x</a>"#.to_string(),
        )
        .unwrap();
        doc.rewrite_path("images/logo.svg", "images/logo.png");
        assert!(!doc.html.contains("logo.svg"));
        assert_eq!(doc.html.matches("images/logo.png").count(), 2);
    }
}
