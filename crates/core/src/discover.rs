//! Local image discovery.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;

/// A local image referenced by the template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageReference {
    /// Document-relative path, without a leading `./`.
    pub path: String,
    /// Target width from the tag's `data-width` attribute.
    pub declared_width: Option<u32>,
}

/// Collect local `<img>` sources in document order, one entry per distinct path.
///
/// The first tag referencing a path decides its declared width.
pub fn discover_images(html: &str) -> Vec<ImageReference> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("img[src]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut images = Vec::new();
    for img in document.select(&selector) {
        let Some(src) = img.value().attr("src") else {
            continue;
        };
        if is_remote(src) {
            continue;
        }
        let path = normalize_path(src);
        if path.is_empty() || !seen.insert(path.clone()) {
            continue;
        }
        let declared_width = img
            .value()
            .attr("data-width")
            .and_then(|w| w.trim().parse::<u32>().ok())
            .filter(|w| *w > 0);
        images.push(ImageReference {
            path,
            declared_width,
        });
    }
    images
}

fn is_remote(src: &str) -> bool {
    let lower = src.trim_start().to_ascii_lowercase();
    lower.starts_with("http:")
        || lower.starts_with("https:")
        || lower.starts_with("//")
        || lower.starts_with("data:")
        || lower.starts_with("cid:")
}

fn normalize_path(src: &str) -> String {
    let mut path = src.trim();
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    path.to_string()
}

fn data_width_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\s+data-width\s*=\s*["']?\d+["']?"#).expect("valid regex"))
}

/// Remove every `data-width` attribute from the markup.
pub fn strip_data_width(html: &str) -> String {
    data_width_regex().replace_all(html, "").into_owned()
}
