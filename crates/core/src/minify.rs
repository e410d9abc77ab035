//! Final HTML minification.
//!
//! Comments are stripped except Outlook conditional comments (`[if …]` and
//! `[endif]` markers), which are swapped for placeholders while the minifier
//! runs and restored afterwards. Character references are shielded the same
//! way so the minifier cannot decode them back into raw characters.
//!
//! Stylesheets are only compacted (comments and whitespace). The CSS
//! minifier is off because it rewrites media queries into range syntax
//! (`width<=600px`) that email clients do not understand.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::Serialize;

use crate::error::MinifyError;

const PLACEHOLDER_MARK: char = '\u{E000}';
const AMPERSAND_MARK: char = '\u{E001}';

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MinifyReport {
    pub original_length: usize,
    pub cleaned_length: usize,
    pub bytes_saved: usize,
}

fn comment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"))
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("\u{E000}mailpack-cc-(\\d+)\u{E000}").expect("valid regex"))
}

fn entity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[A-Za-z][A-Za-z0-9]*);").expect("valid regex"))
}

fn style_content_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<style\b[^>]*>(.*?)</style\s*>").expect("valid regex"))
}

fn style_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)(<style\b[^>]*>)(.*?)(</style\s*>)").expect("valid regex"))
}

fn class_selector_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.(-?[_a-zA-Z][_a-zA-Z0-9-]*)").expect("valid regex"))
}

fn is_conditional_comment(comment: &str) -> bool {
    comment.contains("[if") || comment.contains("[endif")
}

/// Minify `html`, returning the result and its size report.
pub fn minify_html(html: &str) -> Result<(String, MinifyReport), MinifyError> {
    let used_classes = referenced_classes(html);

    let mut preserved = Vec::new();
    let protected = comment_regex()
        .replace_all(html, |caps: &Captures<'_>| {
            let comment = &caps[0];
            if is_conditional_comment(comment) {
                preserved.push(collapse_whitespace(comment));
                format!("{PLACEHOLDER_MARK}mailpack-cc-{}{PLACEHOLDER_MARK}", preserved.len() - 1)
            } else {
                String::new()
            }
        })
        .into_owned();

    let protected = entity_regex()
        .replace_all(&protected, |caps: &Captures<'_>| format!("{AMPERSAND_MARK}{};", &caps[1]))
        .into_owned();

    let protected = style_block_regex()
        .replace_all(&protected, |caps: &Captures<'_>| {
            format!("{}{}{}", &caps[1], compact_css(&caps[2]), &caps[3])
        })
        .into_owned();

    let pruned = prune_unused_classes(&protected, &used_classes)?;
    let minified = String::from_utf8(minify_html::minify(pruned.as_bytes(), &minify_config()))?;
    let minified = minified.replace(AMPERSAND_MARK, "&");

    let restored = placeholder_regex()
        .replace_all(&minified, |caps: &Captures<'_>| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| preserved.get(i).cloned())
                .unwrap_or_default()
        })
        .into_owned();

    let report = MinifyReport {
        original_length: html.len(),
        cleaned_length: restored.len(),
        bytes_saved: html.len().saturating_sub(restored.len()),
    };
    Ok((restored, report))
}

fn minify_config() -> minify_html::Cfg {
    let mut cfg = minify_html::Cfg::new();
    cfg.do_not_minify_doctype = true;
    cfg.ensure_spec_compliant_unquoted_attribute_values = true;
    cfg.keep_closing_tags = true;
    cfg.keep_html_and_head_opening_tags = true;
    cfg.keep_spaces_between_attributes = true;
    cfg.keep_comments = false;
    cfg.minify_css = false;
    cfg.minify_js = false;
    cfg.remove_processing_instructions = true;
    cfg
}

/// Class names used as selectors in any `<style>` block, including blocks
/// inside conditional comments.
fn referenced_classes(html: &str) -> HashSet<String> {
    style_content_regex()
        .captures_iter(html)
        .flat_map(|style| {
            class_selector_regex()
                .captures_iter(&style[1])
                .map(|c| c[1].to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Drop class tokens no stylesheet refers to. Empty `class` attributes are removed.
pub fn prune_unused_classes(html: &str, used: &HashSet<String>) -> Result<String, MinifyError> {
    lol_html::rewrite_str(
        html,
        lol_html::RewriteStrSettings {
            element_content_handlers: vec![lol_html::element!("[class]", |el| {
                let classes = el.get_attribute("class").unwrap_or_default();
                let kept: Vec<&str> = classes
                    .split_whitespace()
                    .filter(|c| used.contains(*c))
                    .collect();
                if kept.is_empty() {
                    el.remove_attribute("class");
                } else {
                    el.set_attribute("class", &kept.join(" "))?;
                }
                Ok(())
            })],
            ..lol_html::RewriteStrSettings::default()
        },
    )
    .map_err(|e| MinifyError::Rewrite(e.to_string()))
}

/// Strip CSS comments and the whitespace around braces, semicolons and
/// commas. Selectors, at-rule preludes and values are left as written.
fn compact_css(css: &str) -> String {
    static COMMENTS: OnceLock<Regex> = OnceLock::new();
    static SPACES: OnceLock<Regex> = OnceLock::new();
    static PUNCTUATION: OnceLock<Regex> = OnceLock::new();
    let comments = COMMENTS.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid regex"));
    let spaces = SPACES.get_or_init(|| Regex::new(r"\s+").expect("valid regex"));
    let punctuation = PUNCTUATION.get_or_init(|| Regex::new(r"\s*([{};,])\s*").expect("valid regex"));

    let css = comments.replace_all(css, "");
    let css = spaces.replace_all(&css, " ");
    punctuation.replace_all(&css, "$1").trim().to_string()
}

fn collapse_whitespace(comment: &str) -> String {
    static BETWEEN_TAGS: OnceLock<Regex> = OnceLock::new();
    static LINE_BREAKS: OnceLock<Regex> = OnceLock::new();
    let between = BETWEEN_TAGS.get_or_init(|| Regex::new(r">\s+<").expect("valid regex"));
    let breaks = LINE_BREAKS.get_or_init(|| Regex::new(r"\s*\n\s*").expect("valid regex"));
    let tight = between.replace_all(comment, "><");
    breaks.replace_all(&tight, " ").into_owned()
}
