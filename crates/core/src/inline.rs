//! CSS inlining: stylesheet rules become `style` attributes.
//!
//! `@media` blocks cannot be inlined; they are collected and written back into a
//! single `<style>` element in `<head>` after the inliner runs.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::error::InlineError;

/// Nested `var()` references are resolved at most this deep.
const MAX_VAR_DEPTH: usize = 8;

fn style_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)(<style\b[^>]*>)(.*?)(</style\s*>)").expect("valid regex"))
}

fn custom_property_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(--[A-Za-z0-9_-]+)\s*:\s*([^;{}]+);?").expect("valid regex"))
}

fn var_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"var\(\s*(--[A-Za-z0-9_-]+)\s*(?:,\s*([^()]*))?\)").expect("valid regex"))
}

/// Inline `css` (the companion stylesheet, if any) and any `<style>` blocks into `html`.
///
/// With a stylesheet, the `<link>` pointing at `css_file_name` is removed first.
/// Without one, only the document's own `<style>` blocks are inlined and a
/// warning is logged.
///
/// The inliner reserializes the whole document through html5ever, so the
/// output is normalized HTML: tables gain an explicit `<tbody>`, for example.
pub fn inline_css(html: &str, css: Option<&str>, css_file_name: &str) -> Result<String, InlineError> {
    let mut html = match css {
        Some(_) => remove_stylesheet_link(html, css_file_name),
        None => {
            tracing::warn!("CSS file {} not found", css_file_name);
            html.to_string()
        }
    };

    let variables = collect_custom_properties(&html, css.unwrap_or(""));
    html = resolve_style_blocks(&html, &variables);
    let css = css.map(|c| strip_custom_properties(&resolve_variables(c, &variables)));

    let mut media = String::new();
    if let Some(css) = &css {
        media.push_str(&extract_media_blocks(css));
    }
    for caps in style_block_regex().captures_iter(&html) {
        media.push_str(&extract_media_blocks(&caps[2]));
    }

    let inliner = css_inline::CSSInliner::options()
        .load_remote_stylesheets(false)
        .keep_link_tags(true)
        .extra_css(css.map(Cow::Owned))
        .build();
    let inlined = inliner
        .inline(&html)
        .map_err(|e| InlineError::Engine(e.to_string()))?;

    Ok(insert_head_style(inlined, &media))
}

/// Remove `<link>` tags whose `href` names the companion stylesheet.
pub fn remove_stylesheet_link(html: &str, css_file_name: &str) -> String {
    let pattern = format!(
        r#"(?i)<link\b[^>]*\bhref\s*=\s*["']?(?:\./)?{}["']?[^>]*>\s*"#,
        regex::escape(css_file_name)
    );
    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(html, "").into_owned(),
        Err(_) => html.to_string(),
    }
}

/// Gather `--name: value` declarations from the stylesheet and `<style>` blocks.
/// Later declarations win.
fn collect_custom_properties(html: &str, css: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    let mut sources = vec![css.to_string()];
    sources.extend(style_block_regex().captures_iter(html).map(|c| c[2].to_string()));
    for source in &sources {
        for caps in custom_property_regex().captures_iter(source) {
            vars.insert(caps[1].to_string(), caps[2].trim().to_string());
        }
    }
    vars
}

/// Replace `var(--x)` / `var(--x, fallback)` with literal values.
/// Unknown variables without a fallback are left as written.
pub fn resolve_variables(css: &str, vars: &HashMap<String, String>) -> String {
    let mut current = css.to_string();
    for _ in 0..MAX_VAR_DEPTH {
        if !current.contains("var(") {
            break;
        }
        let next = var_regex()
            .replace_all(&current, |caps: &Captures<'_>| {
                if let Some(value) = vars.get(&caps[1]) {
                    value.clone()
                } else if let Some(fallback) = caps.get(2) {
                    fallback.as_str().trim().to_string()
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned();
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn strip_custom_properties(css: &str) -> String {
    custom_property_regex().replace_all(css, "").into_owned()
}

fn resolve_style_blocks(html: &str, vars: &HashMap<String, String>) -> String {
    if vars.is_empty() {
        return html.to_string();
    }
    style_block_regex()
        .replace_all(html, |caps: &Captures<'_>| {
            let body = strip_custom_properties(&resolve_variables(&caps[2], vars));
            format!("{}{}{}", &caps[1], body, &caps[3])
        })
        .into_owned()
}

/// Return the top-level `@media { … }` blocks of a stylesheet, concatenated.
pub fn extract_media_blocks(css: &str) -> String {
    let bytes = css.as_bytes();
    let mut out = String::new();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = css[i + 2..].find("*/").map(|end| i + 2 + end + 2).unwrap_or(bytes.len());
                continue;
            }
            b'@' if depth == 0 && bytes.len() - i >= 6 && bytes[i..i + 6].eq_ignore_ascii_case(b"@media") => {
                if let Some(end) = block_end(css, i) {
                    out.push_str(css[i..end].trim());
                    i = end;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
    out
}

/// Byte index just past the closing brace of the block starting at or after `start`.
fn block_end(css: &str, start: usize) -> Option<usize> {
    let open = start + css[start..].find('{')?;
    let mut depth = 0usize;
    for (offset, b) in css.as_bytes()[open..].iter().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn insert_head_style(html: String, css: &str) -> String {
    if css.trim().is_empty() {
        return html;
    }
    let style = format!("<style>{css}</style>");
    let lower = html.to_ascii_lowercase();
    match lower.find("</head>") {
        Some(pos) => {
            let mut out = String::with_capacity(html.len() + style.len());
            out.push_str(&html[..pos]);
            out.push_str(&style);
            out.push_str(&html[pos..]);
            out
        }
        None => format!("{style}{html}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html><html><head><link rel="stylesheet" href="style.css" /></head><body><p class="lead">Hello</p></body></html>"#;

    fn compact(html: &str) -> String {
        html.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn stylesheet_rules_become_inline_styles() {
        let out = inline_css(PAGE, Some(".lead { color: red; }"), "style.css").unwrap();
        assert!(!out.contains("style.css"));
        assert!(compact(&out).contains(r#"style="color:red"#), "{out}");
    }

    #[test]
    fn important_rules_win_over_inline_styles() {
        let html = r#"<html><head></head><body><p class="x" style="color: blue">Hi</p></body></html>"#;
        let out = compact(&inline_css(html, Some(".x { color: red !important; }"), "style.css").unwrap());
        assert!(out.contains("color:red"), "{out}");
        assert!(!out.contains("color:blue"), "{out}");
    }

    #[test]
    fn missing_stylesheet_still_inlines_style_blocks() {
        let html = r#"<html><head><link rel="stylesheet" href="style.css"><style>p { margin: 0; }</style></head><body><p>Hi</p></body></html>"#;
        let out = inline_css(html, None, "style.css").unwrap();
        assert!(out.contains(r#"<link rel="stylesheet" href="style.css">"#), "{out}");
        let out = compact(&out);
        assert!(out.contains(r#"<pstyle="margin:0"#), "{out}");
        assert!(!out.contains("<style>"));
    }

    #[test]
    fn tables_gain_tbody_when_reserialized() {
        let html = "<html><head></head><body><table><tr><td>x</td></tr></table></body></html>";
        let out = compact(&inline_css(html, None, "style.css").unwrap());
        assert!(out.contains("<table><tbody><tr><td>x</td></tr></tbody></table>"), "{out}");
    }

    #[test]
    fn custom_properties_are_resolved_before_inlining() {
        let css = ":root { --brand: #ff0000; } .lead { color: var(--brand); padding: var(--gap, 4px); }";
        let out = compact(&inline_css(PAGE, Some(css), "style.css").unwrap());
        assert!(out.contains("color:#ff0000"), "{out}");
        assert!(out.contains("padding:4px"), "{out}");
        assert!(!out.contains("var("));
        assert!(!out.contains("--brand"));
    }

    #[test]
    fn media_queries_are_kept_in_head() {
        let css = ".lead { color: red; } @media (max-width: 600px) { .lead { font-size: 12px; } }";
        let out = inline_css(PAGE, Some(css), "style.css").unwrap();
        let head_end = out.find("</head>").unwrap();
        let media = out.find("@media (max-width: 600px)").unwrap();
        assert!(media < head_end);
    }

    #[test]
    fn nested_variables_resolve() {
        let mut vars = HashMap::new();
        vars.insert("--a".to_string(), "var(--b)".to_string());
        vars.insert("--b".to_string(), "10px".to_string());
        assert_eq!(resolve_variables("margin: var(--a);", &vars), "margin: 10px;");
        assert_eq!(resolve_variables("margin: var(--zz);", &vars), "margin: var(--zz);");
    }

    #[test]
    fn extracts_only_top_level_media_blocks() {
        let css = "a{color:red}/* @media fake {} */@media screen{a{color:blue}}b{x:y}";
        assert_eq!(extract_media_blocks(css), "@media screen{a{color:blue}}");
    }

    #[test]
    fn link_removal_matches_relative_forms() {
        let html = r#"<head><link href="./style.css" rel="stylesheet"><link rel="stylesheet" href="https://fonts.example.com/css"></head>"#;
        let out = remove_stylesheet_link(html, "style.css");
        assert!(!out.contains("./style.css"));
        assert!(out.contains("fonts.example.com"));
    }
}
