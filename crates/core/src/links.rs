//! Hyperlink clean-up and liveness checks.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::Serialize;

use crate::config::PackConfig;

/// Content types a linked resource may be served as.
const ALLOWED_CONTENT_TYPES: &[&str] = &["text/html", "application/pdf", "application/octet-stream"];

fn href_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"href="([^"]*)""#).expect("valid regex"))
}

/// Trim whitespace inside every `href="…"` value.
pub fn trim_hrefs(html: &str) -> String {
    href_regex()
        .replace_all(html, |caps: &Captures<'_>| format!("href=\"{}\"", caps[1].trim()))
        .into_owned()
}

/// Distinct absolute `http(s)` link targets, in document order.
pub fn remote_links(html: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    href_regex()
        .captures_iter(html)
        .map(|caps| caps[1].trim().to_string())
        .filter(|url| is_http(url))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

fn is_http(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// A link that failed its check.
#[derive(Debug, Clone, Serialize)]
pub struct BrokenLink {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkReport {
    pub checked: usize,
    pub broken: Vec<BrokenLink>,
}

/// Client builder with the user agent and configured proxy.
pub(crate) fn client_builder(config: &PackConfig) -> reqwest::Result<reqwest::ClientBuilder> {
    let mut builder = reqwest::Client::builder().user_agent(concat!("mailpack/", env!("CARGO_PKG_VERSION")));
    if let Some(proxy) = &config.proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
    }
    Ok(builder)
}

/// Build the HTTP client for link checks. Every request is capped at the
/// configured timeout.
pub fn http_client(config: &PackConfig) -> reqwest::Result<reqwest::Client> {
    client_builder(config)?.timeout(config.request_timeout()).build()
}

/// Check every URL once, concurrently. Failures are logged and reported, never returned.
pub async fn check_links(client: &reqwest::Client, urls: Vec<String>) -> LinkReport {
    let handles: Vec<_> = urls
        .into_iter()
        .map(|url| {
            let client = client.clone();
            tokio::spawn(async move {
                let outcome = check_link(&client, &url).await;
                (url, outcome)
            })
        })
        .collect();

    let mut report = LinkReport::default();
    for handle in handles {
        report.checked += 1;
        let (url, outcome) = match handle.await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Link check task failed: {}", e);
                continue;
            }
        };
        if let Err(reason) = outcome {
            tracing::warn!("Link unavailable: {} {}", url, reason);
            report.broken.push(BrokenLink { url, reason });
        }
    }
    report
}

async fn check_link(client: &reqwest::Client, url: &str) -> Result<(), String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    let status = response.status();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if status != reqwest::StatusCode::OK {
        return Err(format!("status {status}"));
    }
    if !ALLOWED_CONTENT_TYPES.iter().any(|t| content_type.starts_with(t)) {
        return Err(format!("content type {content_type:?}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn trims_whitespace_in_href() {
        let html = r#"<a href=" https://example.com/page ">x</a><a href="	mailto:a@b.c
">y</a>"#;
        assert_eq!(
            trim_hrefs(html),
            r#"<a href="https://example.com/page">x</a><a href="mailto:a@b.c">y</a>"#
        );
    }

    #[test]
    fn trimming_is_idempotent() {
        let html = r#"<a href=" https://example.com ">x</a>"#;
        let once = trim_hrefs(html);
        assert_eq!(trim_hrefs(&once), once);
    }

    #[test]
    fn remote_links_are_deduplicated_and_filtered() {
        let html = r##"
            <a href="https://example.com/a">1</a>
            <a href=" https://example.com/a ">2</a>
            <a href="#top">3</a>
            <a href="mailto:x@example.com">4</a>
            <link href="HTTP://example.com/style.css">
        "##;
        assert_eq!(
            remote_links(html),
            vec!["https://example.com/a".to_string(), "HTTP://example.com/style.css".to_string()]
        );
    }
}
