//! Webletter publishing: upload the archive and keep the sidecar state file in sync.
//!
//! The state file (`config.json` next to the template by default) remembers the
//! remote `id`. Without one the archive is POSTed to `/api/webletters/upload`;
//! with one it is PUT to `/api/webletters/{id}`.

use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::PackConfig;
use crate::error::PublishError;
use crate::links::client_builder;

#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub id: String,
    pub url: String,
    /// Whether an existing webletter was replaced rather than created.
    pub updated: bool,
}

/// Build the HTTP client for uploads. Only connecting is bounded by the
/// request timeout; the transfer itself may take as long as it needs.
pub fn upload_client(config: &PackConfig) -> reqwest::Result<reqwest::Client> {
    client_builder(config)?.connect_timeout(config.request_timeout()).build()
}

/// Upload `archive` and rewrite the state file at `state_path`.
pub async fn publish(
    client: &reqwest::Client,
    config: &PackConfig,
    archive: &Path,
    state_path: &Path,
) -> Result<PublishOutcome, PublishError> {
    let token = config
        .webletter_token
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or(PublishError::MissingToken)?;
    let endpoint = config
        .webletter_url
        .as_deref()
        .map(|u| u.trim_end_matches('/'))
        .filter(|u| !u.is_empty())
        .ok_or(PublishError::MissingEndpoint)?;

    let previous = read_state(state_path)?;
    let existing_id = previous.get("id").and_then(id_string);

    let file_name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("template.zip")
        .to_string();
    let part = reqwest::multipart::Part::bytes(std::fs::read(archive)?)
        .file_name(file_name)
        .mime_str("application/zip")
        .map_err(|e| PublishError::Network(e.to_string()))?;
    let form = reqwest::multipart::Form::new().part("file", part);

    let request = match &existing_id {
        Some(id) => client.put(format!("{endpoint}/api/webletters/{id}")),
        None => client.post(format!("{endpoint}/api/webletters/upload")),
    };
    tracing::debug!("Publishing {} (existing id: {:?})", archive.display(), existing_id);

    let response = request
        .header(reqwest::header::AUTHORIZATION, token)
        .multipart(form)
        .send()
        .await
        .map_err(|e| PublishError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PublishError::Rejected {
            status: status.as_u16(),
            message: body.chars().take(200).collect(),
        });
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| PublishError::Network(format!("invalid response body: {e}")))?;

    let mut state = merge_state(previous, unwrap_envelope(body));
    let id = state.get("id").and_then(id_string).ok_or(PublishError::MissingId)?;
    let url = format!("{endpoint}/{id}");
    state.insert("webletterUrl".into(), Value::String(url.clone()));
    write_state(state_path, &state)?;

    tracing::info!("Webletter published: {}", url);
    Ok(PublishOutcome {
        id,
        url,
        updated: existing_id.is_some(),
    })
}

/// Read the state file. A missing file is an empty state.
pub fn read_state(path: &Path) -> Result<Map<String, Value>, PublishError> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let state_error = |detail: String| PublishError::State {
        path: path.display().to_string(),
        detail,
    };
    let text = std::fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(&text).map_err(|e| state_error(e.to_string()))? {
        Value::Object(map) => Ok(map),
        other => Err(state_error(format!("expected a JSON object, found {other}"))),
    }
}

fn write_state(path: &Path, state: &Map<String, Value>) -> Result<(), PublishError> {
    let json = serde_json::to_string_pretty(state).map_err(|e| PublishError::State {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;
    std::fs::write(path, json)?;
    Ok(())
}

/// `{"data": {...}}` -> `{...}`. Non-object bodies carry no state.
fn unwrap_envelope(body: Value) -> Map<String, Value> {
    match body {
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Object(inner)) if map.is_empty() => inner,
            Some(other) => {
                map.insert("data".into(), other);
                map
            }
            None => map,
        },
        _ => Map::new(),
    }
}

/// Response fields overwrite previous ones.
fn merge_state(mut previous: Map<String, Value>, response: Map<String, Value>) -> Map<String, Value> {
    previous.extend(response);
    previous
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
