//! Packaging configuration.
//!
//! Values come from `~/.config/mailpack/config.toml` (optional) and are then
//! overridden by environment variables. Build a [`PackConfig`] once at startup
//! and pass it by reference into the pipeline.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackConfig {
    /// Base URL of the webletter host (e.g. `https://letters.example.com`).
    pub webletter_url: Option<String>,
    /// Token sent in the `Authorization` header when publishing.
    pub webletter_token: Option<String>,
    /// Outbound proxy for link checks and publishing.
    pub proxy: Option<String>,
    /// ZIP deflate level, 0-9.
    pub compression_level: i64,
    /// Per-image byte ceiling.
    pub gate_image_size: u64,
    /// Quality decrement per recompression attempt.
    pub quality_step: u8,
    /// Per-request timeout for link checks, in milliseconds. Uploads use it as
    /// a connect timeout only.
    pub request_timeout_ms: u64,
    pub html_file_name: String,
    pub css_file_name: String,
    pub image_dir_name: String,
    pub extract_dir_name: String,
    pub state_file_name: String,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            webletter_url: None,
            webletter_token: None,
            proxy: None,
            compression_level: 8,
            gate_image_size: 500_000,
            quality_step: 5,
            request_timeout_ms: 10_000,
            html_file_name: "index.html".to_string(),
            css_file_name: "style.css".to_string(),
            image_dir_name: "images".to_string(),
            extract_dir_name: "build".to_string(),
            state_file_name: "config.json".to_string(),
        }
    }
}

impl PackConfig {
    /// Load the config file (if any) and apply environment overrides.
    /// - `WEBLETTER_URL`, `WEBLETTER_TOKEN`, `PROXY`
    /// - `COMPRESSION_RATIO` (default 8), `GATE_IMAGE_SIZE` (default 500000),
    ///   `STEP_IMAGE_QUALITY` (default 5), `REQUEST_TIMEOUT` (ms, default 10000)
    /// - `HTML_FILE_NAME`, `CSS_FILE_NAME`, `IMAGE_DIR_NAME`, `EXTRACT_DIR_NAME`,
    ///   `CONFIG_EMAIL_FILE_NAME`
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = load_config_file();
        cfg.apply_env(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply overrides from a key lookup. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("WEBLETTER_URL") {
            self.webletter_url = Some(v.trim_end_matches('/').to_string());
        }
        if let Some(v) = get("WEBLETTER_TOKEN") {
            self.webletter_token = Some(v);
        }
        if let Some(v) = get("PROXY") {
            self.proxy = Some(v);
        }
        if let Some(v) = get("COMPRESSION_RATIO") {
            self.compression_level = parse_number("COMPRESSION_RATIO", &v)?;
        }
        if let Some(v) = get("GATE_IMAGE_SIZE") {
            self.gate_image_size = parse_number("GATE_IMAGE_SIZE", &v)?;
        }
        if let Some(v) = get("STEP_IMAGE_QUALITY") {
            self.quality_step = parse_number("STEP_IMAGE_QUALITY", &v)?;
        }
        if let Some(v) = get("REQUEST_TIMEOUT") {
            self.request_timeout_ms = parse_number("REQUEST_TIMEOUT", &v)?;
        }
        if let Some(v) = get("HTML_FILE_NAME") {
            self.html_file_name = v;
        }
        if let Some(v) = get("CSS_FILE_NAME") {
            self.css_file_name = v;
        }
        if let Some(v) = get("IMAGE_DIR_NAME") {
            self.image_dir_name = v.trim_matches('/').to_string();
        }
        if let Some(v) = get("EXTRACT_DIR_NAME") {
            self.extract_dir_name = v;
        }
        if let Some(v) = get("CONFIG_EMAIL_FILE_NAME") {
            self.state_file_name = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0..=9).contains(&self.compression_level) {
            return Err(ConfigError::InvalidValue {
                key: "COMPRESSION_RATIO".into(),
                value: self.compression_level.to_string(),
                detail: "expected 0-9".into(),
            });
        }
        if self.quality_step == 0 || self.quality_step > 100 {
            return Err(ConfigError::InvalidValue {
                key: "STEP_IMAGE_QUALITY".into(),
                value: self.quality_step.to_string(),
                detail: "expected 1-100".into(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Maximum number of encodes the recompression loop may perform.
    pub fn max_compression_attempts(&self) -> usize {
        let step = usize::from(self.quality_step.max(1));
        (100 + step - 1) / step
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        detail: e.to_string(),
    })
}

/// Load the config file from the default path, falling back to defaults.
pub fn load_config_file() -> PackConfig {
    let Some(path) = config_path() else {
        return PackConfig::default();
    };

    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(_) => return PackConfig::default(),
    };

    match toml::from_str::<PackConfig>(&content) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("Ignoring unreadable config file {}: {}", path.display(), e);
            PackConfig::default()
        }
    }
}

/// Return the default config file path.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut p| {
        p.push("mailpack");
        p.push("config.toml");
        p
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PackConfig::default();
        assert_eq!(cfg.compression_level, 8);
        assert_eq!(cfg.gate_image_size, 500_000);
        assert_eq!(cfg.quality_step, 5);
        assert_eq!(cfg.html_file_name, "index.html");
        assert_eq!(cfg.css_file_name, "style.css");
        assert_eq!(cfg.image_dir_name, "images");
        assert_eq!(cfg.extract_dir_name, "build");
        assert_eq!(cfg.state_file_name, "config.json");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = PackConfig::default();
        cfg.apply_env(lookup(&[
            ("WEBLETTER_URL", "https://letters.example.com/"),
            ("GATE_IMAGE_SIZE", "250000"),
            ("STEP_IMAGE_QUALITY", "10"),
            ("IMAGE_DIR_NAME", "img/"),
            ("PROXY", "  "),
        ]))
        .unwrap();
        assert_eq!(cfg.webletter_url.as_deref(), Some("https://letters.example.com"));
        assert_eq!(cfg.gate_image_size, 250_000);
        assert_eq!(cfg.quality_step, 10);
        assert_eq!(cfg.image_dir_name, "img");
        assert!(cfg.proxy.is_none());
    }

    #[test]
    fn unparsable_number_is_rejected() {
        let mut cfg = PackConfig::default();
        let err = cfg.apply_env(lookup(&[("GATE_IMAGE_SIZE", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "GATE_IMAGE_SIZE"));
    }

    #[test]
    fn out_of_range_values_fail_validation() {
        let cfg = PackConfig { compression_level: 12, ..PackConfig::default() };
        assert!(cfg.validate().is_err());
        let cfg = PackConfig { quality_step: 0, ..PackConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn attempt_bound_rounds_up() {
        let cfg = PackConfig { quality_step: 5, ..PackConfig::default() };
        assert_eq!(cfg.max_compression_attempts(), 20);
        let cfg = PackConfig { quality_step: 30, ..PackConfig::default() };
        assert_eq!(cfg.max_compression_attempts(), 4);
    }

    #[test]
    fn toml_round_trips_partial_file() {
        let cfg: PackConfig = toml::from_str("gate_image_size = 1000\nimage_dir_name = \"assets\"").unwrap();
        assert_eq!(cfg.gate_image_size, 1000);
        assert_eq!(cfg.image_dir_name, "assets");
        assert_eq!(cfg.quality_step, 5);
    }
}
