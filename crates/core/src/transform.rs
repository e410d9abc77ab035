//! Text stages applied to the document between image handling and minification.
//!
//! Each stage is a pure `text -> text` function so it can be run and tested alone.

use crate::discover;
use crate::entities;
use crate::error::TransformError;
use crate::inline;
use crate::links;
use crate::progress::{emit_progress, PipelineState, ProgressHandler};

pub trait Stage: Send + Sync {
    fn name(&self) -> &str;
    /// State reported while this stage runs.
    fn state(&self) -> PipelineState;
    fn apply(&self, html: &str) -> Result<String, TransformError>;
}

/// Trim whitespace inside `href` values.
pub struct TrimHrefs;

impl Stage for TrimHrefs {
    fn name(&self) -> &str {
        "trim-hrefs"
    }

    fn state(&self) -> PipelineState {
        PipelineState::Sanitizing
    }

    fn apply(&self, html: &str) -> Result<String, TransformError> {
        Ok(links::trim_hrefs(html))
    }
}

/// Inline the companion stylesheet (if any) and `<style>` blocks.
pub struct InlineCss {
    pub css: Option<String>,
    pub css_file_name: String,
}

impl Stage for InlineCss {
    fn name(&self) -> &str {
        "inline-css"
    }

    fn state(&self) -> PipelineState {
        PipelineState::Inlining
    }

    fn apply(&self, html: &str) -> Result<String, TransformError> {
        Ok(inline::inline_css(html, self.css.as_deref(), &self.css_file_name)?)
    }
}

pub struct StripDataWidth;

impl Stage for StripDataWidth {
    fn name(&self) -> &str {
        "strip-data-width"
    }

    fn state(&self) -> PipelineState {
        PipelineState::Inlining
    }

    fn apply(&self, html: &str) -> Result<String, TransformError> {
        Ok(discover::strip_data_width(html))
    }
}

pub struct EncodeEntities;

impl Stage for EncodeEntities {
    fn name(&self) -> &str {
        "encode-entities"
    }

    fn state(&self) -> PipelineState {
        PipelineState::Encoding
    }

    fn apply(&self, html: &str) -> Result<String, TransformError> {
        Ok(entities::encode_special_characters(html))
    }
}

/// The stages between link checking and minification, in order.
pub fn text_stages(css: Option<String>, css_file_name: &str) -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(InlineCss {
            css,
            css_file_name: css_file_name.to_string(),
        }),
        Box::new(StripDataWidth),
        Box::new(EncodeEntities),
    ]
}

/// Run `stages` in order, reporting each state change once.
pub fn apply_stages(
    html: String,
    stages: &[Box<dyn Stage>],
    progress: Option<&dyn ProgressHandler>,
) -> Result<String, TransformError> {
    let mut current_state = None;
    stages.iter().try_fold(html, |html, stage| {
        if current_state != Some(stage.state()) {
            current_state = Some(stage.state());
            emit_progress(progress, stage.state(), None);
        }
        tracing::debug!("Applying stage {}", stage.name());
        stage.apply(&html)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InlineError;

    struct Upper;

    impl Stage for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn state(&self) -> PipelineState {
            PipelineState::Encoding
        }
        fn apply(&self, html: &str) -> Result<String, TransformError> {
            Ok(html.to_uppercase())
        }
    }

    struct Fail;

    impl Stage for Fail {
        fn name(&self) -> &str {
            "fail"
        }
        fn state(&self) -> PipelineState {
            PipelineState::Encoding
        }
        fn apply(&self, _html: &str) -> Result<String, TransformError> {
            Err(InlineError::Engine("boom".into()).into())
        }
    }

    #[test]
    fn stages_run_in_order() {
        let stages: Vec<Box<dyn Stage>> = vec![Box::new(StripDataWidth), Box::new(Upper)];
        let out = apply_stages(r#"<img data-width="5" src="a.png">"#.into(), &stages, None).unwrap();
        assert_eq!(out, r#"<IMG SRC="A.PNG">"#);
    }

    #[test]
    fn first_failure_stops_the_chain() {
        let stages: Vec<Box<dyn Stage>> = vec![Box::new(Fail), Box::new(Upper)];
        assert!(matches!(
            apply_stages("x".into(), &stages, None),
            Err(TransformError::Inline(InlineError::Engine(_)))
        ));
    }

    #[test]
    fn default_stages_strip_width_and_encode() {
        let html = r#"<html><head></head><body><img src="images/a.jpg" data-width="700"><p>café</p></body></html>"#;
        let out = apply_stages(html.into(), &text_stages(None, "style.css"), None).unwrap();
        assert!(!out.contains("data-width"));
        assert!(out.contains("caf&eacute;"));
    }
}
