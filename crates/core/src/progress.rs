//! Progress reporting for the packaging pipeline.

use serde::Serialize;

/// Pipeline states, in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Discovering,
    TransformingImages,
    Sanitizing,
    Inlining,
    Encoding,
    Minifying,
    Archiving,
    Finalizing,
    Done,
}

impl PipelineState {
    pub const ALL: [PipelineState; 9] = [
        Self::Discovering,
        Self::TransformingImages,
        Self::Sanitizing,
        Self::Inlining,
        Self::Encoding,
        Self::Minifying,
        Self::Archiving,
        Self::Finalizing,
        Self::Done,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Discovering => "Discovering images",
            Self::TransformingImages => "Transforming images",
            Self::Sanitizing => "Checking links",
            Self::Inlining => "Inlining CSS",
            Self::Encoding => "Encoding special characters",
            Self::Minifying => "Minifying HTML",
            Self::Archiving => "Writing archive",
            Self::Finalizing => "Finalizing",
            Self::Done => "Done",
        }
    }

    /// Zero-based position in [`PipelineState::ALL`].
    pub fn step(self) -> u64 {
        self as u64
    }
}

/// Event emitted when the pipeline enters a state.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub state: PipelineState,
    pub step: u64,
    pub total: u64,
    pub message: Option<String>,
}

/// Receives progress updates. The CLI implements this with a spinner.
pub trait ProgressHandler: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

pub struct NoopProgress;

impl ProgressHandler for NoopProgress {
    fn on_progress(&self, _event: ProgressEvent) {}
}

/// Helper to emit a progress event if a handler is provided.
pub fn emit_progress(handler: Option<&dyn ProgressHandler>, state: PipelineState, message: Option<&str>) {
    if let Some(h) = handler {
        h.on_progress(ProgressEvent {
            state,
            step: state.step(),
            total: PipelineState::ALL.len() as u64,
            message: message.map(|s| s.to_string()),
        });
    }
}
