use crate::engine::{ModelRole, SessionState};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SegmentError>;

#[derive(Debug, Error)]
pub enum SegmentError {
    /// Fetching, caching or building a model session failed.
    #[error("failed to load {role} model from {url}: {reason}")]
    ModelLoad {
        role: ModelRole,
        url: String,
        reason: String,
    },

    #[error("{role} session is not ready (state: {state})")]
    SessionNotReady { role: ModelRole, state: SessionState },

    #[error("no image has been embedded yet")]
    NoImageSet,

    #[error("invalid image: {width}x{height}")]
    InvalidImage { width: u32, height: u32 },

    #[error("prompt contains neither points nor a box")]
    EmptyPrompt,

    #[error("malformed box: ({x1}, {y1}) - ({x2}, {y2})")]
    MalformedBox { x1: f32, y1: f32, x2: f32, y2: f32 },

    /// The encoder artifact did not produce a tensor the pipeline requires.
    #[error("encoder output `{tensor}` missing, model produced {available:?}")]
    EncoderOutputMissing {
        tensor: String,
        available: Vec<String>,
    },

    #[error("decoder output `{tensor}` missing, model produced {available:?}")]
    DecoderOutputMissing {
        tensor: String,
        available: Vec<String>,
    },

    #[error("{role} inference failed: {reason}")]
    Inference { role: ModelRole, reason: String },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SegmentError {
    pub(crate) fn model_load(role: ModelRole, url: impl Into<String>, reason: impl ToString) -> Self {
        Self::ModelLoad {
            role,
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn inference(role: ModelRole, err: anyhow::Error) -> Self {
        Self::Inference {
            role,
            reason: format!("{err:#}"),
        }
    }

    /// Recoverable by waiting for a load or embedding an image first.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::SessionNotReady { .. } | Self::NoImageSet)
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidImage { .. } | Self::EmptyPrompt | Self::MalformedBox { .. }
        )
    }
}
