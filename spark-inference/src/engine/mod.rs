use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub mod entity;
pub mod inference_engine;
pub mod run;

pub use entity::{TensorMap, TensorValue};

/// The two chained stages of the pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelRole {
    Encoder,
    Decoder,
}

impl ModelRole {
    pub const ALL: [ModelRole; 2] = [ModelRole::Encoder, ModelRole::Decoder];

    pub(crate) fn index(self) -> usize {
        match self {
            ModelRole::Encoder => 0,
            ModelRole::Decoder => 1,
        }
    }
}

impl Display for ModelRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelRole::Encoder => f.write_str("encoder"),
            ModelRole::Decoder => f.write_str("decoder"),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Unloaded,
    Loading,
    Ready,
    Failed,
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Unloaded => "unloaded",
            SessionState::Loading => "loading",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Builds runnable sessions from raw model bytes.
pub trait InferenceEngine: Send + Sync {
    fn create_session(
        &self,
        role: ModelRole,
        model: &[u8],
    ) -> anyhow::Result<Box<dyn InferenceSession>>;
}

pub trait InferenceSession: Send {
    fn run(&mut self, inputs: TensorMap) -> anyhow::Result<TensorMap>;
}
