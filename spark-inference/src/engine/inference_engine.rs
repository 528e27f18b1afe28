use crate::engine::entity::{TensorMap, TensorValue};
use crate::engine::{InferenceEngine, InferenceSession, ModelRole};
use anyhow::{anyhow, Result};
use log::{debug, info};
use ort::session::{Session, SessionInputValue};
use ort::value::{DynValue, TensorRef};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

pub struct OnnxSession {
    pub(crate) session: Session,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionProvider {
    CPU,
    CUDA(i32),
    TensorRT(i32),
}

impl OnnxSession {
    pub fn from_memory(model: &[u8], executor: ExecutionProvider, intra_threads: usize) -> Result<Self> {
        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .with_execution_providers([match executor {
                ExecutionProvider::CUDA(id) => {
                    ort::execution_providers::CUDAExecutionProvider::default()
                        .with_device_id(id)
                        .build()
                        .error_on_failure()
                }
                ExecutionProvider::TensorRT(id) => {
                    ort::execution_providers::TensorRTExecutionProvider::default()
                        .with_device_id(id)
                        .build()
                        .error_on_failure()
                }
                ExecutionProvider::CPU => ort::execution_providers::CPUExecutionProvider::default()
                    .build()
                    .error_on_failure(),
            }])?
            .commit_from_memory(model)?;

        Ok(OnnxSession { session })
    }
}

impl InferenceSession for OnnxSession {
    fn run(&mut self, inputs: TensorMap) -> Result<TensorMap> {
        // Inputs are passed as views, so shared embeddings are never copied.
        let borrowed = inputs
            .iter()
            .map(|(name, value)| Ok((Cow::Borrowed(name.as_str()), to_ort(value)?)))
            .collect::<Result<Vec<(Cow<'_, str>, SessionInputValue<'_>)>>>()?;

        let outputs = self.session.run(borrowed)?;
        outputs
            .into_iter()
            .map(|(name, value)| Ok((name.to_string(), from_ort(&value)?)))
            .collect()
    }
}

fn to_ort(value: &TensorValue) -> Result<SessionInputValue<'_>> {
    Ok(match value {
        TensorValue::Float(array) => TensorRef::from_array_view(array.view())?.into(),
        TensorValue::Int(array) => TensorRef::from_array_view(array.view())?.into(),
    })
}

fn from_ort(value: &DynValue) -> Result<TensorValue> {
    if let Ok(array) = value.try_extract_array::<f32>() {
        return Ok(TensorValue::Float(array.to_shared()));
    }
    if let Ok(array) = value.try_extract_array::<i64>() {
        return Ok(TensorValue::Int(array.to_shared()));
    }
    Err(anyhow!("unsupported output tensor type: {:?}", value.dtype()))
}

/// ONNX Runtime backed [`InferenceEngine`].
pub struct OnnxEngine {
    executor: ExecutionProvider,
    intra_threads: usize,
}

impl OnnxEngine {
    pub fn new(executor: ExecutionProvider, intra_threads: usize) -> Self {
        Self {
            executor,
            intra_threads,
        }
    }
}

impl InferenceEngine for OnnxEngine {
    fn create_session(&self, role: ModelRole, model: &[u8]) -> Result<Box<dyn InferenceSession>> {
        debug!("building {role} session from {} bytes on {:?}", model.len(), self.executor);
        let session = OnnxSession::from_memory(model, self.executor, self.intra_threads)?;
        info!("{role} session created");
        Ok(Box::new(session))
    }
}
