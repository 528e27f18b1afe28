use crate::config::ModelContract;
use crate::engine::entity::{take_by_alias, tensor_names, TensorMap, TensorValue};
use crate::error::{Result, SegmentError};
use log::{debug, warn};

pub mod image_inference;
pub mod result;

/// Everything the encoder produced for one image: the primary embedding plus
/// the auxiliary high resolution features, keyed by decoder input name.
#[derive(Clone, Debug)]
pub struct EmbeddingBundle {
    pub(super) embedding: TensorValue,
    pub(super) features: Vec<(String, TensorValue)>,
    pub(super) substituted: Vec<String>,
}

impl EmbeddingBundle {
    /// Picks the contract's tensors out of the encoder outputs. A missing
    /// auxiliary feature is replaced with zeros of its documented shape.
    pub fn from_encoder_outputs(mut outputs: TensorMap, contract: &ModelContract) -> Result<Self> {
        let available = tensor_names(&outputs);
        let embedding = take_by_alias(&mut outputs, &contract.embedding_outputs).ok_or_else(|| {
            SegmentError::EncoderOutputMissing {
                tensor: contract.embedding_outputs.join(" | "),
                available: available.clone(),
            }
        })?;
        debug!("image embedding shape: {:?}", embedding.shape());

        let mut features = Vec::with_capacity(contract.aux_features.len());
        let mut substituted = Vec::new();
        for feature in &contract.aux_features {
            let tensor = match take_by_alias(&mut outputs, &feature.encoder_outputs) {
                Some(tensor) => tensor,
                None => {
                    warn!(
                        "encoder did not emit `{}`, using zeros of shape {:?}",
                        feature.decoder_input, feature.shape
                    );
                    substituted.push(feature.decoder_input.clone());
                    TensorValue::zeros(&feature.shape)
                }
            };
            features.push((feature.decoder_input.clone(), tensor));
        }

        Ok(Self {
            embedding,
            features,
            substituted,
        })
    }

    pub fn embedding(&self) -> &TensorValue {
        &self.embedding
    }

    pub fn features(&self) -> impl Iterator<Item = (&str, &TensorValue)> {
        self.features
            .iter()
            .map(|(name, tensor)| (name.as_str(), tensor))
    }

    /// Whether the named decoder input was zero-filled because the encoder lacked it.
    pub fn is_substituted(&self, decoder_input: &str) -> bool {
        self.substituted.iter().any(|name| name == decoder_input)
    }
}

/// The embedding of the most recently set image and its original size.
#[derive(Default)]
pub struct EmbeddingCache {
    current: Option<(EmbeddingBundle, (u32, u32))>,
}

impl EmbeddingCache {
    pub fn replace(&mut self, bundle: EmbeddingBundle, original_size: (u32, u32)) {
        self.current = Some((bundle, original_size));
    }

    pub fn get(&self) -> Result<(&EmbeddingBundle, (u32, u32))> {
        self.current
            .as_ref()
            .map(|(bundle, size)| (bundle, *size))
            .ok_or(SegmentError::NoImageSet)
    }

    pub fn clear(&mut self) {
        self.current = None;
    }

    pub fn is_set(&self) -> bool {
        self.current.is_some()
    }
}
