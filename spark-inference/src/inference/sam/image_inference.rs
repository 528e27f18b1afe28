use crate::config::{ModelContract, UpscaleConfig};
use crate::engine::entity::{take_by_alias, tensor_names, TensorMap, TensorValue};
use crate::engine::run::ModelSessionManager;
use crate::engine::{ModelRole, SessionState};
use crate::error::{Result, SegmentError};
use crate::inference::sam::result::SegmentationResult;
use crate::inference::sam::EmbeddingBundle;
use crate::inference::upscale_mask;
use crate::utils::extractor::{encode_prompt, EncodedPrompt, ExtraToTensor};
use crate::utils::graph::SamPrompt;
use bitvec::prelude::*;
use image::{DynamicImage, GenericImageView};
use log::{debug, info};
use ndarray::prelude::*;
use std::time::Instant;

pub trait SamImageInference {
    fn encode_image(&self, image: &DynamicImage) -> Result<EmbeddingBundle>;
    fn decode_prompt(
        &self,
        prompt: &SamPrompt<f32>,
        bundle: &EmbeddingBundle,
        original_size: (u32, u32),
    ) -> Result<SegmentationResult>;
}

pub struct SAMImageInferenceSession {
    pub(crate) sessions: ModelSessionManager,
    pub(crate) contract: ModelContract,
    pub(crate) upscale: UpscaleConfig,
}

impl SAMImageInferenceSession {
    pub fn new(sessions: ModelSessionManager, contract: ModelContract, upscale: UpscaleConfig) -> Self {
        Self {
            sessions,
            contract,
            upscale,
        }
    }

    pub fn sessions(&self) -> &ModelSessionManager {
        &self.sessions
    }

    pub(crate) fn ensure_ready(&self, role: ModelRole) -> Result<()> {
        match self.sessions.state(role) {
            SessionState::Ready => Ok(()),
            state => Err(SegmentError::SessionNotReady { role, state }),
        }
    }
}

impl SamImageInference for SAMImageInferenceSession {
    fn encode_image(&self, image: &DynamicImage) -> Result<EmbeddingBundle> {
        self.ensure_ready(ModelRole::Encoder)?;
        let start = Instant::now();

        let tensor = image.extra_standard_image_to_tensor(self.contract.input_size)?;
        let mut inputs = TensorMap::new();
        inputs.insert(self.contract.encoder_input.clone(), tensor.into());

        let outputs = self.sessions.run(ModelRole::Encoder, inputs)?;
        let bundle = EmbeddingBundle::from_encoder_outputs(outputs, &self.contract)?;

        let (width, height) = image.dimensions();
        info!("embedded {width}x{height} image in {:?}", start.elapsed());
        Ok(bundle)
    }

    fn decode_prompt(
        &self,
        prompt: &SamPrompt<f32>,
        bundle: &EmbeddingBundle,
        original_size: (u32, u32),
    ) -> Result<SegmentationResult> {
        self.ensure_ready(ModelRole::Decoder)?;
        let start = Instant::now();

        let encoded = encode_prompt(prompt, original_size, self.contract.input_size)?;
        let inputs = decoder_inputs(&self.contract, bundle, encoded);
        let mut outputs = self.sessions.run(ModelRole::Decoder, inputs)?;

        let available = tensor_names(&outputs);
        let missing = |aliases: &[String]| SegmentError::DecoderOutputMissing {
            tensor: aliases.join(" | "),
            available: available.clone(),
        };
        let masks = take_by_alias(&mut outputs, &self.contract.mask_outputs)
            .ok_or_else(|| missing(&self.contract.mask_outputs))?;
        let scores = take_by_alias(&mut outputs, &self.contract.score_outputs)
            .ok_or_else(|| missing(&self.contract.score_outputs))?;
        let (masks, scores) = match (masks, scores) {
            (TensorValue::Float(masks), TensorValue::Float(scores)) => (masks, scores),
            _ => return Err(decoder_error("mask and score outputs must be float tensors")),
        };

        let scores = scores.iter().copied().collect::<Vec<_>>();
        let best = select_best_candidate(&scores)
            .ok_or_else(|| decoder_error("decoder returned no mask candidates"))?;

        let candidates = candidate_view(masks.view(), scores.len())?;
        let coarse = candidates.index_axis(Axis(0), best);
        debug!(
            "selected candidate {best} of {} (score {:.3}), coarse {:?}",
            scores.len(),
            scores[best],
            coarse.dim()
        );

        let (width, height) = original_size;
        let binary = upscale_mask(coarse, (height as usize, width as usize), &self.upscale);
        let mask = binary.iter().map(|value| *value > 0).collect::<BitVec>();

        info!("decoded {} prompt points in {:?}", prompt.points.len(), start.elapsed());
        Ok(SegmentationResult {
            mask,
            score: scores[best],
            width,
            height,
        })
    }
}

/// The embedding and features are shared with the cache, not copied.
fn decoder_inputs(contract: &ModelContract, bundle: &EmbeddingBundle, prompt: EncodedPrompt) -> TensorMap {
    let mask_size = contract.mask_size as usize;

    let mut inputs = TensorMap::new();
    inputs.insert(contract.embedding_input.clone(), bundle.embedding.clone());
    for (name, feature) in &bundle.features {
        inputs.insert(name.clone(), feature.clone());
    }
    inputs.insert(contract.point_coords_input.clone(), prompt.coords.into());
    inputs.insert(contract.point_labels_input.clone(), prompt.labels.into());
    // No mask is carried between calls.
    inputs.insert(
        contract.mask_input.clone(),
        Array4::<f32>::zeros((1, 1, mask_size, mask_size)).into(),
    );
    inputs.insert(contract.has_mask_input.clone(), array![0f32].into());
    inputs
}

fn decoder_error(reason: &str) -> SegmentError {
    SegmentError::Inference {
        role: ModelRole::Decoder,
        reason: reason.to_string(),
    }
}

/// Views the mask output as `(candidates, height, width)`, accepting any
/// leading batch dimensions of size one.
fn candidate_view(masks: ArrayViewD<'_, f32>, count: usize) -> Result<ArrayView3<'_, f32>> {
    let shape = masks.shape();
    if shape.len() < 2 {
        return Err(decoder_error("mask output must have at least two dimensions"));
    }
    let (height, width) = (shape[shape.len() - 2], shape[shape.len() - 1]);
    if height * width * count != masks.len() {
        return Err(SegmentError::Inference {
            role: ModelRole::Decoder,
            reason: format!("mask output {shape:?} does not hold {count} candidates"),
        });
    }
    masks
        .into_shape_with_order((count, height, width))
        .map_err(|err| SegmentError::Inference {
            role: ModelRole::Decoder,
            reason: err.to_string(),
        })
}

/// Index of the highest score; the lowest index wins ties.
pub fn select_best_candidate(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((index, score)),
        }
    }
    best.map(|(index, _)| index)
        .or_else(|| (!scores.is_empty()).then_some(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_maximum_wins() {
        assert_eq!(select_best_candidate(&[0.2, 0.9, 0.9, 0.1]), Some(1));
        assert_eq!(select_best_candidate(&[0.5]), Some(0));
        assert_eq!(select_best_candidate(&[-3.0, -1.0, -2.0]), Some(1));
        assert_eq!(select_best_candidate(&[]), None);
    }

    #[test]
    fn nan_scores_are_skipped() {
        assert_eq!(select_best_candidate(&[f32::NAN, 0.1, 0.3]), Some(2));
        assert_eq!(select_best_candidate(&[f32::NAN, f32::NAN]), Some(0));
    }

    #[test]
    fn candidate_view_strips_batch_dimension() {
        let masks = Array4::<f32>::zeros((1, 3, 4, 5)).into_dyn();
        let view = candidate_view(masks.view(), 3).unwrap();
        assert_eq!(view.dim(), (3, 4, 5));

        assert!(candidate_view(masks.view(), 2).is_err());
    }

    #[test]
    fn decoder_inputs_share_cached_embedding() {
        let contract = ModelContract::default();
        let mut outputs = TensorMap::new();
        outputs.insert("image_embed".into(), TensorValue::zeros(&[1, 256, 64, 64]));
        let bundle = EmbeddingBundle::from_encoder_outputs(outputs, &contract).unwrap();

        let prompt = SamPrompt::point(10.0f32, 10.0, crate::utils::graph::PointLabel::Include);
        let encoded = encode_prompt(&prompt, (100, 100), contract.input_size).unwrap();
        let inputs = decoder_inputs(&contract, &bundle, encoded);

        let ptr = |tensor: &TensorValue| tensor.as_float().unwrap().as_ptr();
        assert_eq!(ptr(&inputs["image_embed"]), ptr(bundle.embedding()));
        for (name, feature) in bundle.features() {
            assert_eq!(ptr(&inputs[name]), ptr(feature));
        }
        assert_eq!(inputs["mask_input"].shape(), &[1, 1, 256, 256]);
        assert_eq!(inputs["has_mask_input"].shape(), &[1]);
    }
}
