use crate::engine::inference_engine::ExecutionProvider;
use crate::error::{Result, SegmentError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where a model's bytes come from. The cache key defaults to the URL.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelSource {
    pub url: String,
    #[serde(default)]
    pub cache_key: Option<String>,
}

impl ModelSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cache_key: None,
        }
    }

    pub fn key(&self) -> &str {
        self.cache_key.as_deref().unwrap_or(&self.url)
    }
}

/// An auxiliary high resolution feature tensor forwarded from encoder to decoder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuxFeature {
    pub decoder_input: String,
    pub encoder_outputs: Vec<String>,
    pub shape: Vec<usize>,
}

/// Tensor names and fixed shapes shared by the encoder and decoder exports.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelContract {
    pub input_size: u32,
    pub mask_size: u32,

    pub encoder_input: String,
    pub embedding_outputs: Vec<String>,
    pub aux_features: Vec<AuxFeature>,

    pub embedding_input: String,
    pub point_coords_input: String,
    pub point_labels_input: String,
    pub mask_input: String,
    pub has_mask_input: String,

    pub mask_outputs: Vec<String>,
    pub score_outputs: Vec<String>,
}

impl Default for ModelContract {
    fn default() -> Self {
        Self {
            input_size: 1024,
            mask_size: 256,
            encoder_input: "image".into(),
            embedding_outputs: vec!["image_embed".into(), "image_embeddings".into()],
            aux_features: vec![
                AuxFeature {
                    decoder_input: "high_res_feats_0".into(),
                    encoder_outputs: vec!["high_res_feats_0".into(), "high_res_features1".into()],
                    shape: vec![1, 32, 256, 256],
                },
                AuxFeature {
                    decoder_input: "high_res_feats_1".into(),
                    encoder_outputs: vec!["high_res_feats_1".into(), "high_res_features2".into()],
                    shape: vec![1, 64, 128, 128],
                },
            ],
            embedding_input: "image_embed".into(),
            point_coords_input: "point_coords".into(),
            point_labels_input: "point_labels".into(),
            mask_input: "mask_input".into(),
            has_mask_input: "has_mask_input".into(),
            mask_outputs: vec!["masks".into(), "low_res_masks".into()],
            score_outputs: vec!["iou_predictions".into(), "iou_scores".into()],
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpscaleConfig {
    /// Smoothed intensities strictly above this value are kept.
    pub threshold: u8,
    /// Multiple of the coarse size used for the intermediate resample.
    pub intermediate_factor: u32,
    /// Scale ratio above which the intermediate resample is used.
    pub two_stage_ratio: f32,
}

impl Default for UpscaleConfig {
    fn default() -> Self {
        Self {
            threshold: 127,
            intermediate_factor: 4,
            two_stage_ratio: 4.0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    pub base_color: [u8; 3],
    pub base_alpha: u8,
    pub edge_color: [u8; 3],
    /// Extra pixels drawn around each boundary pixel.
    pub edge_width: u32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            base_color: [30, 144, 255],
            base_alpha: 115,
            edge_color: [255, 255, 255],
            edge_width: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub encoder: ModelSource,
    pub decoder: ModelSource,
    pub execution_provider: ExecutionProvider,
    pub intra_threads: usize,
    pub cache_dir: PathBuf,
    pub contract: ModelContract,
    pub upscale: UpscaleConfig,
    pub overlay: OverlayStyle,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            encoder: ModelSource::new(
                "https://huggingface.co/g-ronimo/sam2-tiny/resolve/main/sam2_hiera_tiny_encoder.with_runtime_opt.ort",
            ),
            decoder: ModelSource::new(
                "https://huggingface.co/g-ronimo/sam2-tiny/resolve/main/sam2_hiera_tiny_decoder_pr1.onnx",
            ),
            execution_provider: ExecutionProvider::CPU,
            intra_threads: 4,
            cache_dir: PathBuf::from("./data/model-cache"),
            contract: ModelContract::default(),
            upscale: UpscaleConfig::default(),
            overlay: OverlayStyle::default(),
        }
    }
}

impl PipelineConfig {
    pub fn source(&self, role: crate::engine::ModelRole) -> &ModelSource {
        match role {
            crate::engine::ModelRole::Encoder => &self.encoder,
            crate::engine::ModelRole::Decoder => &self.decoder,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let contract = &self.contract;
        if self.encoder.url.is_empty() || self.decoder.url.is_empty() {
            return Err(SegmentError::Config("model urls must not be empty".into()));
        }
        if contract.input_size == 0 || contract.mask_size == 0 {
            return Err(SegmentError::Config(
                "input_size and mask_size must be non-zero".into(),
            ));
        }
        if contract.embedding_outputs.is_empty()
            || contract.mask_outputs.is_empty()
            || contract.score_outputs.is_empty()
        {
            return Err(SegmentError::Config("output alias lists must not be empty".into()));
        }
        if let Some(feature) = contract
            .aux_features
            .iter()
            .find(|feature| feature.encoder_outputs.is_empty() || feature.shape.is_empty())
        {
            return Err(SegmentError::Config(format!(
                "auxiliary feature `{}` needs output aliases and a shape",
                feature.decoder_input
            )));
        }
        if self.upscale.intermediate_factor == 0 {
            return Err(SegmentError::Config("intermediate_factor must be at least 1".into()));
        }
        if self.intra_threads == 0 {
            return Err(SegmentError::Config("intra_threads must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn cache_key_falls_back_to_url() {
        let mut source = ModelSource::new("https://models.example/encoder.onnx");
        assert_eq!(source.key(), "https://models.example/encoder.onnx");
        source.cache_key = Some("encoder-v2".into());
        assert_eq!(source.key(), "encoder-v2");
    }

    #[test]
    fn rejects_empty_alias_list() {
        let mut config = PipelineConfig::default();
        config.contract.score_outputs.clear();
        assert!(matches!(config.validate(), Err(SegmentError::Config(_))));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            intra_threads = 2

            [encoder]
            url = "https://models.example/encoder.onnx"

            [upscale]
            two_stage_ratio = 8.0
            "#,
        )
        .unwrap();

        assert_eq!(config.intra_threads, 2);
        assert_eq!(config.encoder.url, "https://models.example/encoder.onnx");
        assert_eq!(config.decoder, PipelineConfig::default().decoder);
        assert_eq!(config.upscale.threshold, 127);
        assert_eq!(config.upscale.two_stage_ratio, 8.0);
        assert_eq!(config.contract.input_size, 1024);
    }
}
