use crate::config::{OverlayStyle, PipelineConfig};
use crate::engine::inference_engine::OnnxEngine;
use crate::engine::run::ModelSessionManager;
use crate::engine::{InferenceEngine, ModelRole, SessionState};
use crate::error::Result;
use crate::external::byte_cache::{ByteCache, FileByteCache};
use crate::external::fetch::{HttpFetcher, ModelFetcher};
use crate::inference::sam::image_inference::{SAMImageInferenceSession, SamImageInference};
use crate::inference::sam::result::SegmentationResult;
use crate::inference::sam::EmbeddingCache;
use crate::utils::graph::SamPrompt;
use image::{DynamicImage, GenericImageView, RgbaImage};
use log::info;
use std::sync::Arc;

/// A caller-owned segmentation pipeline: two model sessions, the embedding of
/// the current image, and the post-processing settings.
///
/// `set_image` takes `&mut self`, so an embed can never overlap a decode on the
/// same instance.
pub struct SegmentPipeline {
    inference: SAMImageInferenceSession,
    embedding: EmbeddingCache,
    overlay: OverlayStyle,
}

impl SegmentPipeline {
    pub fn new(
        config: PipelineConfig,
        engine: Arc<dyn InferenceEngine>,
        fetcher: Arc<dyn ModelFetcher>,
        cache: Arc<dyn ByteCache>,
    ) -> Result<Self> {
        config.validate()?;
        let PipelineConfig {
            encoder,
            decoder,
            contract,
            upscale,
            overlay,
            ..
        } = config;

        let sessions = ModelSessionManager::new(engine, fetcher, cache, encoder, decoder);
        Ok(Self {
            inference: SAMImageInferenceSession::new(sessions, contract, upscale),
            embedding: EmbeddingCache::default(),
            overlay,
        })
    }

    /// Pipeline over ONNX Runtime, fetching models over HTTP and caching them
    /// under `config.cache_dir`.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let engine = OnnxEngine::new(config.execution_provider, config.intra_threads);
        let cache = FileByteCache::new(config.cache_dir.clone());
        Self::new(
            config,
            Arc::new(engine),
            Arc::new(HttpFetcher::new()),
            Arc::new(cache),
        )
    }

    /// Loads both models, reporting progress in [0, 100].
    pub async fn load_models<F>(&self, on_progress: F) -> Result<()>
    where
        F: Fn(f32) + Send + Sync,
    {
        self.inference.sessions().load(on_progress).await
    }

    pub fn state(&self, role: ModelRole) -> SessionState {
        self.inference.sessions().state(role)
    }

    pub fn is_ready(&self) -> bool {
        self.inference.sessions().is_ready()
    }

    /// Embeds `image` and replaces the previous embedding. On failure the
    /// previous embedding is kept.
    pub fn set_image(&mut self, image: &DynamicImage) -> Result<()> {
        self.ensure_ready()?;
        let bundle = self.inference.encode_image(image)?;
        let size = image.dimensions();
        self.embedding.replace(bundle, size);
        info!("image {}x{} set", size.0, size.1);
        Ok(())
    }

    /// Decodes an encoded image (PNG, JPEG, ...) and embeds it.
    pub fn set_image_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let image = image::load_from_memory(bytes)?;
        self.set_image(&image)
    }

    pub fn has_image(&self) -> bool {
        self.embedding.is_set()
    }

    /// Segments the current image with the full prompt set.
    pub fn decode(&self, prompt: &SamPrompt<f32>) -> Result<SegmentationResult> {
        self.ensure_ready()?;
        let (bundle, size) = self.embedding.get()?;
        self.inference.decode_prompt(prompt, bundle, size)
    }

    pub fn render_overlay(&self, result: &SegmentationResult) -> RgbaImage {
        result.overlay(&self.overlay)
    }

    pub fn overlay_style(&self) -> &OverlayStyle {
        &self.overlay
    }

    fn ensure_ready(&self) -> Result<()> {
        ModelRole::ALL
            .into_iter()
            .try_for_each(|role| self.inference.ensure_ready(role))
    }
}
