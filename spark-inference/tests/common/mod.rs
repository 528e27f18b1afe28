#![allow(dead_code)]

use anyhow::{anyhow, ensure, Result};
use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::{HashMap, HashSet};
use ndarray::{Array2, Array4};
use parking_lot::Mutex;
use spark_inference::engine::{InferenceEngine, InferenceSession, ModelRole, TensorMap, TensorValue};
use spark_inference::external::byte_cache::{ByteCache, MemoryByteCache};
use spark_inference::external::fetch::{FetchError, FetchProgress, ModelFetcher};
use spark_inference::{PipelineConfig, SegmentPipeline};
use std::sync::Arc;

pub const ENCODER_URL: &str = "https://models.test/encoder.onnx";
pub const DECODER_URL: &str = "https://models.test/decoder.onnx";

pub const MASK_SIZE: usize = 256;
pub const CANDIDATE_SCORES: [f32; 3] = [0.2, 0.9, 0.9];

pub fn config() -> PipelineConfig {
    PipelineConfig {
        encoder: spark_inference::ModelSource::new(ENCODER_URL),
        decoder: spark_inference::ModelSource::new(DECODER_URL),
        ..PipelineConfig::default()
    }
}

/// Serves `model:<url>` for every URL, counting requests.
#[derive(Default)]
pub struct FakeFetcher {
    requests: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    bodies: Mutex<HashMap<String, Bytes>>,
    hang: bool,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fetcher whose downloads never finish.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().insert(url.to_string());
    }

    pub fn recover(&self, url: &str) {
        self.failing.lock().remove(url);
    }

    pub fn serve(&self, url: &str, body: &'static [u8]) {
        self.bodies
            .lock()
            .insert(url.to_string(), Bytes::from_static(body));
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|r| *r == url).count()
    }
}

#[async_trait]
impl ModelFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, progress: FetchProgress<'_>) -> Result<Bytes, FetchError> {
        self.requests.lock().push(url.to_string());
        if self.hang {
            return std::future::pending::<Result<Bytes, FetchError>>().await;
        }
        if self.failing.lock().contains(url) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 503,
            });
        }

        let body = self
            .bodies
            .lock()
            .get(url)
            .cloned()
            .unwrap_or_else(|| Bytes::from(format!("model:{url}")));
        let total = body.len() as u64;
        progress(total / 2, Some(total));
        progress(total, Some(total));
        Ok(body)
    }
}

/// A cache whose writes always fail.
pub struct ReadOnlyCache;

impl ByteCache for ReadOnlyCache {
    fn get(&self, _key: &str) -> Result<Option<Bytes>> {
        Ok(None)
    }

    fn put(&self, key: &str, _bytes: &[u8]) -> Result<()> {
        Err(anyhow!("cache is read-only, refusing `{key}`"))
    }
}

/// Output naming of the fake models.
#[derive(Clone)]
pub struct FakeModels {
    pub encoder_outputs: Vec<(&'static str, Vec<usize>)>,
    pub mask_output: &'static str,
    pub score_output: &'static str,
}

impl Default for FakeModels {
    fn default() -> Self {
        Self {
            encoder_outputs: vec![
                ("image_embed", vec![1, 256, 64, 64]),
                ("high_res_feats_0", vec![1, 32, 256, 256]),
                ("high_res_feats_1", vec![1, 64, 128, 128]),
            ],
            mask_output: "masks",
            score_output: "iou_predictions",
        }
    }
}

/// Engine producing fixed-shape outputs and recording the last decoder inputs.
#[derive(Default)]
pub struct FakeEngine {
    models: FakeModels,
    last_decoder_inputs: Arc<Mutex<Option<TensorMap>>>,
    sessions_built: Mutex<usize>,
}

impl FakeEngine {
    pub fn new(models: FakeModels) -> Self {
        Self {
            models,
            ..Self::default()
        }
    }

    pub fn last_decoder_inputs(&self) -> Option<TensorMap> {
        self.last_decoder_inputs.lock().clone()
    }

    pub fn sessions_built(&self) -> usize {
        *self.sessions_built.lock()
    }
}

impl InferenceEngine for FakeEngine {
    fn create_session(&self, role: ModelRole, model: &[u8]) -> Result<Box<dyn InferenceSession>> {
        ensure!(model.starts_with(b"model:"), "{role} bytes are not a model");
        *self.sessions_built.lock() += 1;
        Ok(Box::new(FakeSession {
            role,
            models: self.models.clone(),
            last_decoder_inputs: self.last_decoder_inputs.clone(),
        }))
    }
}

struct FakeSession {
    role: ModelRole,
    models: FakeModels,
    last_decoder_inputs: Arc<Mutex<Option<TensorMap>>>,
}

impl FakeSession {
    fn encode(&self, inputs: &TensorMap) -> Result<TensorMap> {
        let image = inputs.get("image").ok_or_else(|| anyhow!("missing `image`"))?;
        ensure!(image.shape() == [1, 3, 1024, 1024], "bad image shape {:?}", image.shape());

        Ok(self
            .models
            .encoder_outputs
            .iter()
            .map(|(name, shape)| (name.to_string(), TensorValue::zeros(shape)))
            .collect())
    }

    fn decode(&self, inputs: TensorMap) -> Result<TensorMap> {
        let shape = |name: &str| {
            inputs
                .get(name)
                .map(|tensor| tensor.shape().to_vec())
                .ok_or_else(|| anyhow!("missing `{name}`"))
        };
        ensure!(shape("image_embed")? == [1, 256, 64, 64]);
        ensure!(shape("high_res_feats_0")? == [1, 32, 256, 256]);
        ensure!(shape("high_res_feats_1")? == [1, 64, 128, 128]);
        ensure!(shape("mask_input")? == [1, 1, MASK_SIZE, MASK_SIZE]);
        ensure!(shape("has_mask_input")? == [1]);

        let coords = shape("point_coords")?;
        let labels = shape("point_labels")?;
        ensure!(coords.len() == 3 && coords[0] == 1 && coords[2] == 2, "coords {coords:?}");
        ensure!(labels == [1, coords[1]], "labels {labels:?} for coords {coords:?}");

        *self.last_decoder_inputs.lock() = Some(inputs);

        // Candidate 0 is empty, 1 covers the centre half, 2 covers everything.
        let (low, high) = (MASK_SIZE / 4, MASK_SIZE * 3 / 4);
        let masks = Array4::<f32>::from_shape_fn((1, 3, MASK_SIZE, MASK_SIZE), |(_, k, y, x)| match k {
            0 => -8.0,
            1 if (low..high).contains(&y) && (low..high).contains(&x) => 6.0,
            1 => -6.0,
            _ => 4.0,
        });
        let scores = Array2::from_shape_vec((1, 3), CANDIDATE_SCORES.to_vec())?;

        let mut outputs = TensorMap::new();
        outputs.insert(self.models.mask_output.to_string(), masks.into());
        outputs.insert(self.models.score_output.to_string(), scores.into());
        Ok(outputs)
    }
}

impl InferenceSession for FakeSession {
    fn run(&mut self, inputs: TensorMap) -> Result<TensorMap> {
        match self.role {
            ModelRole::Encoder => self.encode(&inputs),
            ModelRole::Decoder => self.decode(inputs),
        }
    }
}

pub struct Harness {
    pub pipeline: SegmentPipeline,
    pub engine: Arc<FakeEngine>,
    pub fetcher: Arc<FakeFetcher>,
    pub cache: MemoryByteCache,
}

pub fn harness_with(models: FakeModels, fetcher: FakeFetcher, cache: MemoryByteCache) -> Harness {
    let engine = Arc::new(FakeEngine::new(models));
    let fetcher = Arc::new(fetcher);
    let pipeline = SegmentPipeline::new(
        config(),
        engine.clone(),
        fetcher.clone(),
        Arc::new(cache.clone()),
    )
    .unwrap();
    Harness {
        pipeline,
        engine,
        fetcher,
        cache,
    }
}

pub fn harness() -> Harness {
    harness_with(FakeModels::default(), FakeFetcher::new(), MemoryByteCache::new())
}

pub async fn loaded_harness(models: FakeModels) -> Harness {
    let harness = harness_with(models, FakeFetcher::new(), MemoryByteCache::new());
    harness.pipeline.load_models(|_| {}).await.unwrap();
    harness
}
