#![cfg_attr(debug_assertions, allow(warnings))]

pub mod config;
pub mod engine;
pub mod error;
pub mod external;
pub mod inference;
pub mod pipeline;
pub mod utils;

pub use config::{ModelContract, ModelSource, OverlayStyle, PipelineConfig, UpscaleConfig};
pub use engine::{ModelRole, SessionState};
pub use error::{Result, SegmentError};
pub use inference::sam::result::SegmentationResult;
pub use pipeline::SegmentPipeline;
pub use utils::graph::{BoundingBox, PointLabel, SamPrompt};
