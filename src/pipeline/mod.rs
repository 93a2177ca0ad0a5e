// src/pipeline/mod.rs

pub mod clip_buffer;
pub mod detection_loop;
pub mod event_coordinator;
pub mod metrics;

pub use clip_buffer::ClipBuffer;
pub use detection_loop::{DetectionLoop, LoopParts};
pub use metrics::PipelineMetrics;
