// src/tracking/mod.rs

pub mod animal_track;
pub mod engine;
pub mod person_track;

pub use engine::{FrameOutcome, TrackEngine, TrackViolation};

/// Effect of one frame on the daily throughput count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountChange {
    Increment,
    Decrement,
}
