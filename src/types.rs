// src/types.rs
//
// Shared domain types: frames, detections, categories, orientation and the
// violation category code stored with every persisted event.

use serde::{Deserialize, Serialize};
use std::time::Instant;

// ============================================================================
// FRAMES
// ============================================================================

/// One decoded RGB24 frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    /// Monotonic capture time used for every track/session timer.
    pub captured_at: Instant,
    /// Wall-clock capture time used for filenames and DB timestamps.
    pub wall_time: chrono::DateTime<chrono::Local>,
}

impl Frame {
    pub fn byte_len(width: usize, height: usize) -> usize {
        width * height * 3
    }
}

// ============================================================================
// DETECTIONS
// ============================================================================

/// Axis-aligned bounding box in pixel coordinates (x1,y1 top-left).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Boxes with non-positive extent are dropped before tracking.
    pub fn is_valid(&self) -> bool {
        self.width() > 0.0 && self.height() > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Worker,
    Pig,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Pig => "pig",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "worker" | "person" => Some(Self::Worker),
            "pig" => Some(Self::Pig),
            _ => None,
        }
    }
}

/// One tracked object in one frame, as returned by the detector.
#[derive(Debug, Clone)]
pub struct Detection {
    pub track_id: u32,
    pub category: Category,
    pub confidence: f32,
    pub bbox: BBox,
}

// ============================================================================
// GEOMETRY / CODES
// ============================================================================

/// Which image axis the animals travel along. `Height` means top-to-bottom
/// travel across a roughly horizontal line; `Width` means left-to-right travel
/// across a roughly vertical line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Height,
    Width,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Height => "height",
            Self::Width => "width",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "height" => Some(Self::Height),
            "width" => Some(Self::Width),
            _ => None,
        }
    }
}

/// Category code stored in the violation history table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationCode {
    Both,
    WorkerOnly,
    PigOnly,
    Unknown,
}

impl ViolationCode {
    pub fn from_counts(worker: u32, pig: u32) -> Self {
        match (worker > 0, pig > 0) {
            (true, true) => Self::Both,
            (true, false) => Self::WorkerOnly,
            (false, true) => Self::PigOnly,
            (false, false) => Self::Unknown,
        }
    }

    pub fn db_code(&self) -> i32 {
        match self {
            Self::Both => 0,
            Self::WorkerOnly => 1,
            Self::PigOnly => 2,
            Self::Unknown => 9,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Both => "BOTH",
            Self::WorkerOnly => "WORKER",
            Self::PigOnly => "PIG",
            Self::Unknown => "UNKNOWN",
        }
    }
}
