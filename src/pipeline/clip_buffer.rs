// src/pipeline/clip_buffer.rs
//
// Rolling buffer of the most recent frames. Frames are stored behind `Arc`
// so a snapshot for a closing session copies pointers only and leaves the
// live buffer untouched.

use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::sync::Arc;

use super::event_coordinator::{CategoryCounts, ClosedSession};
use crate::types::Frame;

pub struct ClipBuffer {
    frames: VecDeque<Arc<Frame>>,
    capacity: usize,
}

impl ClipBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, frame: Arc<Frame>) {
        if self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Drop every buffered frame; outstanding snapshots keep their own `Arc`s.
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Oldest-first copy of the current contents.
    pub fn snapshot(&self) -> Vec<Arc<Frame>> {
        self.frames.iter().cloned().collect()
    }

    /// Materialize the clip for a closed session.
    pub fn take_clip(&self, session: ClosedSession) -> PendingClip {
        PendingClip {
            filename: clip_filename(session.started_at, &session.counts),
            frames: self.snapshot(),
            session,
        }
    }
}

/// Frames plus metadata for one closed session, not yet encoded.
pub struct PendingClip {
    pub filename: String,
    pub frames: Vec<Arc<Frame>>,
    pub session: ClosedSession,
}

/// `yymmdd_HHMMSS_Worker{n}Pig{m}.mp4`
pub fn clip_filename(started_at: DateTime<Local>, counts: &CategoryCounts) -> String {
    format!(
        "{}_Worker{}Pig{}.mp4",
        started_at.format("%y%m%d_%H%M%S"),
        counts.worker,
        counts.pig
    )
}
