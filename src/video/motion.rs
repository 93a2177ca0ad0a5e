// src/video/motion.rs
//
// Coarse motion gate in front of the detector.
//
// Each frame is converted to grayscale, halved and lightly blurred, then
// compared against a slowly adapting background (running average, ~300
// frames of memory). When more than `threshold` pixels differ the gate opens;
// after motion stops it stays open for `idle_hold` before closing again.

use image::{imageops, GrayImage, RgbImage};
use std::time::{Duration, Instant};
use tracing::info;

use crate::types::Frame;

const BACKGROUND_ALPHA: f32 = 1.0 / 300.0;
const PIXEL_DIFF: f32 = 25.0;
const BLUR_SIGMA: f32 = 1.0;

pub struct MotionGate {
    background: Option<Vec<f32>>,
    threshold: u32,
    idle_hold: Duration,
    detecting: bool,
    idle_since: Option<Instant>,
}

impl MotionGate {
    pub fn new(threshold: u32, idle_hold: Duration) -> Self {
        Self {
            background: None,
            threshold,
            idle_hold,
            detecting: false,
            idle_since: None,
        }
    }

    /// Feed one frame; returns whether the detector should run on it.
    pub fn update(&mut self, frame: &Frame) -> bool {
        let motion = match prepare(frame) {
            Some(gray) => self.changed_pixels(&gray) > self.threshold,
            None => false,
        };
        self.apply(motion, frame.captured_at)
    }

    fn changed_pixels(&mut self, gray: &GrayImage) -> u32 {
        let pixels = gray.as_raw();
        let stale = self
            .background
            .as_ref()
            .map_or(true, |bg| bg.len() != pixels.len());
        if stale {
            self.background = Some(pixels.iter().map(|p| *p as f32).collect());
            return 0;
        }
        let Some(background) = self.background.as_mut() else {
            return 0;
        };

        let mut changed = 0u32;
        for (bg, px) in background.iter_mut().zip(pixels) {
            let px = *px as f32;
            if (px - *bg).abs() > PIXEL_DIFF {
                changed += 1;
            }
            *bg += (px - *bg) * BACKGROUND_ALPHA;
        }
        changed
    }

    fn apply(&mut self, motion: bool, now: Instant) -> bool {
        let was = self.detecting;
        if motion {
            self.detecting = true;
            self.idle_since = None;
        } else if self.detecting {
            match self.idle_since {
                None => self.idle_since = Some(now),
                Some(since) if now.saturating_duration_since(since) > self.idle_hold => {
                    self.detecting = false;
                    self.idle_since = None;
                }
                Some(_) => {}
            }
        }

        if was != self.detecting {
            if self.detecting {
                info!("👀 Motion detected, detector running");
            } else {
                info!("💤 Idle, detector paused");
            }
        }
        self.detecting
    }
}

fn prepare(frame: &Frame) -> Option<GrayImage> {
    let rgb = RgbImage::from_raw(frame.width as u32, frame.height as u32, frame.data.clone())?;
    let gray = imageops::grayscale(&rgb);
    let small = imageops::resize(
        &gray,
        (frame.width / 2).max(1) as u32,
        (frame.height / 2).max(1) as u32,
        imageops::FilterType::Triangle,
    );
    Some(imageops::blur(&small, BLUR_SIGMA))
}
