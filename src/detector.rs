// src/detector.rs
//
// Object detector/tracker collaborator.
//
// The monitor only needs "frame in, tracked boxes out". The production
// backend is a tracking service reached over HTTP: each frame is sent as a
// base64 JPEG and the service answers with persistent track ids, labels,
// confidences and boxes. Track identity is the service's responsibility.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::DetectorConfig;
use crate::types::{BBox, Category, Detection, Frame};

#[async_trait]
pub trait Detector: Send {
    async fn track(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

// ============================================================================
// WIRE FORMAT
// ============================================================================

#[derive(Debug, Serialize)]
struct TrackRequest<'a> {
    stream_id: &'a str,
    width: usize,
    height: usize,
    image_base64: String,
}

#[derive(Debug, Deserialize)]
struct TrackResponse {
    #[serde(default)]
    detections: Vec<RawDetection>,
}

#[derive(Debug, Deserialize)]
struct RawDetection {
    /// Absent while the tracker has not confirmed the object yet.
    track_id: Option<u32>,
    label: String,
    confidence: f32,
    bbox: [f32; 4],
}

/// Keep only confirmed tracks with a known label and a usable box.
fn into_detections(raw: Vec<RawDetection>) -> Vec<Detection> {
    raw.into_iter()
        .filter_map(|d| {
            let track_id = d.track_id?;
            let category = Category::from_label(&d.label)?;
            let [x1, y1, x2, y2] = d.bbox;
            let bbox = BBox::new(x1, y1, x2, y2);
            if !bbox.is_valid() {
                return None;
            }
            Some(Detection {
                track_id,
                category,
                confidence: d.confidence,
                bbox,
            })
        })
        .collect()
}

fn parse_response(body: &str) -> Result<Vec<Detection>> {
    let response: TrackResponse =
        serde_json::from_str(body).context("Failed to parse tracker response")?;
    Ok(into_detections(response.detections))
}

fn encode_rgb_to_jpeg(frame: &Frame) -> Result<Vec<u8>> {
    use image::{ImageBuffer, RgbImage};

    let img: RgbImage =
        ImageBuffer::from_raw(frame.width as u32, frame.height as u32, frame.data.clone())
            .context("Frame buffer does not match its dimensions")?;

    let mut buf = std::io::Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 80);
    img.write_with_encoder(encoder)
        .context("JPEG encoding failed")?;
    Ok(buf.into_inner())
}

// ============================================================================
// HTTP TRACKER
// ============================================================================

pub struct RemoteTracker {
    http_client: reqwest::Client,
    url: String,
    /// Lets the service keep per-camera tracker state apart.
    stream_id: String,
}

impl RemoteTracker {
    pub fn new(config: &DetectorConfig, stream_id: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            url: config.url.clone(),
            stream_id: stream_id.into(),
        })
    }
}

#[async_trait]
impl Detector for RemoteTracker {
    async fn track(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let jpeg = encode_rgb_to_jpeg(frame)?;
        let request = TrackRequest {
            stream_id: &self.stream_id,
            width: frame.width,
            height: frame.height,
            image_base64: base64::engine::general_purpose::STANDARD.encode(&jpeg),
        };

        let response = self
            .http_client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .context("Tracker request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Tracker returned {}", status);
        }

        let body = response.text().await.context("Failed to read tracker response")?;
        let detections = parse_response(&body)?;
        debug!(count = detections.len(), "Tracker response");
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_parse_keeps_confirmed_known_tracks() {
        let body = r#"{
            "detections": [
                {"track_id": 4, "label": "pig", "confidence": 0.91, "bbox": [10, 20, 60, 90]},
                {"track_id": 7, "label": "person", "confidence": 0.72, "bbox": [100, 0, 140, 120]},
                {"track_id": null, "label": "pig", "confidence": 0.88, "bbox": [0, 0, 5, 5]},
                {"track_id": 9, "label": "dog", "confidence": 0.95, "bbox": [0, 0, 5, 5]},
                {"track_id": 11, "label": "pig", "confidence": 0.95, "bbox": [50, 50, 50, 80]}
            ]
        }"#;

        let dets = parse_response(body).unwrap();
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].track_id, 4);
        assert_eq!(dets[0].category, Category::Pig);
        assert_eq!(dets[1].category, Category::Worker);
        assert_eq!(dets[1].bbox, BBox::new(100.0, 0.0, 140.0, 120.0));
    }

    #[test]
    fn test_parse_empty_and_invalid() {
        assert!(parse_response("{}").unwrap().is_empty());
        assert!(parse_response("not json").is_err());
    }

    #[test]
    fn test_jpeg_encoding_checks_dimensions() {
        let frame = Frame {
            data: vec![128; Frame::byte_len(8, 4)],
            width: 8,
            height: 4,
            captured_at: Instant::now(),
            wall_time: chrono::Local::now(),
        };
        let jpeg = encode_rgb_to_jpeg(&frame).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let short = Frame {
            data: vec![0; 10],
            ..frame
        };
        assert!(encode_rgb_to_jpeg(&short).is_err());
    }
}
