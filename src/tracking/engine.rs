// src/tracking/engine.rs
//
// Owns every live track, routes detections by category and sweeps idle
// tracks. Confined to the detection loop, so nothing here is synchronized.
//
// An id that produced a violation stays flagged until its track expires;
// a flagged id never produces a second violation.

use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, info};

use super::animal_track::AnimalTrack;
use super::person_track::PersonTrack;
use super::CountChange;
use crate::boundary_line::BoundaryLine;
use crate::config::{DirtyZone, TrackingConfig};
use crate::types::{Category, Detection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackViolation {
    pub track_id: u32,
    pub category: Category,
}

#[derive(Debug, Default)]
pub struct FrameOutcome {
    pub violations: Vec<TrackViolation>,
    pub count_changes: Vec<CountChange>,
}

pub struct TrackEngine {
    line: BoundaryLine,
    config: TrackingConfig,
    dirty_zone: DirtyZone,
    animals: HashMap<u32, AnimalTrack>,
    people: HashMap<u32, PersonTrack>,
    flagged: HashSet<u32>,
}

impl TrackEngine {
    pub fn new(line: BoundaryLine, config: TrackingConfig, dirty_zone: DirtyZone) -> Self {
        Self {
            line,
            config,
            dirty_zone,
            animals: HashMap::new(),
            people: HashMap::new(),
            flagged: HashSet::new(),
        }
    }

    /// (animals, people) currently tracked.
    #[cfg(test)]
    pub fn active_tracks(&self) -> (usize, usize) {
        (self.animals.len(), self.people.len())
    }

    #[cfg(test)]
    pub fn is_flagged(&self, track_id: u32) -> bool {
        self.flagged.contains(&track_id)
    }

    pub fn process(&mut self, detections: &[Detection], now: Instant) -> FrameOutcome {
        let mut outcome = FrameOutcome::default();

        for det in detections {
            if !det.bbox.is_valid() {
                continue;
            }
            let id = det.track_id;
            let violated = match det.category {
                Category::Pig => {
                    let already = self.flagged.contains(&id);
                    let track = self
                        .animals
                        .entry(id)
                        .or_insert_with(|| AnimalTrack::new(id, self.config.clone(), now));
                    let update = track.update(&det.bbox, &self.line, now, already);
                    if let Some(change) = update.count_change {
                        outcome.count_changes.push(change);
                    }
                    update.violation
                }
                Category::Worker => {
                    if det.confidence <= self.config.worker_conf {
                        continue;
                    }
                    let (zone, timeout) = (self.dirty_zone, self.config.idle_timeout);
                    let track = self
                        .people
                        .entry(id)
                        .or_insert_with(|| PersonTrack::new(id, zone, timeout, now));
                    track.update(&det.bbox, &self.line, now) && !self.flagged.contains(&id)
                }
            };

            if violated {
                self.flagged.insert(id);
                info!(
                    track_id = id,
                    category = det.category.as_str(),
                    "🚨 Boundary violation"
                );
                outcome.violations.push(TrackViolation {
                    track_id: id,
                    category: det.category,
                });
            }
        }

        outcome
    }

    /// Drop idle tracks and release their violation flags. Returns how many
    /// tracks were removed.
    pub fn sweep_expired(&mut self, now: Instant) -> usize {
        let before = self.animals.len() + self.people.len();
        self.animals.retain(|_, t| !t.is_expired(now));
        self.people.retain(|_, t| !t.is_expired(now));

        let (animals, people) = (&self.animals, &self.people);
        self.flagged
            .retain(|id| animals.contains_key(id) || people.contains_key(id));

        let removed = before - (self.animals.len() + self.people.len());
        if removed > 0 {
            debug!(removed, "Swept idle tracks");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BBox, Orientation};
    use std::time::Duration;

    fn engine() -> TrackEngine {
        let line = BoundaryLine::new((0.0, 200.0), (640.0, 200.0), Orientation::Height).unwrap();
        TrackEngine::new(line, TrackingConfig::default(), DirtyZone::Below)
    }

    fn worker(id: u32, conf: f32, cy: f32) -> Detection {
        Detection {
            track_id: id,
            category: Category::Worker,
            confidence: conf,
            bbox: BBox::new(100.0, cy - 40.0, 140.0, cy + 40.0),
        }
    }

    fn pig(id: u32, top: f32) -> Detection {
        Detection {
            track_id: id,
            category: Category::Pig,
            confidence: 0.9,
            bbox: BBox::new(300.0, top, 360.0, top + 100.0),
        }
    }

    #[test]
    fn test_low_confidence_workers_ignored() {
        let mut e = engine();
        let now = Instant::now();
        e.process(&[worker(1, 0.5, 300.0)], now);
        let out = e.process(&[worker(1, 0.5, 100.0)], now);
        assert!(out.violations.is_empty());
        assert_eq!(e.active_tracks(), (0, 0), "gated workers never create tracks");
    }

    #[test]
    fn test_worker_violation_flagged_once() {
        let mut e = engine();
        let now = Instant::now();
        e.process(&[worker(7, 0.9, 300.0)], now);
        let first = e.process(&[worker(7, 0.9, 100.0)], now);
        assert_eq!(first.violations.len(), 1);
        assert!(e.is_flagged(7));

        e.process(&[worker(7, 0.9, 300.0)], now);
        let second = e.process(&[worker(7, 0.9, 100.0)], now);
        assert!(second.violations.is_empty(), "flag holds until expiry");
    }

    #[test]
    fn test_expiry_releases_flag() {
        let mut e = engine();
        let now = Instant::now();
        e.process(&[worker(9, 0.9, 300.0)], now);
        e.process(&[worker(9, 0.9, 100.0)], now);
        assert!(e.is_flagged(9));

        let later = now + Duration::from_secs(11);
        assert_eq!(e.sweep_expired(later), 1);
        assert!(!e.is_flagged(9));

        e.process(&[worker(9, 0.9, 300.0)], later);
        let again = e.process(&[worker(9, 0.9, 100.0)], later);
        assert_eq!(again.violations.len(), 1, "re-used id is a fresh track");
    }

    #[test]
    fn test_pig_pass_reports_increment() {
        let mut e = engine();
        let mut now = Instant::now();
        let mut changes = Vec::new();
        for top in [50.0, 140.0, 180.0, 210.0, 260.0] {
            now += Duration::from_millis(66);
            changes.extend(e.process(&[pig(3, top)], now).count_changes);
        }
        assert_eq!(changes, vec![CountChange::Increment]);
    }

    #[test]
    fn test_invalid_boxes_skipped() {
        let mut e = engine();
        let mut det = pig(4, 50.0);
        det.bbox = BBox::new(10.0, 10.0, 10.0, 50.0);
        e.process(&[det], Instant::now());
        assert_eq!(e.active_tracks(), (0, 0));
    }
}
