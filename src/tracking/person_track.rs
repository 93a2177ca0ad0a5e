// src/tracking/person_track.rs
//
// Two-zone worker machine. The centroid is classified against the line
// every frame; a single frame is authoritative (no hysteresis).
//
//   unknown ──first sighting──▶ clean | dirty     (silent)
//   clean   ──────────────────▶ dirty             (silent)
//   dirty   ──────────────────▶ clean             (VIOLATION)

use std::time::{Duration, Instant};
use tracing::debug;

use crate::boundary_line::BoundaryLine;
use crate::config::DirtyZone;
use crate::types::BBox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneState {
    Unknown,
    Clean,
    Dirty,
}

impl ZoneState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Clean => "clean",
            Self::Dirty => "dirty",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersonTrack {
    pub id: u32,
    state: ZoneState,
    dirty_zone: DirtyZone,
    last_seen: Instant,
    idle_timeout: Duration,
}

impl PersonTrack {
    pub fn new(id: u32, dirty_zone: DirtyZone, idle_timeout: Duration, now: Instant) -> Self {
        Self {
            id,
            state: ZoneState::Unknown,
            dirty_zone,
            last_seen: now,
            idle_timeout,
        }
    }

    pub fn state(&self) -> ZoneState {
        self.state
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > self.idle_timeout
    }

    fn classify(&self, bbox: &BBox, line: &BoundaryLine) -> ZoneState {
        let above = line.is_above_line(bbox.center());
        let dirty = match self.dirty_zone {
            DirtyZone::Below => !above,
            DirtyZone::Above => above,
        };
        if dirty {
            ZoneState::Dirty
        } else {
            ZoneState::Clean
        }
    }

    /// Returns true when the worker moved from the dirty zone into the clean one.
    pub fn update(&mut self, bbox: &BBox, line: &BoundaryLine, now: Instant) -> bool {
        self.last_seen = now;
        let zone = self.classify(bbox, line);
        let violation = self.state == ZoneState::Dirty && zone == ZoneState::Clean;
        if zone != self.state {
            debug!(
                track_id = self.id,
                "👷 {} → {}",
                self.state.as_str(),
                zone.as_str()
            );
            self.state = zone;
        }
        violation
    }
}
