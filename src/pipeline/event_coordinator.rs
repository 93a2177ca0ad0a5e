// src/pipeline/event_coordinator.rs
//
// Coalesces per-track violations into capture sessions.
//
// The first violation with no session open starts one. Further violations
// only add to its per-category counts (each track id at most once per
// session). A session closes a fixed delay after it opened, whatever
// arrives in the meantime, so a burst always produces exactly one clip.

use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::tracking::TrackViolation;
use crate::types::{Category, ViolationCode};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryCounts {
    pub worker: u32,
    pub pig: u32,
}

impl CategoryCounts {
    fn bump(&mut self, category: Category) {
        match category {
            Category::Worker => self.worker += 1,
            Category::Pig => self.pig += 1,
        }
    }

    pub fn code(&self) -> ViolationCode {
        ViolationCode::from_counts(self.worker, self.pig)
    }
}

#[derive(Debug)]
struct EventSession {
    opened_at: Instant,
    opened_wall: DateTime<Local>,
    counts: CategoryCounts,
    counted_ids: HashSet<u32>,
}

/// A finished session, handed to the clip/persistence path.
#[derive(Debug, Clone)]
pub struct ClosedSession {
    /// Trigger moment; the record window is centered here.
    pub started_at: DateTime<Local>,
    /// Snapshot moment.
    pub closed_at: DateTime<Local>,
    pub counts: CategoryCounts,
}

// ============================================================================
// COORDINATOR
// ============================================================================

pub struct EventCoordinator {
    session: Option<EventSession>,
    close_delay: Duration,
}

impl EventCoordinator {
    pub fn new(close_delay: Duration) -> Self {
        Self {
            session: None,
            close_delay,
        }
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Record one violation. Returns true when it opened a new session.
    pub fn on_violation(
        &mut self,
        violation: &TrackViolation,
        now: Instant,
        wall: DateTime<Local>,
    ) -> bool {
        let opened = self.session.is_none();
        let session = self.session.get_or_insert_with(|| {
            info!("🎬 Capture session opened");
            EventSession {
                opened_at: now,
                opened_wall: wall,
                counts: CategoryCounts::default(),
                counted_ids: HashSet::new(),
            }
        });

        if session.counted_ids.insert(violation.track_id) {
            session.counts.bump(violation.category);
        } else {
            debug!(
                track_id = violation.track_id,
                "Track already counted in this session"
            );
        }
        opened
    }

    /// Close the session once the delay since opening has elapsed.
    pub fn poll_close(&mut self, now: Instant, wall: DateTime<Local>) -> Option<ClosedSession> {
        let due = self
            .session
            .as_ref()
            .is_some_and(|s| now.saturating_duration_since(s.opened_at) >= self.close_delay);
        if due {
            self.close(wall)
        } else {
            None
        }
    }

    /// Close the session immediately, if one is open.
    pub fn close(&mut self, wall: DateTime<Local>) -> Option<ClosedSession> {
        let session = self.session.take()?;
        info!(
            worker = session.counts.worker,
            pig = session.counts.pig,
            "🎬 Capture session closed"
        );
        Some(ClosedSession {
            started_at: session.opened_wall,
            closed_at: wall,
            counts: session.counts,
        })
    }
}
