// src/tracking/animal_track.rs
//
// Per-animal line-crossing state machine with hysteresis.
//
// Animals are expected to travel from the clean side to the dirty side once.
// The machine watches the box's leading edge (`end`), trailing edge (`start`)
// and center along the travel axis:
//
//   none ──trail clean──▶ on_line ──partial cross──▶ crossing ──lead clear──▶ under_line
//     └──lead past line──▶ under_line
//   under_line ──3 frames back over──▶ re_enter_from_under
//   crossing   ──3 frames retreating──▶ re_enter_from_crossing
//   re_enter_* ──(one-shot trigger)──▶ re_enter_handled ──clears to a side──▶ on_line | under_line
//
// Counting: reaching under_line after having approached from the clean side
// increments the daily count; clearing back to the clean side after having
// crossed decrements it. `has_crossed_down` guards both directions.

use std::time::Instant;
use tracing::debug;

use super::CountChange;
use crate::boundary_line::{AxisProjection, BoundaryLine};
use crate::config::TrackingConfig;
use crate::types::BBox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimalState {
    None,
    OnLine,
    Crossing,
    UnderLine,
    ReEnterFromUnder,
    ReEnterFromCrossing,
    ReEnterHandled,
}

impl AnimalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::OnLine => "on_line",
            Self::Crossing => "crossing",
            Self::UnderLine => "under_line",
            Self::ReEnterFromUnder => "re_enter_from_under",
            Self::ReEnterFromCrossing => "re_enter_from_crossing",
            Self::ReEnterHandled => "re_enter_handled",
        }
    }

    pub fn is_reentry(&self) -> bool {
        matches!(self, Self::ReEnterFromUnder | Self::ReEnterFromCrossing)
    }
}

/// What one frame did to the track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnimalUpdate {
    /// The track re-entered and had not been flagged before.
    pub violation: bool,
    pub count_change: Option<CountChange>,
}

#[derive(Debug, Clone)]
pub struct AnimalTrack {
    pub id: u32,
    state: AnimalState,
    history: Vec<AnimalState>,
    reenter_count: u32,
    /// Running maximum of the leading edge while crossing.
    pos_max: f32,
    /// Running maximum of the center while crossing.
    center_max: f32,
    last_seen: Instant,
    has_crossed_down: bool,
    config: TrackingConfig,
}

impl AnimalTrack {
    pub fn new(id: u32, config: TrackingConfig, now: Instant) -> Self {
        Self {
            id,
            state: AnimalState::None,
            history: vec![AnimalState::None],
            reenter_count: 0,
            pos_max: 0.0,
            center_max: 0.0,
            last_seen: now,
            has_crossed_down: false,
            config,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> AnimalState {
        self.state
    }

    #[cfg(test)]
    pub fn history(&self) -> &[AnimalState] {
        &self.history
    }

    #[cfg(test)]
    pub fn has_crossed_down(&self) -> bool {
        self.has_crossed_down
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > self.config.idle_timeout
    }

    fn change_state(&mut self, next: AnimalState) {
        if self.state != next {
            debug!(
                track_id = self.id,
                "🐖 {} → {}",
                self.state.as_str(),
                next.as_str()
            );
            self.state = next;
            self.history.push(next);
        }
    }

    fn approached_from_clean(&self) -> bool {
        self.history
            .iter()
            .any(|s| matches!(s, AnimalState::OnLine | AnimalState::Crossing))
    }

    /// Feed one detection. `already_flagged` is true when this id has already
    /// produced a violation that has not been released yet.
    pub fn update(
        &mut self,
        bbox: &BBox,
        line: &BoundaryLine,
        now: Instant,
        already_flagged: bool,
    ) -> AnimalUpdate {
        self.last_seen = now;
        let mut out = AnimalUpdate::default();

        let proj = line.project(bbox);
        if proj.length <= 0.0 {
            return out;
        }

        self.advance(bbox, line, &proj);

        // One-shot trigger: every re-entry state rests in re_enter_handled.
        if self.state.is_reentry() {
            out.violation = !already_flagged;
            self.change_state(AnimalState::ReEnterHandled);
        }

        if self.state == AnimalState::ReEnterHandled {
            if proj.fully_dirty() {
                if !self.has_crossed_down && self.approached_from_clean() {
                    self.has_crossed_down = true;
                    out.count_change = Some(CountChange::Increment);
                }
                self.enter_under_line();
            } else if proj.fully_clean() {
                if self.has_crossed_down {
                    self.has_crossed_down = false;
                    out.count_change = Some(CountChange::Decrement);
                }
                self.change_state(AnimalState::OnLine);
            }
        } else if self.state == AnimalState::UnderLine
            && !self.has_crossed_down
            && self.approached_from_clean()
        {
            self.has_crossed_down = true;
            out.count_change = Some(CountChange::Increment);
        }

        out
    }

    fn enter_under_line(&mut self) {
        if self.state != AnimalState::UnderLine {
            self.reenter_count = 0;
        }
        self.change_state(AnimalState::UnderLine);
    }

    fn advance(&mut self, bbox: &BBox, line: &BoundaryLine, proj: &AxisProjection) {
        let th = self.config.reenter_thresh;
        match self.state {
            AnimalState::None => {
                if proj.fully_clean() {
                    self.change_state(AnimalState::OnLine);
                    self.has_crossed_down = false;
                } else if proj.fully_dirty() {
                    self.enter_under_line();
                    self.has_crossed_down = true;
                }
            }
            AnimalState::OnLine => {
                if proj.start < proj.line && proj.start + proj.length * (1.0 - th) >= proj.line {
                    self.change_state(AnimalState::Crossing);
                    self.pos_max = proj.end;
                    self.center_max = proj.center;
                    self.reenter_count = 0;
                }
            }
            AnimalState::UnderLine => {
                let check = line.axis_point(bbox, proj.start + proj.length * th);
                if line.is_above_line(check) {
                    self.reenter_count += 1;
                } else {
                    self.reenter_count = 0;
                }
                if self.reenter_count >= self.config.violation_frames {
                    self.change_state(AnimalState::ReEnterFromUnder);
                }
            }
            AnimalState::Crossing => {
                if proj.end > self.pos_max {
                    self.pos_max = proj.end;
                    self.center_max = proj.center;
                    self.reenter_count = 0;
                } else {
                    let lead_back = proj.end < self.pos_max - proj.length * th;
                    let center_back =
                        proj.center < self.center_max - proj.length * self.config.center_thresh;
                    if lead_back && center_back {
                        self.reenter_count += 1;
                    } else {
                        self.reenter_count = 0;
                    }
                }

                if self.reenter_count >= self.config.violation_frames {
                    self.change_state(AnimalState::ReEnterFromCrossing);
                } else if proj.fully_dirty() {
                    self.enter_under_line();
                }
            }
            AnimalState::ReEnterFromUnder
            | AnimalState::ReEnterFromCrossing
            | AnimalState::ReEnterHandled => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Orientation;
    use std::time::Duration;

    fn line() -> BoundaryLine {
        BoundaryLine::new((0.0, 200.0), (640.0, 200.0), Orientation::Height).unwrap()
    }

    fn boxy(top: f32) -> BBox {
        BBox::new(300.0, top, 360.0, top + 100.0)
    }

    struct Tally {
        inc: u32,
        dec: u32,
        violations: u32,
    }

    fn run(track: &mut AnimalTrack, tops: &[f32]) -> Tally {
        let line = line();
        let mut tally = Tally {
            inc: 0,
            dec: 0,
            violations: 0,
        };
        let mut now = Instant::now();
        for top in tops {
            now += Duration::from_millis(66);
            let up = track.update(&boxy(*top), &line, now, tally.violations > 0);
            match up.count_change {
                Some(CountChange::Increment) => tally.inc += 1,
                Some(CountChange::Decrement) => tally.dec += 1,
                None => {}
            }
            if up.violation {
                tally.violations += 1;
            }
        }
        tally
    }

    #[test]
    fn test_full_pass_counts_once() {
        let mut track = AnimalTrack::new(1, TrackingConfig::default(), Instant::now());
        let tops: Vec<f32> = (0..30).map(|i| 20.0 + i as f32 * 12.0).collect();
        let tally = run(&mut track, &tops);
        assert_eq!(tally.inc, 1, "full pass increments exactly once");
        assert_eq!(tally.dec, 0, "full pass never decrements");
        assert_eq!(tally.violations, 0);
        assert_eq!(track.state(), AnimalState::UnderLine);
        assert!(track.history().contains(&AnimalState::Crossing));
    }

    #[test]
    fn test_cross_then_return_is_one_violation_net_zero() {
        let mut track = AnimalTrack::new(2, TrackingConfig::default(), Instant::now());
        let mut tops = vec![50.0, 100.0, 140.0, 160.0, 210.0, 230.0];
        // back up: check point (top + 35) on the clean side for 3+ frames
        tops.extend([150.0, 140.0, 130.0, 120.0]);
        // clear back to the clean side
        tops.extend([90.0, 60.0]);
        let tally = run(&mut track, &tops);
        assert_eq!(tally.violations, 1, "exactly one re-entry trigger");
        assert_eq!(tally.inc, 1);
        assert_eq!(tally.dec, 1);
        assert_eq!(track.state(), AnimalState::OnLine);
        assert!(track.history().contains(&AnimalState::ReEnterHandled));
    }

    #[test]
    fn test_retreat_while_crossing_triggers() {
        let mut track = AnimalTrack::new(3, TrackingConfig::default(), Instant::now());
        // on_line, then crossing at top 140 (lead 240), push to lead 280
        let mut tops = vec![50.0, 140.0, 170.0, 180.0];
        // retreat: lead < 280 - 35 and center < 230 - 20
        tops.extend([130.0, 128.0, 126.0]);
        let tally = run(&mut track, &tops);
        assert_eq!(tally.violations, 1);
        assert_eq!(tally.inc, 0, "never reached under_line");
        assert_eq!(track.state(), AnimalState::ReEnterHandled);
        assert!(track.history().contains(&AnimalState::ReEnterFromCrossing));
    }

    #[test]
    fn test_single_noisy_frame_does_not_trigger() {
        let mut track = AnimalTrack::new(4, TrackingConfig::default(), Instant::now());
        let tops = [50.0, 140.0, 210.0, 150.0, 230.0, 150.0, 240.0];
        let tally = run(&mut track, &tops);
        assert_eq!(tally.violations, 0, "counter resets on non-qualifying frames");
        assert_eq!(tally.inc, 1);
    }

    #[test]
    fn test_first_seen_below_is_not_counted() {
        let mut track = AnimalTrack::new(5, TrackingConfig::default(), Instant::now());
        let tally = run(&mut track, &[250.0, 260.0, 270.0]);
        assert_eq!(tally.inc, 0);
        assert!(track.has_crossed_down());
    }

    #[test]
    fn test_first_seen_below_then_return_decrements_without_increment() {
        // A pig already on the dirty side when first seen is treated as
        // having crossed, so walking back out takes one off the count.
        let mut track = AnimalTrack::new(7, TrackingConfig::default(), Instant::now());
        let tops = [250.0, 260.0, 150.0, 140.0, 130.0, 90.0, 60.0];
        let tally = run(&mut track, &tops);
        assert_eq!(tally.inc, 0, "no increment for a pig born below the line");
        assert_eq!(tally.dec, 1, "returning still decrements");
        assert_eq!(tally.violations, 1);
        assert_eq!(track.state(), AnimalState::OnLine);
        assert!(!track.has_crossed_down());
    }

    #[test]
    fn test_expiry() {
        let start = Instant::now();
        let track = AnimalTrack::new(6, TrackingConfig::default(), start);
        assert!(!track.is_expired(start + Duration::from_secs(5)));
        assert!(track.is_expired(start + Duration::from_secs(11)));
    }
}
