use std::time::Duration;

pub const PULL_THRESHOLD: f32 = 80.0;
pub const MAX_PULL_DISTANCE: f32 = 120.0;
pub const DAMPING_FACTOR: f32 = 0.5;
/// Keep the spinner visible at least this long so a fast refresh does not
/// flash.
pub const MIN_REFRESH_SPIN: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullState {
    Idle,
    Pulling,
    Ready,
    Refreshing,
}

/// Touch-delta state machine for pull-to-refresh.
///
/// Only arms when the scroll container is at its top. Downward deltas are
/// damped and capped; crossing the threshold arms the release. The machine
/// is purely synchronous — the owner runs the actual refresh and reports
/// back with [`finish_refresh`](PullToRefresh::finish_refresh).
pub struct PullToRefresh {
    state: PullState,
    distance: f32,
    start_y: Option<f32>,
    dragging: bool,
    enabled: bool,
}

impl PullToRefresh {
    pub fn new() -> Self {
        Self {
            state: PullState::Idle,
            distance: 0.0,
            start_y: None,
            dragging: false,
            enabled: true,
        }
    }

    pub fn state(&self) -> PullState {
        self.state
    }

    /// Current damped pull distance, for the indicator.
    pub fn distance(&self) -> f32 {
        self.distance
    }

    /// Suppression switch for when the full-screen viewer is open. Takes
    /// effect before the next touch-start; disabling mid-gesture discards
    /// the gesture.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled && self.state != PullState::Refreshing {
            self.reset();
        }
    }

    pub fn touch_start(&mut self, scroll_offset: f32, y: f32) {
        if !self.enabled || scroll_offset > 0.0 || self.state == PullState::Refreshing {
            self.start_y = None;
            return;
        }
        self.start_y = Some(y);
        self.dragging = false;
        self.state = PullState::Idle;
    }

    pub fn touch_move(&mut self, scroll_offset: f32, y: f32) {
        if !self.enabled || scroll_offset > 0.0 || self.state == PullState::Refreshing {
            return;
        }
        let Some(start_y) = self.start_y else { return };

        let delta = y - start_y;
        if delta <= 0.0 {
            return;
        }
        self.dragging = true;
        self.distance = (delta * DAMPING_FACTOR).min(MAX_PULL_DISTANCE);
        self.state = if self.distance > PULL_THRESHOLD {
            PullState::Ready
        } else {
            PullState::Pulling
        };
    }

    /// Ends the gesture. Returns true when the owner should start a refresh;
    /// the machine is then in `Refreshing` until `finish_refresh`.
    pub fn touch_end(&mut self) -> bool {
        if self.state == PullState::Refreshing {
            self.start_y = None;
            self.dragging = false;
            return false;
        }
        let fire = self.dragging && self.distance > PULL_THRESHOLD;
        self.start_y = None;
        self.dragging = false;
        if fire {
            self.state = PullState::Refreshing;
            true
        } else {
            self.reset();
            false
        }
    }

    /// Refresh settled (success or failure); back to rest.
    pub fn finish_refresh(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.state = PullState::Idle;
        self.distance = 0.0;
        self.start_y = None;
        self.dragging = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_threshold_pull_resets_to_idle_on_release() {
        let mut pull = PullToRefresh::new();
        pull.touch_start(0.0, 100.0);
        // 150 raw px dampens to 75, below the 80 threshold.
        pull.touch_move(0.0, 250.0);
        assert_eq!(pull.state(), PullState::Pulling);
        assert!(!pull.touch_end());
        assert_eq!(pull.state(), PullState::Idle);
        assert_eq!(pull.distance(), 0.0);
    }

    #[test]
    fn crossing_threshold_arms_and_release_fires() {
        let mut pull = PullToRefresh::new();
        pull.touch_start(0.0, 100.0);
        // 170 raw px dampens to 85.
        pull.touch_move(0.0, 270.0);
        assert_eq!(pull.state(), PullState::Ready);
        assert!(pull.touch_end());
        assert_eq!(pull.state(), PullState::Refreshing);
        pull.finish_refresh();
        assert_eq!(pull.state(), PullState::Idle);
    }

    #[test]
    fn damped_distance_is_capped() {
        let mut pull = PullToRefresh::new();
        pull.touch_start(0.0, 0.0);
        pull.touch_move(0.0, 1000.0);
        assert_eq!(pull.distance(), MAX_PULL_DISTANCE);
    }

    #[test]
    fn gesture_ignored_when_not_scrolled_to_top() {
        let mut pull = PullToRefresh::new();
        pull.touch_start(40.0, 100.0);
        pull.touch_move(40.0, 400.0);
        assert_eq!(pull.state(), PullState::Idle);
        assert!(!pull.touch_end());
    }

    #[test]
    fn upward_drag_does_not_arm() {
        let mut pull = PullToRefresh::new();
        pull.touch_start(0.0, 100.0);
        pull.touch_move(0.0, 20.0);
        assert_eq!(pull.state(), PullState::Idle);
        assert!(!pull.touch_end());
    }

    #[test]
    fn disabled_recognizer_ignores_touches() {
        let mut pull = PullToRefresh::new();
        pull.set_enabled(false);
        pull.touch_start(0.0, 0.0);
        pull.touch_move(0.0, 500.0);
        assert_eq!(pull.state(), PullState::Idle);
        assert!(!pull.touch_end());
    }

    #[test]
    fn disabling_mid_gesture_discards_it() {
        let mut pull = PullToRefresh::new();
        pull.touch_start(0.0, 0.0);
        pull.touch_move(0.0, 300.0);
        assert_eq!(pull.state(), PullState::Ready);
        pull.set_enabled(false);
        assert_eq!(pull.state(), PullState::Idle);
        assert!(!pull.touch_end());
    }

    #[test]
    fn new_touch_is_ignored_while_refreshing() {
        let mut pull = PullToRefresh::new();
        pull.touch_start(0.0, 0.0);
        pull.touch_move(0.0, 300.0);
        assert!(pull.touch_end());

        pull.touch_start(0.0, 0.0);
        pull.touch_move(0.0, 300.0);
        assert_eq!(pull.state(), PullState::Refreshing);
        // Releasing during an in-flight refresh must not cancel it.
        assert!(!pull.touch_end());
        assert_eq!(pull.state(), PullState::Refreshing);
    }
}
