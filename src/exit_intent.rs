//! Exit-intent arbiter
//!
//! `Idle → Armed → Triggered → {Dismissed | Converted}`. Three independent
//! triggers race while armed; the first to hold performs the only transition
//! into `Triggered` and every later trigger evaluation is a no-op.
//!
//! Timer-driven triggers carry the arbiter generation captured when the timer
//! was registered. [`ExitIntentArbiter::teardown`] bumps the generation and
//! sets a torn-down flag, so a stale timer callback can never fire.

use crate::types::{ExitIntentState, ExitTrigger};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Why a triggered offer was dismissed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissReason {
    /// Explicit close by the user
    UserDismissed,
    /// Route change or unload without conversion
    NavigatedAway,
}

impl DismissReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DismissReason::UserDismissed => "user_dismissed",
            DismissReason::NavigatedAway => "navigated_away",
        }
    }
}

/// A state change performed by the arbiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Triggered(ExitTrigger),
    Dismissed(DismissReason),
    Converted,
}

/// Fire-once exit-intent state machine
#[derive(Debug, Clone)]
pub struct ExitIntentArbiter {
    state: ExitIntentState,
    generation: u64,
    torn_down: bool,
    near_top_threshold: f64,
    last_scroll_offset: Option<f64>,
    pending_top_exit: bool,
    trigger: Option<ExitTrigger>,
    triggered_at: Option<DateTime<Utc>>,
    transitions: u32,
}

impl ExitIntentArbiter {
    pub fn new(near_top_threshold: f64) -> Self {
        Self {
            state: ExitIntentState::Idle,
            generation: 0,
            torn_down: false,
            near_top_threshold,
            last_scroll_offset: None,
            pending_top_exit: false,
            trigger: None,
            triggered_at: None,
            transitions: 0,
        }
    }

    pub fn state(&self) -> ExitIntentState {
        self.state
    }

    /// Generation to capture when registering trigger timers
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn trigger(&self) -> Option<ExitTrigger> {
        self.trigger
    }

    pub fn triggered_at(&self) -> Option<DateTime<Utc>> {
        self.triggered_at
    }

    /// Number of transitions into `Triggered` (0 or 1)
    pub fn trigger_count(&self) -> u32 {
        self.transitions
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    fn is_armed(&self) -> bool {
        !self.torn_down && self.state == ExitIntentState::Armed
    }

    /// `Idle → Armed`. Returns the generation timers must capture.
    pub fn arm(&mut self) -> Option<u64> {
        if self.torn_down || self.state != ExitIntentState::Idle {
            return None;
        }
        self.state = ExitIntentState::Armed;
        debug!(generation = self.generation, "exit intent armed");
        Some(self.generation)
    }

    fn fire(&mut self, trigger: ExitTrigger, at: DateTime<Utc>) -> Option<Transition> {
        if !self.is_armed() {
            return None;
        }
        self.state = ExitIntentState::Triggered;
        self.trigger = Some(trigger);
        self.triggered_at = Some(at);
        self.pending_top_exit = false;
        self.transitions += 1;
        info!(trigger = trigger.as_str(), "exit intent triggered");
        Some(Transition::Triggered(trigger))
    }

    /// Feed a scroll offset sample; fires on an upward scroll near the top
    pub fn observe_scroll_offset(&mut self, offset: f64, at: DateTime<Utc>) -> Option<Transition> {
        if !offset.is_finite() {
            return None;
        }
        let previous = self.last_scroll_offset.replace(offset);
        match previous {
            Some(previous) if offset < previous && offset < self.near_top_threshold => {
                self.fire(ExitTrigger::ReverseScrollNearTop, at)
            }
            _ => None,
        }
    }

    /// Pointer left through the top edge. Returns `true` when the caller
    /// should start the grace timer.
    pub fn pointer_left_top(&mut self) -> bool {
        if !self.is_armed() {
            return false;
        }
        self.pending_top_exit = true;
        true
    }

    /// Pointer came back before the grace period elapsed
    pub fn pointer_reentered(&mut self) -> bool {
        std::mem::replace(&mut self.pending_top_exit, false)
    }

    pub fn has_pending_top_exit(&self) -> bool {
        self.pending_top_exit
    }

    /// Grace timer callback
    pub fn on_top_edge_grace_elapsed(
        &mut self,
        generation: u64,
        at: DateTime<Utc>,
    ) -> Option<Transition> {
        if generation != self.generation || !self.pending_top_exit {
            debug!(generation, current = self.generation, "stale top-edge grace timer ignored");
            return None;
        }
        self.fire(ExitTrigger::TopEdgeExit, at)
    }

    /// Dwell timeout callback
    pub fn on_dwell_timeout(&mut self, generation: u64, at: DateTime<Utc>) -> Option<Transition> {
        if generation != self.generation {
            debug!(generation, current = self.generation, "stale dwell timer ignored");
            return None;
        }
        self.fire(ExitTrigger::DwellTimeout, at)
    }

    /// `Triggered → Dismissed`
    pub fn dismiss(&mut self, reason: DismissReason) -> Option<Transition> {
        if self.state != ExitIntentState::Triggered {
            return None;
        }
        self.state = ExitIntentState::Dismissed;
        info!(reason = reason.as_str(), "exit intent dismissed");
        Some(Transition::Dismissed(reason))
    }

    /// `Triggered → Converted`
    pub fn convert(&mut self) -> Option<Transition> {
        if self.state != ExitIntentState::Triggered {
            return None;
        }
        self.state = ExitIntentState::Converted;
        info!("exit intent converted");
        Some(Transition::Converted)
    }

    /// Render every outstanding trigger inert
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.generation += 1;
        self.pending_top_exit = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn armed() -> (ExitIntentArbiter, u64) {
        let mut arbiter = ExitIntentArbiter::new(100.0);
        let generation = arbiter.arm().unwrap();
        (arbiter, generation)
    }

    #[test]
    fn test_idle_until_armed() {
        let mut arbiter = ExitIntentArbiter::new(100.0);
        assert_eq!(arbiter.state(), ExitIntentState::Idle);
        assert_eq!(arbiter.on_dwell_timeout(0, t(45)), None);
        assert_eq!(arbiter.arm(), Some(0));
        assert_eq!(arbiter.arm(), None);
        assert_eq!(arbiter.state(), ExitIntentState::Armed);
    }

    #[test]
    fn test_reverse_scroll_near_top() {
        let (mut arbiter, _) = armed();
        assert_eq!(arbiter.observe_scroll_offset(400.0, t(1)), None);
        // Decrease, but still far from the top
        assert_eq!(arbiter.observe_scroll_offset(150.0, t(2)), None);
        // Downward near the top is not a reverse
        assert_eq!(arbiter.observe_scroll_offset(160.0, t(3)), None);
        assert_eq!(
            arbiter.observe_scroll_offset(60.0, t(4)),
            Some(Transition::Triggered(ExitTrigger::ReverseScrollNearTop))
        );
        assert_eq!(arbiter.trigger(), Some(ExitTrigger::ReverseScrollNearTop));
    }

    #[test]
    fn test_first_trigger_wins() {
        let (mut arbiter, generation) = armed();
        arbiter.observe_scroll_offset(90.0, t(4));
        assert!(arbiter.observe_scroll_offset(40.0, t(5)).is_some());

        assert!(!arbiter.pointer_left_top());
        assert_eq!(arbiter.on_top_edge_grace_elapsed(generation, t(7)), None);
        assert_eq!(arbiter.on_dwell_timeout(generation, t(45)), None);
        assert_eq!(arbiter.observe_scroll_offset(10.0, t(8)), None);

        assert_eq!(arbiter.trigger_count(), 1);
        assert_eq!(arbiter.triggered_at(), Some(t(5)));
    }

    #[test]
    fn test_top_edge_requires_pending_exit() {
        let (mut arbiter, generation) = armed();
        assert_eq!(arbiter.on_top_edge_grace_elapsed(generation, t(1)), None);

        assert!(arbiter.pointer_left_top());
        assert!(arbiter.pointer_reentered());
        assert_eq!(arbiter.on_top_edge_grace_elapsed(generation, t(1)), None);

        assert!(arbiter.pointer_left_top());
        assert_eq!(
            arbiter.on_top_edge_grace_elapsed(generation, t(2)),
            Some(Transition::Triggered(ExitTrigger::TopEdgeExit))
        );
    }

    #[test]
    fn test_teardown_makes_timers_stale() {
        let (mut arbiter, generation) = armed();
        arbiter.teardown();
        assert_eq!(arbiter.on_dwell_timeout(generation, t(45)), None);
        assert_eq!(arbiter.on_dwell_timeout(arbiter.generation(), t(45)), None);
        assert_eq!(arbiter.observe_scroll_offset(500.0, t(46)), None);
        assert_eq!(arbiter.observe_scroll_offset(5.0, t(47)), None);
        assert_eq!(arbiter.trigger_count(), 0);
        assert_eq!(arbiter.state(), ExitIntentState::Armed);
    }

    #[test]
    fn test_terminal_states() {
        let (mut arbiter, generation) = armed();
        assert_eq!(arbiter.dismiss(DismissReason::UserDismissed), None);
        assert_eq!(arbiter.convert(), None);

        arbiter.on_dwell_timeout(generation, t(45));
        assert_eq!(arbiter.convert(), Some(Transition::Converted));
        assert_eq!(arbiter.dismiss(DismissReason::NavigatedAway), None);
        assert_eq!(arbiter.convert(), None);
        assert_eq!(arbiter.state(), ExitIntentState::Converted);
    }

    #[test]
    fn test_dismiss_from_triggered() {
        let (mut arbiter, generation) = armed();
        arbiter.on_dwell_timeout(generation, t(45));
        assert_eq!(
            arbiter.dismiss(DismissReason::NavigatedAway),
            Some(Transition::Dismissed(DismissReason::NavigatedAway))
        );
        assert!(arbiter.state().is_terminal());
    }
}
