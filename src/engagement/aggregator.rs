//! Engagement aggregator
//!
//! Owns the mutable [`PageViewSession`]. Only state changes happen here;
//! milestone evaluation lives in [`super::thresholds`].

use crate::types::PageViewSession;
use chrono::{DateTime, Utc};

/// Per-page-view state holder
#[derive(Debug, Clone)]
pub struct EngagementAggregator {
    session: PageViewSession,
}

impl EngagementAggregator {
    pub fn new(route: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            session: PageViewSession::new(route, started_at),
        }
    }

    /// Record a scroll position. The percent is clamped to `[0, 100]` and the
    /// running maximum never decreases; NaN is ignored.
    pub fn on_scroll(&mut self, percent: f64) {
        if percent.is_nan() {
            return;
        }
        let percent = percent.clamp(0.0, 100.0);
        if percent > self.session.max_scroll_percent {
            self.session.max_scroll_percent = percent;
        }
    }

    /// Store the elapsed time observed by the evaluator
    pub fn tick(&mut self, elapsed_seconds: f64) {
        if elapsed_seconds.is_nan() {
            return;
        }
        self.session.elapsed_seconds = elapsed_seconds.max(0.0);
    }

    /// Refresh the last-activity timestamp
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.session.last_active_time {
            self.session.last_active_time = at;
        }
    }

    /// Record a scroll depth as fired; `false` if it had already fired
    pub(crate) fn mark_scroll_depth(&mut self, depth: u32) -> bool {
        self.session.fired_scroll_depths.insert(depth)
    }

    /// Record a time threshold as fired; `false` if it had already fired
    pub(crate) fn mark_time_threshold(&mut self, seconds: u32) -> bool {
        self.session.fired_time_thresholds.insert(seconds)
    }

    pub fn session(&self) -> &PageViewSession {
        &self.session
    }

    pub fn max_scroll_percent(&self) -> f64 {
        self.session.max_scroll_percent
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.session.elapsed_seconds
    }
}
