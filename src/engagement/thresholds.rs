//! Threshold evaluator
//!
//! Runs once per poll tick. Scroll depths and time thresholds use a
//! threshold-crossed (`>=`) test combined with the session's fired sets, so a
//! late or throttled tick can overshoot a threshold but never skip it.

use crate::config::EngageConfig;
use crate::engagement::aggregator::EngagementAggregator;
use crate::types::{ConversionEvent, EventType};
use chrono::{DateTime, Utc};

/// Kind of milestone crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilestoneKind {
    ScrollDepth,
    TimeOnPage,
}

/// A threshold crossed for the first time in this session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Milestone {
    pub kind: MilestoneKind,
    /// Configured threshold (percent or seconds)
    pub threshold: u32,
    /// Observed value at evaluation time (max scroll percent or elapsed seconds)
    pub observed: f64,
}

impl Milestone {
    /// Label by threshold value, not by the observed value
    pub fn label(&self) -> String {
        match self.kind {
            MilestoneKind::ScrollDepth => format!("{}%", self.threshold),
            MilestoneKind::TimeOnPage => format!("{}s", self.threshold),
        }
    }

    pub fn into_event(self, aggregator: &EngagementAggregator, at: DateTime<Utc>) -> ConversionEvent {
        let session = aggregator.session();
        match self.kind {
            MilestoneKind::ScrollDepth => {
                ConversionEvent::new(EventType::ScrollDepth, self.label(), session, at)
                    .with_value(self.threshold as f64)
                    .with_payload("depth_percent", self.threshold)
                    .with_payload("max_scroll_percent", self.observed)
            }
            MilestoneKind::TimeOnPage => {
                ConversionEvent::new(EventType::TimeOnPage, self.label(), session, at)
                    .with_value(self.threshold as f64)
                    .with_payload("threshold_seconds", self.threshold)
                    .with_payload("elapsed_seconds", self.observed)
            }
        }
    }
}

/// Scroll-depth and time-on-page evaluator
#[derive(Debug, Clone)]
pub struct ThresholdEvaluator {
    scroll_depths: Vec<u32>,
    time_thresholds: Vec<u32>,
}

impl ThresholdEvaluator {
    /// Both lists must be ascending; [`EngageConfig::sanitized`] guarantees it.
    pub fn new(scroll_depths: Vec<u32>, time_thresholds: Vec<u32>) -> Self {
        Self {
            scroll_depths,
            time_thresholds,
        }
    }

    pub fn from_config(config: &EngageConfig) -> Self {
        Self::new(config.scroll_depths.clone(), config.time_thresholds.clone())
    }

    /// Evaluate one tick. Returns newly crossed milestones: scroll depths
    /// first, then time thresholds, each ascending.
    pub fn evaluate(
        &self,
        aggregator: &mut EngagementAggregator,
        elapsed_seconds: f64,
    ) -> Vec<Milestone> {
        aggregator.tick(elapsed_seconds);
        let max_scroll = aggregator.max_scroll_percent();
        let elapsed = aggregator.elapsed_seconds();

        let mut milestones = Vec::new();

        for &depth in &self.scroll_depths {
            if max_scroll >= depth as f64 && aggregator.mark_scroll_depth(depth) {
                milestones.push(Milestone {
                    kind: MilestoneKind::ScrollDepth,
                    threshold: depth,
                    observed: max_scroll,
                });
            }
        }

        for &seconds in &self.time_thresholds {
            if elapsed >= seconds as f64 && aggregator.mark_time_threshold(seconds) {
                milestones.push(Milestone {
                    kind: MilestoneKind::TimeOnPage,
                    threshold: seconds,
                    observed: elapsed,
                });
            }
        }

        milestones
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    fn evaluator() -> ThresholdEvaluator {
        ThresholdEvaluator::from_config(&EngageConfig::default())
    }

    fn thresholds(milestones: &[Milestone], kind: MilestoneKind) -> Vec<u32> {
        milestones
            .iter()
            .filter(|m| m.kind == kind)
            .map(|m| m.threshold)
            .collect()
    }

    #[test]
    fn test_multiple_depths_fire_in_one_tick_ascending() {
        let mut agg = EngagementAggregator::new("/", start());
        agg.on_scroll(80.0);

        let fired = evaluator().evaluate(&mut agg, 1.0);
        assert_eq!(thresholds(&fired, MilestoneKind::ScrollDepth), vec![25, 50, 75]);
        assert_eq!(
            fired.iter().map(Milestone::label).collect::<Vec<_>>(),
            vec!["25%", "50%", "75%"]
        );
    }

    #[test]
    fn test_scroll_zero_to_hundred_over_two_polls() {
        let evaluator = evaluator();
        let mut agg = EngagementAggregator::new("/", start());
        let mut all = Vec::new();

        agg.on_scroll(55.0);
        all.extend(evaluator.evaluate(&mut agg, 1.0));
        agg.on_scroll(100.0);
        all.extend(evaluator.evaluate(&mut agg, 2.0));

        // Further scrolling never re-fires
        agg.on_scroll(10.0);
        agg.on_scroll(100.0);
        all.extend(evaluator.evaluate(&mut agg, 3.0));

        assert_eq!(thresholds(&all, MilestoneKind::ScrollDepth), vec![25, 50, 75, 90]);
    }

    #[test]
    fn test_jittered_ticks_never_skip_time_thresholds() {
        let evaluator = evaluator();
        let mut agg = EngagementAggregator::new("/", start());
        let mut fired = Vec::new();

        // 1s cadence with a 3s stall every 7 ticks; none lands exactly on 30/60/120/300
        let mut elapsed = 0.0;
        let mut tick = 0;
        while elapsed < 305.0 {
            tick += 1;
            elapsed += if tick % 7 == 0 { 3.0 } else { 1.0 };
            elapsed += 0.013;
            fired.extend(evaluator.evaluate(&mut agg, elapsed));
        }

        assert_eq!(thresholds(&fired, MilestoneKind::TimeOnPage), vec![30, 60, 120, 300]);
    }

    #[test]
    fn test_time_label_is_threshold_value() {
        let mut agg = EngagementAggregator::new("/", start());
        let fired = evaluator().evaluate(&mut agg, 33.7);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].label(), "30s");
        assert_eq!(fired[0].observed, 33.7);

        let event = fired[0].into_event(&agg, start());
        assert_eq!(event.event_type(), EventType::TimeOnPage);
        assert_eq!(event.label(), "30s");
        assert_eq!(event.value(), Some(30.0));
        assert_eq!(event.payload()["elapsed_seconds"], 33.7);
    }

    #[test]
    fn test_scroll_before_time_within_tick() {
        let mut agg = EngagementAggregator::new("/", start());
        agg.on_scroll(30.0);
        let fired = evaluator().evaluate(&mut agg, 31.0);
        assert_eq!(fired[0].kind, MilestoneKind::ScrollDepth);
        assert_eq!(fired[1].kind, MilestoneKind::TimeOnPage);
    }

    proptest! {
        #[test]
        fn prop_each_threshold_fires_at_most_once(
            steps in prop::collection::vec((0.0f64..100.0, 0.0f64..20.0), 1..80)
        ) {
            let evaluator = evaluator();
            let mut agg = EngagementAggregator::new("/", start());
            let mut elapsed = 0.0;
            let mut fired = Vec::new();

            for (percent, delta) in steps {
                agg.on_scroll(percent);
                elapsed += delta;
                fired.extend(evaluator.evaluate(&mut agg, elapsed));
            }

            let depths = thresholds(&fired, MilestoneKind::ScrollDepth);
            let mut deduped = depths.clone();
            deduped.dedup();
            prop_assert_eq!(&depths, &deduped);
            prop_assert!(depths.windows(2).all(|w| w[0] < w[1]));

            let times = thresholds(&fired, MilestoneKind::TimeOnPage);
            prop_assert!(times.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
