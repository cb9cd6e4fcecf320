//! Engagement tracking module
//!
//! The aggregator owns per-page-view state; the threshold evaluator polls it
//! and turns crossed scroll depths and time thresholds into milestones.

pub mod aggregator;
pub mod thresholds;

pub use aggregator::EngagementAggregator;
pub use thresholds::{Milestone, MilestoneKind, ThresholdEvaluator};
