//! Tracker configuration
//!
//! Configuration never fails activation: every recognized option is validated
//! on its own and an invalid value (unsorted, duplicated, non-positive, out of
//! range, wrong type) is replaced by its default.

use crate::error::EngageError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Default scroll depths (percent)
pub const DEFAULT_SCROLL_DEPTHS: [u32; 4] = [25, 50, 75, 90];

/// Default time-on-page thresholds (seconds)
pub const DEFAULT_TIME_THRESHOLDS: [u32; 4] = [30, 60, 120, 300];

/// Default dwell before the exit-intent safety net fires
pub const DEFAULT_EXIT_INTENT_DELAY_MS: u64 = 45_000;

/// Default grace period for a top-edge pointer exit
pub const DEFAULT_TOP_EDGE_GRACE_MS: u64 = 100;

/// Default bounded event log capacity
pub const DEFAULT_LOG_CAPACITY: usize = 50;

/// Default threshold evaluator cadence
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Default scroll offset under which an upward scroll counts as exit intent
pub const DEFAULT_NEAR_TOP_THRESHOLD: f64 = 100.0;

/// Longest accepted timer option (one day)
pub const MAX_TIMER_MS: u64 = 86_400_000;

/// Largest accepted event log capacity
pub const MAX_LOG_CAPACITY: usize = 10_000;

/// Tracker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngageConfig {
    /// Scroll depths in ascending order, each in 1..=100
    pub scroll_depths: Vec<u32>,
    /// Time-on-page thresholds in seconds, ascending
    pub time_thresholds: Vec<u32>,
    pub exit_intent_delay_ms: u64,
    pub top_edge_grace_ms: u64,
    pub log_capacity: usize,
    pub poll_interval_ms: u64,
    pub near_top_threshold: f64,
    /// Host of the current page, used to tell external links apart
    pub page_host: Option<String>,
    pub exit_intent_enabled: bool,
}

impl Default for EngageConfig {
    fn default() -> Self {
        Self {
            scroll_depths: DEFAULT_SCROLL_DEPTHS.to_vec(),
            time_thresholds: DEFAULT_TIME_THRESHOLDS.to_vec(),
            exit_intent_delay_ms: DEFAULT_EXIT_INTENT_DELAY_MS,
            top_edge_grace_ms: DEFAULT_TOP_EDGE_GRACE_MS,
            log_capacity: DEFAULT_LOG_CAPACITY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            near_top_threshold: DEFAULT_NEAR_TOP_THRESHOLD,
            page_host: None,
            exit_intent_enabled: true,
        }
    }
}

impl EngageConfig {
    /// Parse configuration from a JSON string.
    ///
    /// Only syntactically invalid JSON is an error; semantic problems fall back
    /// to defaults field by field.
    pub fn from_json(json: &str) -> Result<Self, EngageError> {
        let value: Value = serde_json::from_str(json)?;
        Ok(Self::from_value(&value))
    }

    /// Build configuration from a JSON value, accepting snake_case or camelCase keys
    pub fn from_value(value: &Value) -> Self {
        let defaults = Self::default();
        let Some(obj) = value.as_object() else {
            debug!("configuration is not an object, using defaults");
            return defaults;
        };

        let field = |snake: &str, camel: &str| obj.get(snake).or_else(|| obj.get(camel));

        let scroll_depths = field("scroll_depths", "scrollDepths")
            .and_then(thresholds_from_value)
            .filter(|d| valid_scroll_depths(d))
            .unwrap_or_else(|| fallback("scroll_depths", defaults.scroll_depths.clone()));

        let time_thresholds = field("time_thresholds", "timeThresholds")
            .and_then(thresholds_from_value)
            .filter(|t| valid_thresholds(t))
            .unwrap_or_else(|| fallback("time_thresholds", defaults.time_thresholds.clone()));

        let exit_intent_delay_ms = field("exit_intent_delay_ms", "exitIntentDelayMs")
            .and_then(|v| bounded_u64(v, MAX_TIMER_MS))
            .unwrap_or_else(|| fallback("exit_intent_delay_ms", defaults.exit_intent_delay_ms));

        let top_edge_grace_ms = field("top_edge_grace_ms", "topEdgeGraceMs")
            .and_then(|v| bounded_u64(v, MAX_TIMER_MS))
            .unwrap_or_else(|| fallback("top_edge_grace_ms", defaults.top_edge_grace_ms));

        let log_capacity = field("log_capacity", "logCapacity")
            .and_then(|v| bounded_u64(v, MAX_LOG_CAPACITY as u64))
            .map(|c| c as usize)
            .unwrap_or_else(|| fallback("log_capacity", defaults.log_capacity));

        let poll_interval_ms = field("poll_interval_ms", "pollIntervalMs")
            .and_then(|v| bounded_u64(v, MAX_TIMER_MS))
            .unwrap_or_else(|| fallback("poll_interval_ms", defaults.poll_interval_ms));

        let near_top_threshold = field("near_top_threshold", "nearTopThreshold")
            .and_then(Value::as_f64)
            .filter(|t| t.is_finite() && *t > 0.0)
            .unwrap_or_else(|| fallback("near_top_threshold", defaults.near_top_threshold));

        let page_host = field("page_host", "pageHost")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_ascii_lowercase);

        let exit_intent_enabled = field("exit_intent_enabled", "exitIntentEnabled")
            .and_then(Value::as_bool)
            .unwrap_or(defaults.exit_intent_enabled);

        Self {
            scroll_depths,
            time_thresholds,
            exit_intent_delay_ms,
            top_edge_grace_ms,
            log_capacity,
            poll_interval_ms,
            near_top_threshold,
            page_host,
            exit_intent_enabled,
        }
    }

    /// Replace every invalid field of a programmatically built config with its default
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            scroll_depths: if valid_scroll_depths(&self.scroll_depths) {
                self.scroll_depths
            } else {
                fallback("scroll_depths", defaults.scroll_depths)
            },
            time_thresholds: if valid_thresholds(&self.time_thresholds) {
                self.time_thresholds
            } else {
                fallback("time_thresholds", defaults.time_thresholds)
            },
            exit_intent_delay_ms: bounded_or(
                "exit_intent_delay_ms",
                self.exit_intent_delay_ms,
                MAX_TIMER_MS,
                defaults.exit_intent_delay_ms,
            ),
            top_edge_grace_ms: bounded_or(
                "top_edge_grace_ms",
                self.top_edge_grace_ms,
                MAX_TIMER_MS,
                defaults.top_edge_grace_ms,
            ),
            log_capacity: bounded_or(
                "log_capacity",
                self.log_capacity as u64,
                MAX_LOG_CAPACITY as u64,
                defaults.log_capacity as u64,
            ) as usize,
            poll_interval_ms: bounded_or(
                "poll_interval_ms",
                self.poll_interval_ms,
                MAX_TIMER_MS,
                defaults.poll_interval_ms,
            ),
            near_top_threshold: if self.near_top_threshold.is_finite()
                && self.near_top_threshold > 0.0
            {
                self.near_top_threshold
            } else {
                fallback("near_top_threshold", defaults.near_top_threshold)
            },
            page_host: self
                .page_host
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty()),
            exit_intent_enabled: self.exit_intent_enabled,
        }
    }

    /// Options present in `value` that [`EngageConfig::from_value`] would
    /// replace with their defaults, in declaration order
    pub fn fallbacks(value: &Value) -> Vec<&'static str> {
        let Some(obj) = value.as_object() else {
            return Vec::new();
        };
        let loaded = Self::from_value(value);
        let defaults = Self::default();
        let field = |snake: &str, camel: &str| obj.get(snake).or_else(|| obj.get(camel));

        let checks = [
            (
                "scroll_depths",
                replaced(field("scroll_depths", "scrollDepths"), &loaded.scroll_depths, &defaults.scroll_depths),
            ),
            (
                "time_thresholds",
                replaced(
                    field("time_thresholds", "timeThresholds"),
                    &loaded.time_thresholds,
                    &defaults.time_thresholds,
                ),
            ),
            (
                "exit_intent_delay_ms",
                replaced(
                    field("exit_intent_delay_ms", "exitIntentDelayMs"),
                    &loaded.exit_intent_delay_ms,
                    &defaults.exit_intent_delay_ms,
                ),
            ),
            (
                "top_edge_grace_ms",
                replaced(
                    field("top_edge_grace_ms", "topEdgeGraceMs"),
                    &loaded.top_edge_grace_ms,
                    &defaults.top_edge_grace_ms,
                ),
            ),
            (
                "log_capacity",
                replaced(field("log_capacity", "logCapacity"), &loaded.log_capacity, &defaults.log_capacity),
            ),
            (
                "poll_interval_ms",
                replaced(
                    field("poll_interval_ms", "pollIntervalMs"),
                    &loaded.poll_interval_ms,
                    &defaults.poll_interval_ms,
                ),
            ),
            (
                "near_top_threshold",
                replaced(
                    field("near_top_threshold", "nearTopThreshold"),
                    &loaded.near_top_threshold,
                    &defaults.near_top_threshold,
                ),
            ),
            (
                "page_host",
                replaced(field("page_host", "pageHost"), &loaded.page_host, &defaults.page_host),
            ),
            (
                "exit_intent_enabled",
                replaced(
                    field("exit_intent_enabled", "exitIntentEnabled"),
                    &loaded.exit_intent_enabled,
                    &defaults.exit_intent_enabled,
                ),
            ),
        ];

        checks
            .into_iter()
            .filter(|(_, hit)| *hit)
            .map(|(name, _)| name)
            .collect()
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn fallback<T: std::fmt::Debug>(name: &str, default: T) -> T {
    debug!(option = name, default = ?default, "invalid or missing option, using default");
    default
}

/// A present option loaded as its default although it was not written as the default
fn replaced<T: Serialize + PartialEq>(raw: Option<&Value>, loaded: &T, default: &T) -> bool {
    let Some(raw) = raw else {
        return false;
    };
    if loaded != default {
        return false;
    }
    match serde_json::to_value(default) {
        Ok(expected) => {
            raw != &expected && !(raw.is_number() && raw.as_f64() == expected.as_f64())
        }
        Err(_) => true,
    }
}

fn bounded_or(name: &str, value: u64, max: u64, default: u64) -> u64 {
    if (1..=max).contains(&value) {
        value
    } else {
        fallback(name, default)
    }
}

/// A positive integer no larger than `max`
fn bounded_u64(value: &Value, max: u64) -> Option<u64> {
    value.as_u64().filter(|v| (1..=max).contains(v))
}

fn thresholds_from_value(value: &Value) -> Option<Vec<u32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_u64().and_then(|n| u32::try_from(n).ok()))
        .collect()
}

/// Non-empty, strictly ascending, all positive
fn valid_thresholds(values: &[u32]) -> bool {
    !values.is_empty() && values[0] > 0 && values.windows(2).all(|w| w[0] < w[1])
}

fn valid_scroll_depths(values: &[u32]) -> bool {
    valid_thresholds(values) && values.iter().all(|d| *d <= 100)
}
