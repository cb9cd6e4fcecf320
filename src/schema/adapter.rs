//! Adapter for engage.signal.v1 input
//!
//! Parses NDJSON or JSON-array signal streams and validates them before they
//! are fed to a tracker.

use crate::error::EngageError;
use crate::schema::signal::{Signal, SignalValidationError};

/// Parser and validator for signal streams
pub struct SignalAdapter;

impl SignalAdapter {
    /// Parse newline-delimited JSON, one signal per line
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<Signal>, EngageError> {
        let mut signals = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Signal>(trimmed) {
                Ok(signal) => signals.push(signal),
                Err(e) => {
                    return Err(EngageError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(signals)
    }

    /// Parse a JSON array of signals
    pub fn parse_array(json: &str) -> Result<Vec<Signal>, EngageError> {
        serde_json::from_str(json)
            .map_err(|e| EngageError::ParseError(format!("Failed to parse signal array: {}", e)))
    }

    /// Validate every signal, returning the index and error of each invalid one
    pub fn validate_signals(signals: &[Signal]) -> Vec<(usize, SignalValidationError)> {
        signals
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.validate().err().map(|e| (i, e)))
            .collect()
    }

    /// Stable sort by timestamp so that equal timestamps keep arrival order
    pub fn sort_by_timestamp(signals: &mut [Signal]) {
        signals.sort_by_key(|s| s.timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::signal::SignalKind;

    #[test]
    fn test_parse_ndjson() {
        let ndjson = r#"{"timestamp":"2024-01-15T14:00:01Z","signal":"scroll","percent":10.0}

{"timestamp":"2024-01-15T14:00:02Z","signal":"before_unload"}"#;

        let signals = SignalAdapter::parse_ndjson(ndjson).unwrap();
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[1].kind, SignalKind::BeforeUnload);
    }

    #[test]
    fn test_parse_ndjson_reports_line() {
        let ndjson = "{\"timestamp\":\"2024-01-15T14:00:01Z\",\"signal\":\"tick\"}\nnot json";
        let err = SignalAdapter::parse_ndjson(ndjson).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_array() {
        let json = r#"[{"timestamp":"2024-01-15T14:00:01Z","signal":"tick"},{"timestamp":"2024-01-15T14:00:02Z","signal":"focus_in","form_id":"newsletter"}]"#;
        let signals = SignalAdapter::parse_array(json).unwrap();
        assert_eq!(signals.len(), 2);
        assert!(SignalAdapter::parse_array("{}").is_err());
    }

    #[test]
    fn test_validate_signals() {
        let json = r#"[{"timestamp":"2024-01-15T14:00:01Z","signal":"route_change","route":""},{"timestamp":"2024-01-15T14:00:02Z","signal":"tick"}]"#;
        let signals = SignalAdapter::parse_array(json).unwrap();
        let errors = SignalAdapter::validate_signals(&signals);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, 0);
    }

    #[test]
    fn test_sort_is_stable() {
        let json = r#"[
            {"timestamp":"2024-01-15T14:00:05Z","signal":"tick"},
            {"timestamp":"2024-01-15T14:00:01Z","signal":"pointer_top_exit"},
            {"timestamp":"2024-01-15T14:00:01Z","signal":"pointer_reenter"}
        ]"#;
        let mut signals = SignalAdapter::parse_array(json).unwrap();
        SignalAdapter::sort_by_timestamp(&mut signals);
        assert_eq!(signals[0].kind, SignalKind::PointerTopExit);
        assert_eq!(signals[1].kind, SignalKind::PointerReenter);
        assert_eq!(signals[2].kind, SignalKind::Tick);
    }
}
