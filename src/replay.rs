//! One-shot replay of a recorded signal stream
//!
//! Feeds a complete session through a fresh [`PageTracker`] and returns every
//! event it dispatched. Useful for offline analysis, fixtures and the CLI.

use crate::config::EngageConfig;
use crate::error::EngageError;
use crate::lifecycle::{PageTracker, SignalCapabilities};
use crate::schema::{Signal, SignalAdapter};
use crate::sinks::MemorySink;
use crate::types::ConversionEvent;
use tracing::debug;

/// Replay `signals` for a page view that starts on `route`.
///
/// Signals are validated, then sorted by timestamp (stable). The tracker is
/// activated at the first signal and torn down at the last one, so the result
/// always starts with `page_view` and ends with `page_exit`.
pub fn replay_session(
    mut signals: Vec<Signal>,
    route: &str,
    config: EngageConfig,
) -> Result<Vec<ConversionEvent>, EngageError> {
    replay_with_capabilities(&mut signals, route, config, SignalCapabilities::all())
}

/// Like [`replay_session`] with an explicit capability table
pub fn replay_with_capabilities(
    signals: &mut [Signal],
    route: &str,
    config: EngageConfig,
    capabilities: SignalCapabilities,
) -> Result<Vec<ConversionEvent>, EngageError> {
    if let Some((index, error)) = SignalAdapter::validate_signals(signals).into_iter().next() {
        return Err(EngageError::InvalidSignal(format!("signal {}: {}", index + 1, error)));
    }
    SignalAdapter::sort_by_timestamp(signals);

    let (first, last) = match (signals.first(), signals.last()) {
        (Some(first), Some(last)) => (first.timestamp, last.timestamp),
        _ => return Err(EngageError::NoSignals),
    };

    let sink = MemorySink::new("replay");
    let mut tracker = PageTracker::builder(route)
        .config(config)
        .capabilities(capabilities)
        .sink(Box::new(sink.clone()))
        .activate(first);

    for signal in signals.iter() {
        tracker.handle(signal);
    }
    tracker.deactivate(last);

    let events = sink.drain();
    debug!(signals = signals.len(), events = events.len(), "replay finished");
    Ok(events)
}

/// Replay an NDJSON signal stream, returning one JSON string per event
pub fn replay_ndjson(
    ndjson: &str,
    route: &str,
    config: EngageConfig,
) -> Result<Vec<String>, EngageError> {
    let signals = SignalAdapter::parse_ndjson(ndjson)?;
    let events = replay_session(signals, route, config)?;
    events_to_json(&events)
}

/// Serialize events, one JSON object per entry
pub fn events_to_json(events: &[ConversionEvent]) -> Result<Vec<String>, EngageError> {
    events
        .iter()
        .map(|e| serde_json::to_string(e).map_err(|e| EngageError::EncodingError(e.to_string())))
        .collect()
}
