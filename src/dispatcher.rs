//! Event dispatcher and bounded event log
//!
//! The dispatcher fans every finished event out to the registered sinks and
//! appends it to a bounded local log. Sinks are isolated from each other: an
//! error or panic in one is logged and counted, never propagated.

use crate::config::DEFAULT_LOG_CAPACITY;
use crate::error::SinkError;
use crate::types::ConversionEvent;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use tracing::warn;

/// Consumer of finished events (analytics backend, pixel, local store...)
///
/// `record` is called synchronously on the tracker's thread. Implementations
/// that talk to the network must hand the event off and return; enforcing a
/// timeout on slow backends is the sink's job.
pub trait Sink: Send + Sync {
    /// Stable identifier used in logs
    fn id(&self) -> &str;

    fn record(&self, event: &ConversionEvent) -> Result<(), SinkError>;
}

/// Append-only log capped at `capacity` entries; overflow evicts the oldest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    entries: VecDeque<ConversionEvent>,
    capacity: usize,
    evicted: u64,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            // Grows on demand past the default
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
            capacity,
            evicted: 0,
        }
    }

    /// Append an event, returning the evicted entry if the log was full
    pub fn push(&mut self, event: ConversionEvent) -> Option<ConversionEvent> {
        self.entries.push_back(event);
        if self.entries.len() > self.capacity {
            self.evicted += 1;
            self.entries.pop_front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total entries evicted since creation
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &ConversionEvent> {
        self.entries.iter()
    }

    /// Entries belonging to one page-view session
    pub fn for_session<'a>(
        &'a self,
        session_id: &'a str,
    ) -> impl Iterator<Item = &'a ConversionEvent> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.session_id() == session_id)
    }

    /// Load a log from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut log: Self = serde_json::from_str(json)?;
        log.capacity = log.capacity.max(1);
        while log.entries.len() > log.capacity {
            log.entries.pop_front();
            log.evicted += 1;
        }
        Ok(log)
    }

    /// Serialize the log to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Delivery outcome for one dispatched event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Fan-out to sinks plus the bounded log
pub struct EventDispatcher {
    sinks: Vec<Box<dyn Sink>>,
    log: EventLog,
    dispatched: u64,
    sink_failures: u64,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl EventDispatcher {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            sinks: Vec::new(),
            log: EventLog::new(log_capacity),
            dispatched: 0,
            sink_failures: 0,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn Sink>) -> Self {
        self.register(sink);
        self
    }

    pub fn register(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
    }

    /// Replace the log, e.g. with one restored from JSON
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    /// Deliver `event` to every sink, then append it to the log
    pub fn dispatch(&mut self, event: ConversionEvent) -> DispatchReport {
        let mut report = DispatchReport::default();

        for sink in &self.sinks {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| sink.record(&event)))
                .unwrap_or_else(|payload| Err(SinkError::Panicked(panic_message(payload.as_ref()))));

            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        sink = sink.id(),
                        event_type = %event.event_type(),
                        error = %e,
                        "Sink failed to record event"
                    );
                }
            }
        }

        self.dispatched += 1;
        self.sink_failures += report.failed as u64;
        self.log.push(event);
        report
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn sink_ids(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.id()).collect()
    }

    /// Events dispatched since creation
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Individual sink failures since creation
    pub fn sink_failures(&self) -> u64 {
        self.sink_failures
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("sinks", &self.sink_ids())
            .field("log_len", &self.log.len())
            .field("dispatched", &self.dispatched)
            .field("sink_failures", &self.sink_failures)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::MemorySink;
    use crate::types::{EventType, PageViewSession};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    struct FailingSink;

    impl Sink for FailingSink {
        fn id(&self) -> &str {
            "failing"
        }

        fn record(&self, _event: &ConversionEvent) -> Result<(), SinkError> {
            Err(SinkError::Rejected("backend unavailable".to_string()))
        }
    }

    struct PanickingSink;

    impl Sink for PanickingSink {
        fn id(&self) -> &str {
            "panicking"
        }

        fn record(&self, _event: &ConversionEvent) -> Result<(), SinkError> {
            panic!("sink bug");
        }
    }

    fn event(label: &str) -> ConversionEvent {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        let session = PageViewSession::new("/", start);
        ConversionEvent::new(EventType::ButtonClick, label, &session, start)
    }

    #[test]
    fn test_failing_sink_is_isolated() {
        let sink_b = MemorySink::new("b");
        let mut dispatcher = EventDispatcher::new(50)
            .with_sink(Box::new(FailingSink))
            .with_sink(Box::new(sink_b.clone()));

        let report = dispatcher.dispatch(event("Buy"));

        assert_eq!(report, DispatchReport { delivered: 1, failed: 1 });
        assert_eq!(sink_b.len(), 1);
        assert_eq!(dispatcher.log().len(), 1);
        assert_eq!(dispatcher.sink_failures(), 1);
    }

    #[test]
    fn test_panicking_sink_is_isolated() {
        let sink = MemorySink::new("after");
        let mut dispatcher = EventDispatcher::new(50)
            .with_sink(Box::new(PanickingSink))
            .with_sink(Box::new(sink.clone()));

        let report = dispatcher.dispatch(event("Buy"));
        assert_eq!(report.failed, 1);
        assert_eq!(sink.len(), 1);
        assert_eq!(dispatcher.log().len(), 1);
    }

    #[test]
    fn test_log_without_sinks() {
        let mut dispatcher = EventDispatcher::default();
        let report = dispatcher.dispatch(event("x"));
        assert_eq!(report, DispatchReport::default());
        assert_eq!(dispatcher.log().len(), 1);
        assert_eq!(dispatcher.dispatched(), 1);
    }

    #[test]
    fn test_log_evicts_oldest() {
        let mut log = EventLog::new(50);
        for i in 0..55 {
            let evicted = log.push(event(&i.to_string()));
            if i < 50 {
                assert!(evicted.is_none());
            } else {
                assert_eq!(evicted.unwrap().label(), (i - 50).to_string());
            }
        }
        assert_eq!(log.len(), 50);
        assert_eq!(log.evicted(), 5);
        assert_eq!(log.iter().next().unwrap().label(), "5");
        assert_eq!(log.iter().last().unwrap().label(), "54");
    }

    #[test]
    fn test_log_json_roundtrip_respects_capacity() {
        let mut log = EventLog::new(3);
        log.push(event("a"));
        log.push(event("b"));
        let json = log.to_json().unwrap();
        let restored = EventLog::from_json(&json).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.capacity(), 3);

        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["capacity"] = serde_json::json!(1);
        let shrunk = EventLog::from_json(&value.to_string()).unwrap();
        assert_eq!(shrunk.len(), 1);
        assert_eq!(shrunk.iter().next().unwrap().label(), "b");
    }

    #[test]
    fn test_huge_capacity_allocates_on_demand() {
        let mut log = EventLog::new(usize::MAX);
        log.push(event("only"));
        assert_eq!(log.capacity(), usize::MAX);
        assert_eq!(log.len(), 1);
        assert_eq!(log.evicted(), 0);
    }

    #[test]
    fn test_restored_log_keeps_evicting() {
        let mut saved = EventLog::new(2);
        saved.push(event("a"));
        saved.push(event("b"));
        let restored = EventLog::from_json(&saved.to_json().unwrap()).unwrap();

        let sink = MemorySink::new("memory");
        let mut dispatcher = EventDispatcher::new(50)
            .with_log(restored)
            .with_sink(Box::new(sink.clone()));
        dispatcher.dispatch(event("c"));

        let labels: Vec<&str> = dispatcher.log().iter().map(|e| e.label()).collect();
        assert_eq!(labels, vec!["b", "c"]);
        assert_eq!(dispatcher.log().evicted(), 1);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_for_session() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        let a = PageViewSession::new("/a", start);
        let b = PageViewSession::new("/b", start);
        let mut log = EventLog::new(10);
        log.push(ConversionEvent::new(EventType::PageView, "/a", &a, start));
        log.push(ConversionEvent::new(EventType::PageView, "/b", &b, start));
        log.push(ConversionEvent::new(EventType::PageExit, "/a", &a, start));

        assert_eq!(log.for_session(a.id()).count(), 2);
        assert_eq!(log.for_session(b.id()).count(), 1);
    }

    proptest! {
        #[test]
        fn prop_log_never_exceeds_capacity(capacity in 1usize..80, pushes in 0usize..200) {
            let mut log = EventLog::new(capacity);
            for i in 0..pushes {
                log.push(event(&i.to_string()));
                prop_assert!(log.len() <= capacity);
            }
            if pushes > 0 {
                let oldest = pushes.saturating_sub(capacity);
                let first = log.iter().next().map(|e| e.label().to_string());
                prop_assert_eq!(first, Some(oldest.to_string()));
            }
        }
    }
}
