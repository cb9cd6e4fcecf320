//! Core engagement data types
//!
//! This module defines the page-view session state, the click target descriptor
//! supplied by the UI layer, the exit-intent states and the immutable
//! conversion events that flow out to sinks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Semantic event types emitted by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PageView,
    ScrollDepth,
    TimeOnPage,
    FileDownload,
    ContactClick,
    ExternalLinkClick,
    ButtonClick,
    FormStart,
    FormSubmit,
    ExitIntentShown,
    ExitIntentDismissed,
    ExitIntentConverted,
    PageExit,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PageView => "page_view",
            EventType::ScrollDepth => "scroll_depth",
            EventType::TimeOnPage => "time_on_page",
            EventType::FileDownload => "file_download",
            EventType::ContactClick => "contact_click",
            EventType::ExternalLinkClick => "external_link_click",
            EventType::ButtonClick => "button_click",
            EventType::FormStart => "form_start",
            EventType::FormSubmit => "form_submit",
            EventType::ExitIntentShown => "exit_intent_shown",
            EventType::ExitIntentDismissed => "exit_intent_dismissed",
            EventType::ExitIntentConverted => "exit_intent_converted",
            EventType::PageExit => "page_exit",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contact channel of a `contact_click`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactKind {
    Email,
    Phone,
}

impl ContactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactKind::Email => "email",
            ContactKind::Phone => "phone",
        }
    }
}

/// Descriptor of a clicked element, as reported by the UI layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickTarget {
    /// Link target, if the element (or its closest anchor) has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    /// Value of the `download` attribute; `Some("")` when present without a value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<String>,
    /// Lower- or upper-case tag name (`a`, `button`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_name: Option<String>,
    /// Explicit ARIA role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Visible text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ClickTarget {
    /// An anchor element pointing at `href`
    pub fn link(href: impl Into<String>) -> Self {
        Self {
            href: Some(href.into()),
            tag_name: Some("a".to_string()),
            ..Self::default()
        }
    }

    /// A `<button>` element with visible text
    pub fn button(text: impl Into<String>) -> Self {
        Self {
            tag_name: Some("button".to_string()),
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_download(mut self, filename: impl Into<String>) -> Self {
        self.download = Some(filename.into());
        self
    }
}

/// Exit-intent arbiter states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitIntentState {
    Idle,
    Armed,
    Triggered,
    Dismissed,
    Converted,
}

impl ExitIntentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitIntentState::Idle => "idle",
            ExitIntentState::Armed => "armed",
            ExitIntentState::Triggered => "triggered",
            ExitIntentState::Dismissed => "dismissed",
            ExitIntentState::Converted => "converted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExitIntentState::Dismissed | ExitIntentState::Converted)
    }
}

/// The trigger that moved the arbiter into `Triggered`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitTrigger {
    TopEdgeExit,
    ReverseScrollNearTop,
    DwellTimeout,
}

impl ExitTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitTrigger::TopEdgeExit => "top_edge_exit",
            ExitTrigger::ReverseScrollNearTop => "reverse_scroll_near_top",
            ExitTrigger::DwellTimeout => "dwell_timeout",
        }
    }
}

/// Mutable state scoped to one page visit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageViewSession {
    pub(crate) id: String,
    pub(crate) route: String,
    pub(crate) start_time: DateTime<Utc>,
    pub(crate) last_active_time: DateTime<Utc>,
    pub(crate) elapsed_seconds: f64,
    pub(crate) max_scroll_percent: f64,
    pub(crate) fired_scroll_depths: BTreeSet<u32>,
    pub(crate) fired_time_thresholds: BTreeSet<u32>,
}

impl PageViewSession {
    /// Start a fresh session with a random id
    pub fn new(route: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            route: route.into(),
            start_time,
            last_active_time: start_time,
            elapsed_seconds: 0.0,
            max_scroll_percent: 0.0,
            fired_scroll_depths: BTreeSet::new(),
            fired_time_thresholds: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn last_active_time(&self) -> DateTime<Utc> {
        self.last_active_time
    }

    /// Elapsed seconds as of the last evaluator tick
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_seconds
    }

    pub fn max_scroll_percent(&self) -> f64 {
        self.max_scroll_percent
    }

    pub fn fired_scroll_depths(&self) -> &BTreeSet<u32> {
        &self.fired_scroll_depths
    }

    pub fn fired_time_thresholds(&self) -> &BTreeSet<u32> {
        &self.fired_time_thresholds
    }

    /// Seconds between session start and `at`, never negative
    pub fn duration_seconds(&self, at: DateTime<Utc>) -> f64 {
        let ms = (at - self.start_time).num_milliseconds().max(0);
        ms as f64 / 1000.0
    }
}

/// An immutable record of a completed, classified user action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionEvent {
    event_type: EventType,
    label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
    timestamp: DateTime<Utc>,
    session_id: String,
    route: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    payload: Map<String, Value>,
}

impl ConversionEvent {
    /// Build an event scoped to `session`
    pub fn new(
        event_type: EventType,
        label: impl Into<String>,
        session: &PageViewSession,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type,
            label: label.into(),
            value: None,
            timestamp,
            session_id: session.id.clone(),
            route: session.route.clone(),
            payload: Map::new(),
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_payload(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    #[test]
    fn test_event_type_serialization() {
        let json = serde_json::to_string(&EventType::ExternalLinkClick).unwrap();
        assert_eq!(json, "\"external_link_click\"");
        assert_eq!(EventType::ExternalLinkClick.as_str(), "external_link_click");
        assert_eq!(EventType::PageExit.to_string(), "page_exit");
    }

    #[test]
    fn test_terminal_states() {
        assert!(ExitIntentState::Dismissed.is_terminal());
        assert!(ExitIntentState::Converted.is_terminal());
        assert!(!ExitIntentState::Triggered.is_terminal());
        assert!(!ExitIntentState::Armed.is_terminal());
    }

    #[test]
    fn test_event_carries_session_scope() {
        let session = PageViewSession::new("/pricing", start());
        let event = ConversionEvent::new(EventType::ScrollDepth, "25%", &session, start())
            .with_value(25.0)
            .with_payload("depth", 25);

        assert_eq!(event.session_id(), session.id());
        assert_eq!(event.route(), "/pricing");
        assert_eq!(event.value(), Some(25.0));
        assert_eq!(event.payload()["depth"], 25);
    }

    #[test]
    fn test_event_json_shape() {
        let session = PageViewSession::new("/", start());
        let event = ConversionEvent::new(EventType::ButtonClick, "Sign up", &session, start());
        let json: Value = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event_type"], "button_click");
        assert_eq!(json["label"], "Sign up");
        assert!(json.get("value").is_none());
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn test_click_target_deserialization() {
        let json = r#"{"href": "/files/report.pdf", "role": "button", "text": "Get report"}"#;
        let target: ClickTarget = serde_json::from_str(json).unwrap();
        assert_eq!(target.href.as_deref(), Some("/files/report.pdf"));
        assert_eq!(target.role.as_deref(), Some("button"));
        assert!(target.download.is_none());
    }

    #[test]
    fn test_duration_never_negative() {
        let session = PageViewSession::new("/", start());
        let before = start() - chrono::Duration::seconds(5);
        assert_eq!(session.duration_seconds(before), 0.0);
        let after = start() + chrono::Duration::milliseconds(2500);
        assert!((session.duration_seconds(after) - 2.5).abs() < 1e-9);
    }
}
