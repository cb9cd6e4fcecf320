//! engage.signal.v1 schema definition
//!
//! One record per interaction signal delivered by the UI layer. Records are
//! flat JSON objects tagged by `signal`:
//!
//! ```json
//! {"schema_version":"engage.signal.v1","timestamp":"2024-01-15T14:00:01Z","signal":"scroll","percent":42.0,"offset":1830.0}
//! ```

use crate::types::ClickTarget;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version
pub const SCHEMA_VERSION: &str = "engage.signal.v1";

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

/// Listener channels a host can offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalChannel {
    Scroll,
    Click,
    FocusIn,
    PointerExit,
    BeforeUnload,
    RouteChange,
    OfferUi,
}

impl SignalChannel {
    pub const ALL: [SignalChannel; 7] = [
        SignalChannel::Scroll,
        SignalChannel::Click,
        SignalChannel::FocusIn,
        SignalChannel::PointerExit,
        SignalChannel::BeforeUnload,
        SignalChannel::RouteChange,
        SignalChannel::OfferUi,
    ];
}

/// Signal payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum SignalKind {
    /// Scroll position update
    Scroll {
        /// Document scroll position, 0-100
        percent: f64,
        /// Raw vertical offset, used by the reverse-scroll exit trigger
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offset: Option<f64>,
    },
    /// Click on an element
    Click { target: ClickTarget },
    /// Focus entered a form
    FocusIn { form_id: String },
    /// Pointer left the viewport through the top edge
    PointerTopExit,
    /// Pointer came back into the viewport
    PointerReenter,
    /// Page is about to unload
    BeforeUnload,
    /// Client-side navigation to a new route
    RouteChange { route: String },
    /// User closed the exit-intent offer
    OfferDismissed,
    /// No interaction; only advances the clock
    Tick,
}

impl SignalKind {
    /// Channel this signal arrives on; `None` for clock-only ticks
    pub fn channel(&self) -> Option<SignalChannel> {
        match self {
            SignalKind::Scroll { .. } => Some(SignalChannel::Scroll),
            SignalKind::Click { .. } => Some(SignalChannel::Click),
            SignalKind::FocusIn { .. } => Some(SignalChannel::FocusIn),
            SignalKind::PointerTopExit | SignalKind::PointerReenter => {
                Some(SignalChannel::PointerExit)
            }
            SignalKind::BeforeUnload => Some(SignalChannel::BeforeUnload),
            SignalKind::RouteChange { .. } => Some(SignalChannel::RouteChange),
            SignalKind::OfferDismissed => Some(SignalChannel::OfferUi),
            SignalKind::Tick => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SignalKind::Scroll { .. } => "scroll",
            SignalKind::Click { .. } => "click",
            SignalKind::FocusIn { .. } => "focus_in",
            SignalKind::PointerTopExit => "pointer_top_exit",
            SignalKind::PointerReenter => "pointer_reenter",
            SignalKind::BeforeUnload => "before_unload",
            SignalKind::RouteChange { .. } => "route_change",
            SignalKind::OfferDismissed => "offer_dismissed",
            SignalKind::Tick => "tick",
        }
    }

    /// Whether the signal reflects user activity
    pub fn is_user_activity(&self) -> bool {
        matches!(
            self,
            SignalKind::Scroll { .. } | SignalKind::Click { .. } | SignalKind::FocusIn { .. }
        )
    }
}

/// A timestamped interaction signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: SignalKind,
}

impl Signal {
    pub fn new(timestamp: DateTime<Utc>, kind: SignalKind) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp,
            kind,
        }
    }

    /// Check the record against the schema
    pub fn validate(&self) -> Result<(), SignalValidationError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(SignalValidationError::InvalidSchemaVersion {
                expected: SCHEMA_VERSION.to_string(),
                actual: self.schema_version.clone(),
            });
        }

        match &self.kind {
            SignalKind::Scroll { percent, offset } => {
                if !percent.is_finite() {
                    return Err(SignalValidationError::NonFiniteValue("percent"));
                }
                if offset.is_some_and(|o| !o.is_finite()) {
                    return Err(SignalValidationError::NonFiniteValue("offset"));
                }
                Ok(())
            }
            SignalKind::FocusIn { form_id } if form_id.trim().is_empty() => {
                Err(SignalValidationError::EmptyField("form_id"))
            }
            SignalKind::RouteChange { route } if route.trim().is_empty() => {
                Err(SignalValidationError::EmptyField("route"))
            }
            _ => Ok(()),
        }
    }
}

/// Validation errors for signal records
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SignalValidationError {
    #[error("Invalid schema version: expected {expected}, got {actual}")]
    InvalidSchemaVersion { expected: String, actual: String },

    #[error("Field {0} must be a finite number")]
    NonFiniteValue(&'static str),

    #[error("Field {0} must not be empty")]
    EmptyField(&'static str),
}
