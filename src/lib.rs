//! Synheart Engage - On-device engagement tracking for single-page applications
//!
//! Engage turns raw page-view interaction signals (scroll, click, focus,
//! pointer exits, route changes) into deduplicated, threshold-gated
//! conversion events and arbitrates a fire-once exit-intent offer.
//!
//! ## Modules
//!
//! - **Engagement**: scroll/time aggregation and threshold milestones
//! - **Classifier**: click target → semantic event
//! - **Exit intent**: `Idle → Armed → Triggered → {Dismissed | Converted}`
//! - **Dispatcher**: failure-isolated sinks plus a bounded event log
//! - **Lifecycle**: [`PageTracker`], the host-driven owner of all of the above

pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod engagement;
pub mod error;
pub mod exit_intent;
pub mod lifecycle;
pub mod offer;
pub mod replay;
pub mod schema;
pub mod sinks;
pub mod subscription;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::EngageConfig;
pub use dispatcher::{DispatchReport, EventDispatcher, EventLog, Sink};
pub use error::{EngageError, SinkError};
pub use lifecycle::{PageTracker, SignalCapabilities, TrackerBuilder};
pub use offer::{OfferSubmission, OfferSubmitter};
pub use replay::{replay_ndjson, replay_session};
pub use sinks::{MemorySink, NdjsonSink, TracingSink};
pub use types::{ClickTarget, ConversionEvent, EventType, ExitIntentState, ExitTrigger};

// Schema exports
pub use schema::{Signal, SignalAdapter, SignalKind, SCHEMA_VERSION};

/// Engage version reported by the CLI and FFI
pub const ENGAGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported in diagnostics
pub const PRODUCER_NAME: &str = "synheart-engage";
