//! Signal schema module
//!
//! Provides the `engage.signal.v1` wire format for interaction signals and an
//! adapter that parses and validates signal streams.

pub mod adapter;
pub mod signal;

pub use adapter::SignalAdapter;
pub use signal::{Signal, SignalChannel, SignalKind, SignalValidationError, SCHEMA_VERSION};
