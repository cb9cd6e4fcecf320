//! Built-in sinks

use crate::dispatcher::Sink;
use crate::error::SinkError;
use crate::types::ConversionEvent;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use tracing::info;

/// In-memory sink; clones share the same buffer
#[derive(Debug, Clone)]
pub struct MemorySink {
    id: String,
    events: Arc<Mutex<Vec<ConversionEvent>>>,
}

impl MemorySink {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Copy of everything recorded so far
    pub fn events(&self) -> Vec<ConversionEvent> {
        self.events.lock().clone()
    }

    /// Take everything recorded so far, leaving the buffer empty
    pub fn drain(&self) -> Vec<ConversionEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl Sink for MemorySink {
    fn id(&self) -> &str {
        &self.id
    }

    fn record(&self, event: &ConversionEvent) -> Result<(), SinkError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Forwards events to `tracing` at info level
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl Sink for TracingSink {
    fn id(&self) -> &str {
        "tracing"
    }

    fn record(&self, event: &ConversionEvent) -> Result<(), SinkError> {
        info!(
            target: "synheart_engage::events",
            event_type = %event.event_type(),
            label = event.label(),
            value = ?event.value(),
            route = event.route(),
            session_id = event.session_id(),
            "conversion event"
        );
        Ok(())
    }
}

/// Writes one JSON object per line
pub struct NdjsonSink<W: Write + Send> {
    id: String,
    writer: Mutex<W>,
    flush: bool,
}

impl<W: Write + Send> NdjsonSink<W> {
    pub fn new(id: impl Into<String>, writer: W) -> Self {
        Self {
            id: id.into(),
            writer: Mutex::new(writer),
            flush: false,
        }
    }

    /// Flush the writer after every event
    pub fn flushing(mut self, flush: bool) -> Self {
        self.flush = flush;
        self
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> Sink for NdjsonSink<W> {
    fn id(&self) -> &str {
        &self.id
    }

    fn record(&self, event: &ConversionEvent) -> Result<(), SinkError> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, event)?;
        writer.write_all(b"\n")?;
        if self.flush {
            writer.flush()?;
        }
        Ok(())
    }
}
