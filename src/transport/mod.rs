//! Server-push transport for per-target metric streams.
//!
//! A [`Transport`] opens one logical connection per target and reports what
//! happens on it as a sequence of [`TransportEvent`]s.

mod http;
mod sse;

pub use http::*;
pub use sse::*;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::sample::TargetId;

/// Buffered events per connection before the producer waits on the consumer.
pub const EVENT_BUFFER: usize = 256;

/// Transport error types.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("stream body error: {0}")]
    Body(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Something that happened on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The server confirmed the stream.
    Open,
    /// A data event carrying one sample payload.
    Data(String),
    /// A transport error; not terminal on its own.
    Error(String),
    /// The connection is gone.
    Closed,
}

/// Receiving end of one connection.
///
/// Dropping it stops the background producer, which closes the physical
/// connection.
pub struct EventStream {
    events: mpsc::Receiver<TransportEvent>,
    producer: Option<JoinHandle<()>>,
}

impl EventStream {
    pub fn new(events: mpsc::Receiver<TransportEvent>, producer: JoinHandle<()>) -> Self {
        Self {
            events,
            producer: Some(producer),
        }
    }

    /// A stream whose producer is owned elsewhere.
    #[cfg(test)]
    pub(crate) fn detached(events: mpsc::Receiver<TransportEvent>) -> Self {
        Self {
            events,
            producer: None,
        }
    }

    /// Next event, or `None` once the producer has gone away.
    pub async fn next(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

/// Opens per-target event streams.
pub trait Transport: Send + Sync + 'static {
    /// Start connecting to the stream of `target_id`.
    ///
    /// Must return immediately; connection progress is reported through the
    /// returned stream. Called from within a tokio runtime.
    fn open(&self, target_id: TargetId) -> EventStream;
}
