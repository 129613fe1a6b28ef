//! Responses to client commands.
//!
//! A processor stages at most one response per command. It is sent after
//! the command's transaction committed, as the default side effect.

use sluice_types::{Key, PartitionId, RecordMetadata, RecordValue, RequestMetadata};
use tokio::sync::mpsc::{self, error::TrySendError};

/// The answer to one client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingResponse {
    pub partition_id: PartitionId,
    pub request: RequestMetadata,
    pub key: Key,
    pub metadata: RecordMetadata,
    pub value: RecordValue,
}

/// Transport towards the client that sent a command.
pub trait CommandResponseWriter: Send {
    /// Hands the response to the transport.
    ///
    /// Returns false if the transport cannot take it right now; the stream
    /// processor retries until it succeeds or the partition closes.
    fn try_write_response(&mut self, response: &ProcessingResponse) -> bool;
}

/// Discards every response.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResponseWriter;

impl CommandResponseWriter for NoopResponseWriter {
    fn try_write_response(&mut self, _response: &ProcessingResponse) -> bool {
        true
    }
}

/// Forwards responses into a bounded channel.
///
/// A full channel is backpressure (retry later). A closed channel means
/// nobody is waiting for responses anymore and they are dropped.
#[derive(Debug, Clone)]
pub struct ChannelResponseWriter {
    sender: mpsc::Sender<ProcessingResponse>,
}

impl ChannelResponseWriter {
    pub fn new(sender: mpsc::Sender<ProcessingResponse>) -> Self {
        Self { sender }
    }

    /// Creates a writer and the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProcessingResponse>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self::new(sender), receiver)
    }
}

impl CommandResponseWriter for ChannelResponseWriter {
    fn try_write_response(&mut self, response: &ProcessingResponse) -> bool {
        match self.sender.try_send(response.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(
                    request_id = response.request.request_id,
                    "response receiver closed, dropping response"
                );
                true
            }
        }
    }
}
