//! Realtime message transport.

use async_trait::async_trait;
use derive_more::Display;
use futures::stream::LocalBoxStream;
use serde_json::Value;

/// Errors of an [`RpcTransport`].
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum TransportError {
    /// Transport is not connected.
    #[display(fmt = "transport is closed")]
    Closed,

    /// Acknowledgement was not received in time.
    #[display(fmt = "acknowledgement timed out")]
    Timeout,

    /// Any other transport failure.
    #[display(fmt = "transport failure: {}", _0)]
    Other(String),
}

/// Socket.IO-like transport of named events with JSON payloads.
///
/// The transport owns reconnection and acknowledgement timeouts, so neither
/// is done on top of it.
#[async_trait(?Send)]
pub trait RpcTransport {
    /// Emits a fire-and-forget event.
    fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError>;

    /// Emits an event and resolves with the acknowledgement of the server.
    async fn emit_with_ack(
        &self,
        event: &str,
        payload: Value,
    ) -> Result<Value, TransportError>;

    /// Returns a stream of inbound `(event name, payload)` messages in
    /// arrival order.
    fn on_message(&self) -> LocalBoxStream<'static, (String, Value)>;
}
