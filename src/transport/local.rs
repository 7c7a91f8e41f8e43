//! In-process channel endpoints.

use super::TransportError;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use serde_json::Value;

/// Endpoint of an in-process channel.
///
/// Messages are queued on post and handed out by `recv`, never delivered
/// from inside `post_message` itself.
pub struct LocalEndpoint {
    outbox: UnboundedSender<Value>,
    inbox: UnboundedReceiver<Value>,
}

impl LocalEndpoint {
    /// Creates two linked endpoints.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = unbounded();
        let (b_tx, b_rx) = unbounded();
        (
            Self {
                outbox: a_tx,
                inbox: b_rx,
            },
            Self {
                outbox: b_tx,
                inbox: a_rx,
            },
        )
    }

    pub fn post_message(&self, message: &Value) -> Result<(), TransportError> {
        self.outbox
            .unbounded_send(message.clone())
            .map_err(|_| TransportError::Closed)
    }

    pub async fn recv(&mut self) -> Option<Value> {
        self.inbox.next().await
    }
}
