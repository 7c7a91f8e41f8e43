//! Two-endpoint message channels between the page and the worker.
//!
//! The client opens one channel per request: it keeps one endpoint to wait
//! for the reply and hands the other to the worker together with the
//! request. Correlation therefore needs no request ids.
//!
//! Two strategies satisfy the same contract:
//! - `Native`: the host's `MessageChannel` (WASM only).
//! - `Polyfill`: an in-process channel with deferred delivery.
//!
//! In both, a posted message is queued and only observed by the peer's next
//! `recv`, and messages from one endpoint arrive in the order they were sent.

mod local;
#[cfg(target_arch = "wasm32")]
mod web;

pub use local::LocalEndpoint;
#[cfg(target_arch = "wasm32")]
pub(crate) use web::to_js;
#[cfg(target_arch = "wasm32")]
pub use web::WebEndpoint;

use serde_json::Value;

/// Errors raised by channel endpoints.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The peer endpoint (or the worker) is gone.
    #[error("channel closed")]
    Closed,
    /// The requested channel strategy is not available on this host.
    #[error("{0} is not available on this host")]
    Unavailable(&'static str),
    /// An endpoint was handed to a link that cannot carry it.
    #[error("endpoint cannot be sent over this link: {0}")]
    Incompatible(&'static str),
    #[error("message could not be encoded: {0}")]
    Encoding(String),
    #[error("failed to post message: {0}")]
    PostFailed(String),
}

/// Channel strategy, selected once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelTransport {
    /// Host `MessageChannel`.
    Native,
    /// In-process emulation.
    Polyfill,
}

impl ChannelTransport {
    /// Picks `Native` when the host global exposes `MessageChannel`.
    pub fn detect() -> Self {
        #[cfg(target_arch = "wasm32")]
        {
            let has_channel = js_sys::Reflect::has(
                &js_sys::global(),
                &wasm_bindgen::JsValue::from_str("MessageChannel"),
            )
            .unwrap_or(false);
            if has_channel {
                return Self::Native;
            }
        }

        Self::Polyfill
    }

    /// Forces the in-process strategy.
    pub fn polyfill() -> Self {
        Self::Polyfill
    }

    /// Creates a linked pair of endpoints.
    pub fn create(&self) -> Result<(Endpoint, Endpoint), TransportError> {
        match self {
            Self::Polyfill => {
                let (a, b) = LocalEndpoint::pair();
                Ok((Endpoint::Local(a), Endpoint::Local(b)))
            }
            #[cfg(target_arch = "wasm32")]
            Self::Native => {
                let channel = web_sys::MessageChannel::new()
                    .map_err(|_| TransportError::Unavailable("MessageChannel"))?;
                Ok((
                    Endpoint::Native(WebEndpoint::new(channel.port1())),
                    Endpoint::Native(WebEndpoint::new(channel.port2())),
                ))
            }
            #[cfg(not(target_arch = "wasm32"))]
            Self::Native => Err(TransportError::Unavailable("MessageChannel")),
        }
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::detect()
    }
}

/// One side of a channel.
pub enum Endpoint {
    Local(LocalEndpoint),
    #[cfg(target_arch = "wasm32")]
    Native(WebEndpoint),
}

impl Endpoint {
    /// Queues a message for the peer.
    pub fn post_message(&self, message: &Value) -> Result<(), TransportError> {
        match self {
            Endpoint::Local(endpoint) => endpoint.post_message(message),
            #[cfg(target_arch = "wasm32")]
            Endpoint::Native(endpoint) => endpoint.post_message(message),
        }
    }

    /// Waits for the next message from the peer.
    ///
    /// Returns `None` once the peer can no longer send.
    pub async fn recv(&mut self) -> Option<Value> {
        match self {
            Endpoint::Local(endpoint) => endpoint.recv().await,
            #[cfg(target_arch = "wasm32")]
            Endpoint::Native(endpoint) => endpoint.recv().await,
        }
    }
}

/// The page's handle on a worker.
///
/// `dispatch` delivers one request plus the endpoint the reply must be
/// posted on.
pub trait WorkerLink {
    fn dispatch(&self, request: Value, reply: Endpoint) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_detect_native_host_uses_polyfill() {
        assert_eq!(ChannelTransport::detect(), ChannelTransport::Polyfill);
        assert!(matches!(
            ChannelTransport::Native.create(),
            Err(TransportError::Unavailable(_))
        ));
    }

    #[test]
    fn test_polyfill_pair_is_full_duplex() {
        pollster::block_on(async {
            let (mut a, mut b) = ChannelTransport::polyfill().create().unwrap();
            a.post_message(&json!({"n": 1})).unwrap();
            b.post_message(&json!({"n": 2})).unwrap();

            assert_eq!(b.recv().await, Some(json!({"n": 1})));
            assert_eq!(a.recv().await, Some(json!({"n": 2})));
        });
    }
}
