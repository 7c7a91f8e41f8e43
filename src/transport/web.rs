//! `MessagePort`-backed endpoints.

use super::TransportError;
use futures_channel::mpsc::{unbounded, UnboundedReceiver};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{MessageEvent, MessagePort};

/// Endpoint wrapping one port of a host `MessageChannel`.
pub struct WebEndpoint {
    port: MessagePort,
    inbox: UnboundedReceiver<Value>,
    _onmessage: Closure<dyn FnMut(MessageEvent)>,
}

impl WebEndpoint {
    /// Wraps a port. Assigning the handler also starts the port.
    pub fn new(port: MessagePort) -> Self {
        let (tx, inbox) = unbounded::<Value>();

        let onmessage = Closure::wrap(Box::new(move |event: MessageEvent| {
            match serde_wasm_bindgen::from_value::<Value>(event.data()) {
                Ok(value) => {
                    let _ = tx.unbounded_send(value);
                }
                Err(e) => log::warn!("Dropping undecodable port message: {}", e),
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        port.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));

        Self {
            port,
            inbox,
            _onmessage: onmessage,
        }
    }

    pub fn post_message(&self, message: &Value) -> Result<(), TransportError> {
        let js = to_js(message)?;
        self.port
            .post_message(&js)
            .map_err(|e| TransportError::PostFailed(format!("{:?}", e)))
    }

    pub async fn recv(&mut self) -> Option<Value> {
        self.inbox.next().await
    }

    /// Releases the raw port, e.g. to transfer it to a worker.
    pub fn into_port(self) -> MessagePort {
        self.port.clone()
    }
}

impl Drop for WebEndpoint {
    fn drop(&mut self) {
        self.port.set_onmessage(None);
    }
}

/// Encodes a JSON value as plain JS objects and arrays.
pub(crate) fn to_js(message: &Value) -> Result<JsValue, TransportError> {
    message
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| TransportError::Encoding(e.to_string()))
}
