//! Browser dedicated-worker hosting.
//!
//! The worker script loads this module and calls `startJournalWorker()`.
//! Each request arrives as a `postMessage` whose first transferred port is
//! the reply channel. Requests sent without a port are answered on the
//! worker scope itself.

use super::Router;
use crate::storage::{IndexedDbGateway, JournalGateway};
use crate::transport::{to_js, Endpoint, TransportError, WebEndpoint, WorkerLink};
use serde_json::Value;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{DedicatedWorkerGlobalScope, MessageEvent, MessagePort, Worker, WorkerOptions, WorkerType};

/// Entry point for the worker script.
#[wasm_bindgen(js_name = startJournalWorker)]
pub fn start_journal_worker() -> Result<(), JsValue> {
    crate::logging::init();
    serve(Router::new(IndexedDbGateway::default()))
}

/// Installs `router` as the message handler of the current worker scope.
pub fn serve<G: JournalGateway + 'static>(router: Router<G>) -> Result<(), JsValue> {
    let scope: DedicatedWorkerGlobalScope = js_sys::global()
        .dyn_into()
        .map_err(|_| JsValue::from_str("not running in a dedicated worker"))?;
    let router = Rc::new(router);
    let reply_scope = scope.clone();

    let onmessage = Closure::wrap(Box::new(move |event: MessageEvent| {
        let message = match serde_wasm_bindgen::from_value::<Value>(event.data()) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("Ignoring undecodable message: {}", e);
                return;
            }
        };
        let port = event.ports().get(0).dyn_into::<MessagePort>().ok();
        let router = Rc::clone(&router);
        let scope = reply_scope.clone();

        wasm_bindgen_futures::spawn_local(async move {
            match port {
                Some(port) => {
                    router
                        .handle(message, Endpoint::Native(WebEndpoint::new(port)))
                        .await
                }
                None => {
                    let Some(response) = router.dispatch(message).await else {
                        return;
                    };
                    let posted = serde_json::to_value(&response)
                        .map_err(|e| TransportError::Encoding(e.to_string()))
                        .and_then(|value| to_js(&value))
                        .and_then(|js| {
                            scope
                                .post_message(&js)
                                .map_err(|e| TransportError::PostFailed(format!("{:?}", e)))
                        });
                    if let Err(e) = posted {
                        log::warn!("Could not deliver {}: {}", response.kind, e);
                    }
                }
            }
        });
    }) as Box<dyn FnMut(MessageEvent)>);

    scope.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    // The handler lives as long as the worker.
    onmessage.forget();

    log::info!("Journal worker ready");
    Ok(())
}

/// Page-side handle on a dedicated worker running [`serve`].
#[derive(Clone)]
pub struct WebWorkerLink {
    worker: Worker,
}

impl WebWorkerLink {
    pub fn new(worker: Worker) -> Self {
        Self { worker }
    }

    /// Starts a module worker from `script_url`.
    pub fn spawn(script_url: &str) -> Result<Self, TransportError> {
        let options = WorkerOptions::new();
        options.set_type(WorkerType::Module);
        let worker = Worker::new_with_options(script_url, &options)
            .map_err(|e| TransportError::PostFailed(format!("{:?}", e)))?;
        Ok(Self::new(worker))
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }
}

impl WorkerLink for WebWorkerLink {
    fn dispatch(&self, request: Value, reply: Endpoint) -> Result<(), TransportError> {
        let port = transferable_port(reply)?;
        self.worker
            .post_message_with_transfer(&to_js(&request)?, &js_sys::Array::of1(&port))
            .map_err(|e| TransportError::PostFailed(format!("{:?}", e)))
    }
}

/// Only host ports can cross into another global.
fn transferable_port(reply: Endpoint) -> Result<MessagePort, TransportError> {
    match reply {
        Endpoint::Native(endpoint) => Ok(endpoint.into_port()),
        Endpoint::Local(_) => Err(TransportError::Incompatible("in-process endpoint")),
    }
}
