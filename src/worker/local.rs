//! In-process worker host.
//!
//! Stands in for a browser worker when none is available: requests travel
//! through an unbounded queue and are served concurrently by one router.

use super::Router;
use crate::storage::JournalGateway;
use crate::transport::{Endpoint, TransportError, WorkerLink};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use serde_json::Value;

type Delivery = (Value, Endpoint);

/// Page-side handle on a [`LocalWorker`].
#[derive(Clone)]
pub struct LocalWorkerLink {
    sender: UnboundedSender<Delivery>,
}

impl WorkerLink for LocalWorkerLink {
    fn dispatch(&self, request: Value, reply: Endpoint) -> Result<(), TransportError> {
        self.sender
            .unbounded_send((request, reply))
            .map_err(|_| TransportError::Closed)
    }
}

/// A router plus its inbox. Nothing is served until [`LocalWorker::run`] is
/// polled.
pub struct LocalWorker<G> {
    router: Router<G>,
    inbox: UnboundedReceiver<Delivery>,
}

impl<G: JournalGateway> LocalWorker<G> {
    pub fn new(router: Router<G>) -> (Self, LocalWorkerLink) {
        let (sender, inbox) = unbounded();
        (Self { router, inbox }, LocalWorkerLink { sender })
    }

    /// Serves requests until every link has been dropped.
    pub async fn run(self) {
        let Self { router, inbox } = self;
        let router = &router;

        inbox
            .for_each_concurrent(None, |(message, reply)| router.handle(message, reply))
            .await;

        log::debug!("Local worker stopped: all links dropped");
    }
}

#[cfg(target_arch = "wasm32")]
impl<G: JournalGateway + 'static> LocalWorker<G> {
    /// Runs a router on the current event loop and returns a link to it.
    pub fn spawn(router: Router<G>) -> LocalWorkerLink {
        let (worker, link) = Self::new(router);
        wasm_bindgen_futures::spawn_local(worker.run());
        link
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryGateway, StorageConfig};
    use crate::transport::ChannelTransport;
    use futures_util::future::join;
    use serde_json::json;

    #[test]
    fn test_round_trip_through_queue() {
        let router = Router::new(MemoryGateway::new(StorageConfig::new("local-worker")));
        let (worker, link) = LocalWorker::new(router);

        pollster::block_on(join(worker.run(), async move {
            let (mut ours, theirs) = ChannelTransport::polyfill().create().unwrap();
            link.dispatch(
                json!({"type": "set-weekly-review", "payload": {"week_of": "2024-01-08"}}),
                theirs,
            )
            .unwrap();
            let reply = ours.recv().await.unwrap();
            assert_eq!(reply, json!({"type": "set-weekly-review:response", "success": true}));

            let (mut ours, theirs) = ChannelTransport::polyfill().create().unwrap();
            link.dispatch(json!({"type": "get-weekly-review", "payload": "2024-01-08"}), theirs)
                .unwrap();
            let reply = ours.recv().await.unwrap();
            assert_eq!(reply["items"][0]["week_of"], "2024-01-08");
        }));
    }

    #[test]
    fn test_dispatch_after_worker_gone_fails() {
        let router = Router::new(MemoryGateway::default());
        let (worker, link) = LocalWorker::new(router);
        drop(worker);

        let (_ours, theirs) = ChannelTransport::polyfill().create().unwrap();
        assert_eq!(
            link.dispatch(json!({"type": "get-morning-checkins"}), theirs),
            Err(TransportError::Closed)
        );
    }
}
