//! Worker side of the journal protocol.
//!
//! The [`Router`] owns the gateway (and through it the lazily opened
//! database handle) and turns each inbound envelope into exactly one gateway
//! call and one reply. It keeps no other state between messages.
//!
//! Hosting:
//! - [`LocalWorker`]: in-process, fed through a [`LocalWorkerLink`].
//! - `web`: a browser dedicated worker (WASM only).

mod local;
#[cfg(target_arch = "wasm32")]
pub mod web;

pub use local::{LocalWorker, LocalWorkerLink};

use crate::protocol::{Operation, RequestEnvelope, RequestKind, ResponseEnvelope};
use crate::storage::{JournalGateway, Record, StorageError};
use crate::transport::Endpoint;
use serde_json::Value;

/// Dispatches request envelopes to a [`JournalGateway`].
pub struct Router<G> {
    gateway: G,
}

impl<G: JournalGateway> Router<G> {
    pub fn new(gateway: G) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Handles one inbound message.
    ///
    /// Returns `None` only for messages without a string `type`, which have
    /// no response type to answer with. Unknown types get a failure reply.
    pub async fn dispatch(&self, message: Value) -> Option<ResponseEnvelope> {
        let envelope = match RequestEnvelope::from_value(message) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::debug!("Ignoring message: {}", e);
                return None;
            }
        };

        let kind = match envelope.request_kind() {
            Ok(kind) => kind,
            Err(e) => {
                log::warn!("Rejecting request: {}", e);
                return Some(ResponseEnvelope::failure(&envelope.kind, e));
            }
        };

        Some(self.execute(kind, &envelope).await)
    }

    /// Dispatches `message` and posts the reply, if any, on `reply`.
    pub async fn handle(&self, message: Value, reply: Endpoint) {
        let Some(response) = self.dispatch(message).await else {
            return;
        };

        let posted = serde_json::to_value(&response)
            .map_err(|e| e.to_string())
            .and_then(|value| reply.post_message(&value).map_err(|e| e.to_string()));

        if let Err(e) = posted {
            log::warn!("Could not deliver {}: {}", response.kind, e);
        }
    }

    async fn execute(&self, kind: RequestKind, envelope: &RequestEnvelope) -> ResponseEnvelope {
        let (collection, operation) = kind.route();
        let request_type = kind.as_str();
        log::debug!("{} -> {:?} on {}", request_type, operation, collection);

        let result: Result<Option<Vec<Record>>, StorageError> = match operation {
            Operation::GetAll => self.gateway.read_all(collection).await.map(Some),
            Operation::SetAll => {
                let records = match envelope.records_payload() {
                    Ok(records) => records,
                    Err(e) => return ResponseEnvelope::failure(request_type, e),
                };
                self.gateway
                    .write_all(collection, records)
                    .await
                    .map(|_| None)
            }
            Operation::Add => self
                .gateway
                .add(collection, envelope.record_payload())
                .await
                .map(|id| {
                    log::debug!("Stored {} #{}", collection, id);
                    None
                }),
            Operation::GetByDate => match envelope.date_payload() {
                Some(date) => self
                    .gateway
                    .get_all_by_date(collection, date)
                    .await
                    .map(Some),
                None => Ok(Some(Vec::new())),
            },
        };

        match result {
            Ok(Some(items)) => ResponseEnvelope::items(request_type, items),
            Ok(None) => ResponseEnvelope::ok(request_type),
            Err(e) => {
                log::error!("{} failed: {}", request_type, e);
                ResponseEnvelope::failure(request_type, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Collection, MemoryGateway, StorageConfig};
    use serde_json::json;

    fn router() -> Router<MemoryGateway> {
        Router::new(MemoryGateway::new(StorageConfig::new("router-test")))
    }

    #[test]
    fn test_add_then_get_by_date() {
        pollster::block_on(async {
            let router = router();
            let added = router
                .dispatch(json!({
                    "type": "set-morning-checkin",
                    "payload": {"date": "2024-01-01", "intention": "meditate", "core_value": "focus"}
                }))
                .await
                .unwrap();
            assert_eq!(added, ResponseEnvelope::ok("set-morning-checkin"));

            let found = router
                .dispatch(json!({"type": "get-morning-checkin", "payload": "2024-01-01"}))
                .await
                .unwrap();
            assert_eq!(found.kind, "get-morning-checkin:response");
            assert!(found.success);
            let items = found.items.unwrap();
            assert_eq!(items.len(), 1);
            assert_eq!(items[0]["intention"], "meditate");
        });
    }

    #[test]
    fn test_malformed_messages_get_no_reply() {
        pollster::block_on(async {
            let router = router();
            assert_eq!(router.dispatch(json!(null)).await, None);
            assert_eq!(router.dispatch(json!({"payload": "2024-01-01"})).await, None);
        });
    }

    #[test]
    fn test_unknown_type_gets_failure_reply() {
        pollster::block_on(async {
            let router = router();
            let response = router
                .dispatch(json!({"type": "get-yearly-review", "payload": "2024"}))
                .await
                .unwrap();
            assert_eq!(response.kind, "get-yearly-review:response");
            assert!(!response.success);
            assert_eq!(
                response.error.as_deref(),
                Some("unknown request type: get-yearly-review")
            );
        });
    }

    #[test]
    fn test_set_all_coerces_non_array_to_empty() {
        pollster::block_on(async {
            let router = router();
            router
                .dispatch(json!({"type": "add-growth-intention", "payload": {"date": "2024-01-01"}}))
                .await;

            let response = router
                .dispatch(json!({"type": "set-growth-intentions", "payload": "nope"}))
                .await
                .unwrap();
            assert!(response.success);

            let all = router
                .gateway()
                .read_all(Collection::Intentions)
                .await
                .unwrap();
            assert!(all.is_empty());
        });
    }

    #[test]
    fn test_set_all_with_bad_element_changes_nothing() {
        pollster::block_on(async {
            let router = router();
            router
                .dispatch(json!({"type": "add-growth-intention", "payload": {"date": "2024-01-01"}}))
                .await;

            let response = router
                .dispatch(json!({"type": "set-growth-intentions", "payload": [{"date": "2024-02-01"}, "x"]}))
                .await
                .unwrap();
            assert!(!response.success);

            let all = router
                .gateway()
                .read_all(Collection::Intentions)
                .await
                .unwrap();
            assert_eq!(all.len(), 1);
        });
    }

    #[test]
    fn test_add_coerces_non_object_to_empty_record() {
        pollster::block_on(async {
            let router = router();
            let response = router
                .dispatch(json!({"type": "set-evening-reflection", "payload": [1, 2]}))
                .await
                .unwrap();
            assert!(response.success);

            let all = router.gateway().read_all(Collection::Evening).await.unwrap();
            assert_eq!(all.len(), 1);
            assert_eq!(all[0].len(), 1); // only the assigned id
        });
    }

    #[test]
    fn test_get_by_date_without_string_payload_is_empty() {
        pollster::block_on(async {
            let router = router();
            router
                .dispatch(json!({"type": "set-monthly-review", "payload": {"date": "2024-01-01"}}))
                .await;

            let response = router
                .dispatch(json!({"type": "get-monthly-review", "payload": 20240101}))
                .await
                .unwrap();
            assert!(response.success);
            assert_eq!(response.items, Some(Vec::new()));
        });
    }

    #[test]
    fn test_gateway_failure_is_reported() {
        pollster::block_on(async {
            let router = Router::new(MemoryGateway::new(StorageConfig::default().with_version(0)));
            let response = router
                .dispatch(json!({"type": "get-weekly-reviews"}))
                .await
                .unwrap();
            assert!(!response.success);
            assert!(response.error.unwrap().contains("Database open failed"));
        });
    }

    #[test]
    fn test_handle_posts_exactly_one_reply() {
        pollster::block_on(async {
            let router = router();
            let (mut ours, theirs) = crate::transport::ChannelTransport::polyfill()
                .create()
                .unwrap();

            router
                .handle(json!({"type": "get-midday-checkins"}), theirs)
                .await;

            let reply = ours.recv().await.unwrap();
            assert_eq!(reply["type"], "get-midday-checkins:response");
            assert_eq!(reply["success"], true);
            // Router dropped its endpoint after replying.
            assert_eq!(ours.recv().await, None);
        });
    }
}
