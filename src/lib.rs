#![warn(clippy::all)]

//! Journal data layer.
//!
//! Application code talks to a [`JournalClient`], which forwards every call
//! as a message to a worker. The worker's [`Router`] maps each message onto
//! one [`JournalGateway`] operation: IndexedDB in the browser, an in-memory
//! store everywhere else.

pub mod client;
pub mod journal;
pub mod logging;
pub mod protocol;
pub mod storage;
pub mod time;
pub mod transport;
pub mod worker;

pub use client::{ClientConfig, ClientError, JournalClient};
pub use protocol::{ProtocolError, RequestEnvelope, RequestKind, ResponseEnvelope};
pub use storage::{Collection, JournalGateway, MemoryGateway, Record, StorageConfig, StorageError};
pub use transport::{ChannelTransport, Endpoint, TransportError, WorkerLink};
pub use worker::{LocalWorker, LocalWorkerLink, Router};

#[cfg(target_arch = "wasm32")]
pub use storage::IndexedDbGateway;
#[cfg(target_arch = "wasm32")]
pub use worker::web::WebWorkerLink;
