//! # Sync Client
//!
//! Dashboard synchronization over an unreliable network.
//!
//! - Signed JSON requests with classified, retried failures
//! - Connection state machine with observer notifications
//! - Bounded offline queue drained in batches
//! - Heartbeat, health-check and sync loops sharing one cancellation token
//!
//! Without an endpoint and API key the client stays `Offline` and only
//! buffers payloads.

pub mod client;
pub mod config;
pub mod error;
pub mod mock;
pub mod queue;
pub mod signing;
pub mod state;
pub mod transport;

pub use client::{ConnectionStatus, SyncClient, SyncStats};
pub use config::{ConnectionProfile, SyncClientConfig};
pub use error::{Result, SyncError};
pub use mock::{MockReply, MockTransport};
pub use queue::OfflineQueue;
pub use signing::RequestSigner;
pub use state::ConnectionTracker;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, LocalTransport, Method, Transport};
