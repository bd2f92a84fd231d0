//! Event emission and offline sync pipeline.
//!
//! Every significant mutation produces a causal envelope (Lamport clock,
//! node id, causation/correlation ids). Envelopes are sent straight to the
//! upstream when a transport is connected and the caller is authenticated;
//! otherwise, or on any transport failure, they land in a durable local
//! queue scoped to the active account. A background service drains the queue
//! in gzipped batches with exponential backoff.

pub mod auth;
pub mod background;
pub mod batch;
pub mod clock;
pub mod emitter;
pub mod envelope;
pub mod queue;

pub use auth::{AccountScope, AuthClient, CredentialStore, Credentials};
pub use background::BackgroundSyncService;
pub use batch::{batch_sync, check_connectivity, BatchSyncResult, ConnectivityStatus};
pub use clock::{generate_node_id, LamportClock};
pub use emitter::{EventEmitter, EventTransport};
pub use envelope::{normalize_envelope_id, EventEnvelope};
pub use queue::{OfflineQueue, QueuedEvent, ReplayStatus, QUEUE_CAP};
