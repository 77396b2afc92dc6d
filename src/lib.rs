//! # skyrelay
//!
//! A long-running worker that watches a roster of Bluesky authors on the
//! Jetstream firehose and triggers a downstream workflow for each new post.
//!
//! ## Architecture
//!
//! ```text
//! Control API ──roster──► RosterStore
//!                             │
//! Jetstream ──ws──► ConnectionManager ──► Dispatcher ──► TriggerForwarder ──► Control API
//! ```
//!
//! ## Modules
//!
//! - [`config`]: TOML + environment configuration
//! - [`control_api`]: Client for the roster and trigger endpoints
//! - [`roster`]: In-memory roster of watched identities
//! - [`stream`]: Connection state machine and websocket transport
//! - [`dispatcher`]: Guard pipeline from raw message to trigger payload
//! - [`forwarder`]: Fire-and-forget trigger calls
//! - [`shutdown`]: Signal handling

pub mod config;
pub mod control_api;
pub mod dispatcher;
pub mod event;
pub mod forwarder;
pub mod roster;
pub mod shutdown;
pub mod stream;

// Re-export commonly used types at crate root
pub use config::{ConfigError, RelayConfig};
pub use control_api::{ControlApi, ControlApiError, HttpControlApi};
pub use dispatcher::{DispatchOutcome, Dispatcher, SkipReason};
pub use event::{StreamEvent, TriggerPayload};
pub use forwarder::{ForwardError, TriggerForwarder, TriggerSink};
pub use roster::{IdentityRecord, Roster, RosterStore};
pub use stream::{BackoffPolicy, ConnectionManager, ConnectionState, TransportError};
