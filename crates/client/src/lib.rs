//! Deep Agents client core
//!
//! Keeps a local model of one live agent session in sync with the backend:
//! channel membership, event routing, the session store with token stream
//! assembly, and reconnection.

pub mod api;
pub mod assembler;
pub mod config;
pub mod connection;
pub mod error;
pub mod reconnect;
pub mod router;
pub mod store;
pub mod subscription;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testing;

use std::time::{SystemTime, UNIX_EPOCH};

pub use api::{HttpApi, SessionApi};
pub use config::ClientConfig;
pub use connection::{Connection, ConnectionEvent};
pub use error::{ClientError, Result};
pub use reconnect::ReconnectPolicy;
pub use router::{route, Routed};
pub use store::{SessionStore, StoreSnapshot};
pub use subscription::{ChannelTransport, LinkId, SubscriptionManager};
pub use workspace::{LinkState, WorkspaceHandle};

/// Wall-clock timestamp used for locally stamped messages
pub fn now() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{}Z", secs)
}
