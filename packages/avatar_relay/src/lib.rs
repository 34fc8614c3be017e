//! Avatar chat relay.
//!
//! Holds a single WebSocket to the AI backend and fans its frames out to any
//! number of downstream clients; client messages travel the other way
//! verbatim. Also home of the `talk` terminal client.

use std::sync::Arc;

pub mod backend_link;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod metrics;
pub mod protocol;
pub mod server;


pub use backend_link::{BackendHandle, Dialer, UpstreamConnection, WsDialer};
pub use config::{FileConfig, load_config};
pub use error::RelayError;
pub use hub::Hub;
pub use metrics::RelayMetrics;
pub use server::{Relay, router};

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub backend: BackendHandle,
    /// Relay metrics for observability
    pub metrics: Arc<RelayMetrics>,
    pub backend_url: Arc<str>,
}
