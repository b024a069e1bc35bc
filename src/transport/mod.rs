use std::{sync::Arc, time::Duration};

use crate::interop::Interop;

pub mod http_server;
pub mod middleware;
pub mod websocket_server;

/// Shared by every route.
pub struct AppState {
    /// Expected verbatim in the `Authorization` header.
    pub password: String,
    pub rpc_timeout: Duration,
    pub interop: Arc<Interop>,
}
