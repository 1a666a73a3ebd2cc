//! HTTP and WebSocket gateway for Conductor: task submission, status, the
//! stage work queue, heartbeats, template management and progress streaming.

pub mod api;
pub mod connection;
pub mod error;
pub mod middleware;
pub mod server;
pub mod ws;

pub use error::{ApiError, ApiResult};
pub use server::{AppState, GatewayServer};
