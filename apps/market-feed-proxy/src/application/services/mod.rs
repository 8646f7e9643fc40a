//! Application Services
//!
//! - `gateway`: forwards dashboard requests to upstream REST APIs
//! - `stream_manager`: owns the reconnecting, throttled stream connection
//! - `reconnect`: backoff policy used by the stream manager

pub mod gateway;
pub mod reconnect;
pub mod stream_manager;

pub use gateway::{ACCEPT_JSON, ForwardingGateway, USER_AGENT};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use stream_manager::{DEFAULT_THROTTLE_INTERVAL, StreamConnectionManager, StreamManagerConfig};
