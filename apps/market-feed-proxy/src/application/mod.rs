//! Application Layer - Use cases and port definitions.
//!
//! The forwarding gateway and the stream connection manager live here and
//! talk to the outside world only through the ports.

/// Port interfaces for upstream HTTP and streaming transports.
pub mod ports;

/// Forwarding gateway, stream connection manager and reconnection policy.
pub mod services;
