//! Networking: wire protocol, connection state and the WebSocket transport

pub mod connection;
pub mod protocol;
pub mod transport;
