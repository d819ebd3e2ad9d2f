use std::fmt;

use crate::config::ViewerConfig;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never opened
    Idle,
    /// Handshake in flight
    Connecting,
    /// Open and receiving
    Connected,
    /// Dropped by the server or by an error; waits for an explicit reopen
    Disconnected,
    /// Closed by us
    Closed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Closed => "closed",
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where arena feeds live
///
/// Secure pages get `wss`, plain pages `ws`; the arena id is appended to
/// the path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub secure: bool,
    pub host: String,
    pub path_prefix: String,
}

impl Endpoint {
    pub fn new(secure: bool, host: impl Into<String>, path_prefix: impl Into<String>) -> Self {
        Self {
            secure,
            host: host.into(),
            path_prefix: path_prefix.into(),
        }
    }

    pub fn from_config(config: &ViewerConfig) -> Self {
        Self::new(
            config.secure,
            config.server_host.clone(),
            config.ws_path_prefix.clone(),
        )
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "wss"
        } else {
            "ws"
        }
    }

    /// Full feed URL for one arena
    pub fn url_for(&self, arena_id: &str) -> String {
        let host = self.host.trim_end_matches('/');
        let prefix = self.path_prefix.trim_matches('/');
        let id = encode_path_segment(arena_id);
        if prefix.is_empty() {
            format!("{}://{}/{}", self.scheme(), host, id)
        } else {
            format!("{}://{}/{}/{}", self.scheme(), host, prefix, id)
        }
    }
}

/// Percent-encode everything outside the unreserved URL set
fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
