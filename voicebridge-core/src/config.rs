//! Server configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the bridge server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket listener binds to.
    pub host: String,
    pub port: u16,

    /// STUN server handed to every media session.
    pub stun_server: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            stun_server: "stun:stun.l.google.com:19302".to_string(),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_listen_address() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_address(), "0.0.0.0:8080");
    }
}
