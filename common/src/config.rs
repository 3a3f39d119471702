use std::{env, path::PathBuf, time::Duration};

/// Control endpoint the agent dials when no URL is given
pub const DEFAULT_URL: &str = "wss://myapp.local:5173/ws";

/// Upper bound on TCP connect, TLS handshake and WebSocket upgrade combined
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const CERTS_DIR_ENV: &str = "CMDLINK_CERTS_DIR";
const DEFAULT_CERTS_DIR: &str = "certs";

fn get_certs_dir() -> PathBuf {
    env::var(CERTS_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CERTS_DIR))
}

/// Certificate paths for client authentication
#[derive(Debug, Clone)]
pub struct ClientCertPath {
    /// Path to the client certificate chain (PEM)
    pub cert_path: PathBuf,
    /// Path to the client private key (PEM)
    pub key_path:  PathBuf,
    /// Path to the certificate authority used to verify the endpoint
    pub ca_path:   PathBuf,
}

impl ClientCertPath {
    /// Creates ClientCertPath with default certificate locations.
    /// All three files live directly in the certs directory.
    pub fn new() -> Self {
        let base = get_certs_dir();
        Self {
            cert_path: base.join("client.crt"),
            key_path:  base.join("client.key"),
            ca_path:   base.join("ca.crt"),
        }
    }
}

impl Default for ClientCertPath {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything needed to open the secure channel
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket URL of the control endpoint (`wss://host:port/path`)
    pub url:               String,
    /// Credential locations
    pub cert_path:         ClientCertPath,
    /// Name the endpoint certificate must match; the URL host when unset
    pub server_name:       Option<String>,
    /// Bound on the whole connect sequence
    pub handshake_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url:               DEFAULT_URL.to_string(),
            cert_path:         ClientCertPath::new(),
            server_name:       None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl ChannelConfig {
    /// Creates a channel configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the endpoint URL
    pub fn with_url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = url.into();
        self
    }

    /// Set the certificate paths
    pub fn with_cert_path(mut self, cert_path: ClientCertPath) -> Self {
        self.cert_path = cert_path;
        self
    }

    /// Override the expected server name
    pub fn with_server_name<S: Into<String>>(mut self, server_name: S) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    /// Set the handshake timeout
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_share_one_directory() {
        let paths = ClientCertPath::new();
        assert_eq!(paths.cert_path.parent(), paths.ca_path.parent());
        assert_eq!(paths.key_path.parent(), paths.ca_path.parent());
        assert!(paths.cert_path.ends_with("client.crt"));
        assert!(paths.key_path.ends_with("client.key"));
        assert!(paths.ca_path.ends_with("ca.crt"));
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = ChannelConfig::new()
            .with_url("wss://control.internal:9443/ws")
            .with_server_name("control.internal")
            .with_handshake_timeout(Duration::from_secs(3));

        assert_eq!(config.url, "wss://control.internal:9443/ws");
        assert_eq!(config.server_name.as_deref(), Some("control.internal"));
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
    }

    #[test]
    fn defaults_match_the_stock_endpoint() {
        let config = ChannelConfig::default();
        assert_eq!(config.url, DEFAULT_URL);
        assert_eq!(config.server_name, None);
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
    }
}
