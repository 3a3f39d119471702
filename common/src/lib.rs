//! cmdlink common library
//!
//! Shared pieces of the cmdlink agent:
//!
//! - Wire envelopes for command requests and correlated responses
//! - A mutually authenticated WebSocket channel (rustls + tungstenite)
//! - Configuration structures and credential locations
//!
//! # Features
//!
//! - **Mutual TLS**: the endpoint is verified against a private CA and the agent
//!   presents its own certificate
//! - **Bounded handshake**: connect, TLS and upgrade share one deadline
//! - **JSON envelopes**: one request or response per text frame

/// Configuration structures and defaults
pub mod config;

/// Secure WebSocket channel
pub mod channel;

/// Request and response envelopes
pub mod protocol;

// Re-export commonly used types for convenience
pub use channel::{Channel, ChannelError, Frame, SecureChannel};
pub use config::{ChannelConfig, ClientCertPath, DEFAULT_URL};
pub use protocol::{ConfigPayload, Request, Response, ResponseData, Status};
