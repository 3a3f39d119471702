//! cmdlink agent
//!
//! Keeps one mutually authenticated WebSocket connection to a control
//! endpoint open, runs a fixed set of local scripts on request and answers
//! every executed request with its output, tagged with the caller's
//! `requestId`.
//!
//! # Example
//!
//! ```no_run
//! use cmdlink_agent::{ActionExecutor, Dispatcher, Session};
//! use cmdlink_common::{channel::load_tls_config, ChannelConfig, SecureChannel};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = ChannelConfig::new().with_url("wss://control.local:8443/ws");
//! let tls_config = load_tls_config(&config.cert_path)?;
//! let channel = SecureChannel::connect(&config, tls_config)?;
//!
//! let mut session = Session::new(channel, Dispatcher::new("./sc"), ActionExecutor::default());
//! let fault = session.run();
//! eprintln!("connection lost: {fault}");
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod executor;
pub mod response;
pub mod session;

pub use dispatcher::{ActionRule, Dispatch, Dispatcher, ResolvedAction, Script};
pub use executor::{ActionExecutor, ExecutionResult};
pub use response::build_response;
pub use session::{Session, SessionState};
