use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use cmdlink_agent::{
    dispatcher::DEFAULT_SCRIPTS_DIR, executor::DEFAULT_SHELL, ActionExecutor, Dispatcher, Session,
};
use cmdlink_common::{
    channel::load_tls_config, ChannelConfig, ClientCertPath, SecureChannel, DEFAULT_URL,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "cmdlink-agent")]
#[command(about = "Runs local scripts on request from a mutually authenticated control endpoint")]
struct Args {
    /// WebSocket URL of the control endpoint
    #[arg(long, env = "CMDLINK_URL", default_value = DEFAULT_URL)]
    url: String,

    /// CA certificate used to verify the endpoint (PEM)
    #[arg(long, env = "CMDLINK_CA")]
    ca: Option<PathBuf>,

    /// Client certificate chain (PEM)
    #[arg(long, env = "CMDLINK_CERT")]
    cert: Option<PathBuf>,

    /// Client private key (PEM)
    #[arg(long, env = "CMDLINK_KEY")]
    key: Option<PathBuf>,

    /// Name the endpoint certificate must carry; defaults to the URL host
    #[arg(long, env = "CMDLINK_SERVER_NAME")]
    server_name: Option<String>,

    /// Directory holding script0.sh .. script3.sh and null.sh
    #[arg(long, env = "CMDLINK_SCRIPTS_DIR", default_value = DEFAULT_SCRIPTS_DIR)]
    scripts_dir: PathBuf,

    /// Interpreter used to run scripts; empty runs them directly
    #[arg(long, env = "CMDLINK_SHELL", default_value = DEFAULT_SHELL)]
    shell: String,

    /// Seconds allowed for connect, TLS handshake and WebSocket upgrade
    #[arg(long, env = "CMDLINK_HANDSHAKE_TIMEOUT_SECS", default_value_t = 10)]
    handshake_timeout_secs: u64,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn channel_config(&self) -> ChannelConfig {
        let defaults = ClientCertPath::new();
        let cert_path = ClientCertPath {
            cert_path: self.cert.clone().unwrap_or(defaults.cert_path),
            key_path:  self.key.clone().unwrap_or(defaults.key_path),
            ca_path:   self.ca.clone().unwrap_or(defaults.ca_path),
        };

        let mut config = ChannelConfig::new()
            .with_url(&self.url)
            .with_cert_path(cert_path)
            .with_handshake_timeout(Duration::from_secs(self.handshake_timeout_secs));
        if let Some(name) = &self.server_name {
            config = config.with_server_name(name);
        }
        config
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Starting cmdlink agent...");

    let config = args.channel_config();
    let tls_config =
        load_tls_config(&config.cert_path).context("Failed to load client credentials")?;
    let channel = SecureChannel::connect(&config, tls_config)
        .with_context(|| format!("Failed to connect to {}", config.url))?;

    let dispatcher = Dispatcher::new(&args.scripts_dir);
    info!("Scripts resolved from {:?}", dispatcher.scripts_dir());

    let mut session = Session::new(channel, dispatcher, ActionExecutor::with_shell(&args.shell));
    let fault = session.run();
    // Closes the channel before the process exits.
    drop(session);

    Err(anyhow::Error::new(fault).context("Connection to control endpoint lost"))
}
