//! Command-line and environment configuration.

use std::net::SocketAddr;
use std::time::Duration;

use chirp_xmpp::XmppServerConfig;
use clap::Parser;
use tracing::info;

/// Chirp - minimal XMPP server
#[derive(Debug, Parser)]
#[command(name = "chirp-server")]
#[command(author, version, about, long_about = None)]
pub struct ServerConfig {
    /// Address to listen on for client connections
    #[arg(short, long, env = "CHIRP_LISTEN_ADDR", default_value = "127.0.0.1:5222")]
    pub listen: SocketAddr,

    /// Domain served by this instance
    #[arg(short, long, env = "CHIRP_DOMAIN", default_value = "localhost")]
    pub domain: String,

    /// Name reported through service discovery
    #[arg(long, env = "CHIRP_SERVER_NAME", default_value = "Chirp")]
    pub server_name: String,

    /// Close connections idle for this many seconds (0 disables)
    #[arg(long, env = "CHIRP_IDLE_TIMEOUT_SECS", default_value_t = 0)]
    pub idle_timeout_secs: u64,

    /// Largest element accepted from a client, in bytes
    #[arg(long, env = "CHIRP_MAX_STANZA_SIZE", default_value_t = chirp_xmpp::framer::DEFAULT_MAX_STANZA_SIZE)]
    pub max_stanza_size: usize,

    /// Capacity of each connection's outbound queue
    #[arg(long, env = "CHIRP_OUTBOUND_QUEUE_SIZE", default_value_t = 256)]
    pub outbound_queue_size: usize,

    /// Pause before the restarted stream header, in milliseconds
    #[arg(long, env = "CHIRP_RESTART_DELAY_MS", default_value_t = 100)]
    pub restart_delay_ms: u64,
}

impl ServerConfig {
    /// Build the XMPP server configuration.
    pub fn into_xmpp_config(self) -> XmppServerConfig {
        XmppServerConfig {
            c2s_addr: self.listen,
            domain: self.domain,
            server_name: self.server_name,
            restart_delay: Duration::from_millis(self.restart_delay_ms),
            outbound_queue_size: self.outbound_queue_size,
            max_stanza_size: self.max_stanza_size,
            idle_timeout: (self.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.idle_timeout_secs)),
        }
    }

    /// Log the effective configuration.
    pub fn log_config(&self) {
        info!(
            listen = %self.listen,
            domain = %self.domain,
            server_name = %self.server_name,
            idle_timeout_secs = self.idle_timeout_secs,
            max_stanza_size = self.max_stanza_size,
            outbound_queue_size = self.outbound_queue_size,
            "Configuration loaded"
        );
    }
}
