//! XMPP server: C2S listener and per-connection task spawning.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::connection::ConnectionActor;
use crate::framer::DEFAULT_MAX_STANZA_SIZE;
use crate::registry::SessionRegistry;
use crate::XmppError;

/// XMPP server configuration.
#[derive(Debug, Clone)]
pub struct XmppServerConfig {
    /// Address to bind for C2S connections (default: 127.0.0.1:5222)
    pub c2s_addr: SocketAddr,
    /// Server domain (e.g., "localhost")
    pub domain: String,
    /// Name reported in the service discovery identity
    pub server_name: String,
    /// Pause between SASL success and the restarted stream header
    pub restart_delay: Duration,
    /// Capacity of each connection's outbound queue
    pub outbound_queue_size: usize,
    /// Largest single element accepted from a client, in bytes
    pub max_stanza_size: usize,
    /// Close connections that stay silent this long (None disables)
    pub idle_timeout: Option<Duration>,
}

impl Default for XmppServerConfig {
    fn default() -> Self {
        Self {
            c2s_addr: SocketAddr::from(([127, 0, 0, 1], 5222)),
            domain: "localhost".to_string(),
            server_name: "Chirp".to_string(),
            restart_delay: Duration::from_millis(100),
            outbound_queue_size: 256,
            max_stanza_size: DEFAULT_MAX_STANZA_SIZE,
            idle_timeout: None,
        }
    }
}

impl XmppServerConfig {
    /// Check the values a server cannot start with.
    pub fn validate(&self) -> Result<(), XmppError> {
        if self.domain.is_empty() {
            return Err(XmppError::config("Domain must not be empty"));
        }
        if self.outbound_queue_size == 0 {
            return Err(XmppError::config("Outbound queue size must be at least 1"));
        }
        if self.max_stanza_size == 0 {
            return Err(XmppError::config("Maximum stanza size must be at least 1"));
        }
        Ok(())
    }
}

/// XMPP server instance.
pub struct XmppServer {
    config: Arc<XmppServerConfig>,
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
}

impl XmppServer {
    /// Bind the C2S listener and create the session registry.
    pub async fn new(config: XmppServerConfig) -> Result<Self, XmppError> {
        config.validate()?;

        let listener = TcpListener::bind(config.c2s_addr).await?;
        info!(addr = %listener.local_addr()?, domain = %config.domain, "XMPP C2S server listening");

        Ok(Self {
            config: Arc::new(config),
            listener,
            registry: Arc::new(SessionRegistry::new()),
        })
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, XmppError> {
        Ok(self.listener.local_addr()?)
    }

    /// Get the server configuration.
    pub fn config(&self) -> &XmppServerConfig {
        &self.config
    }

    /// Get the session registry.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accept connections until `shutdown` is cancelled.
    ///
    /// Every connection runs in its own task. Cancellation also reaches the
    /// running connections, which close their streams.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), XmppError> {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "Failed to accept C2S connection");
                    continue;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                warn!(error = %e, "Failed to set TCP_NODELAY");
            }

            let config = Arc::clone(&self.config);
            let registry = Arc::clone(&self.registry);
            let shutdown = shutdown.child_token();

            tokio::spawn(
                async move {
                    if let Err(e) = ConnectionActor::handle_connection(
                        stream, peer_addr, config, registry, shutdown,
                    )
                    .await
                    {
                        tracing::warn!(error = %e, "Connection error");
                    }
                }
                .instrument(info_span!(
                    "xmpp.connection.lifecycle",
                    client_ip = %peer_addr,
                    transport = "tcp",
                    jid = tracing::field::Empty, // Set during authentication and bind
                )),
            );
        }

        info!(sessions = self.registry.len(), "XMPP C2S server stopped accepting");
        Ok(())
    }
}
