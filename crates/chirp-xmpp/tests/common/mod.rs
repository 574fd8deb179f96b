//! Test utilities for end-to-end XMPP session tests.
//!
//! Provides a server bound to an ephemeral port, in-memory connections that
//! share its registry, and a raw client that walks through negotiation.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::prelude::*;
use chirp_xmpp::connection::ConnectionActor;
use chirp_xmpp::{SessionRegistry, XmppServer, XmppServerConfig};
use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test-friendly tracing subscriber once per process.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

/// Server configuration with the restart pause disabled.
pub fn test_config() -> XmppServerConfig {
    XmppServerConfig {
        c2s_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        restart_delay: Duration::ZERO,
        ..Default::default()
    }
}

/// Test server running on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub config: XmppServerConfig,
    pub registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
}

impl TestServer {
    /// Start a test server with the default test configuration.
    pub async fn start() -> Self {
        Self::start_with_config(test_config()).await
    }

    /// Start a test server with a custom configuration.
    pub async fn start_with_config(config: XmppServerConfig) -> Self {
        let server = XmppServer::new(config.clone())
            .await
            .expect("Failed to start test server");
        let addr = server.local_addr().expect("Failed to get local addr");
        let registry = server.registry();
        let shutdown = CancellationToken::new();

        tokio::spawn(server.run(shutdown.clone()));

        Self {
            addr,
            config,
            registry,
            shutdown,
        }
    }

    /// Open a TCP client connection.
    pub async fn connect(&self) -> TestClient<TcpStream> {
        let stream = TcpStream::connect(self.addr)
            .await
            .expect("Failed to connect to test server");
        TestClient::new(stream, &self.config.domain)
    }

    /// Open an in-memory connection sharing this server's registry.
    ///
    /// `pipe_capacity` bounds how much output the transport buffers before
    /// the server's writer blocks, and `config` may differ from the server's.
    pub fn connect_in_memory(
        &self,
        config: XmppServerConfig,
        pipe_capacity: usize,
    ) -> TestClient<DuplexStream> {
        let (client, server) = duplex(pipe_capacity);
        let peer_addr = SocketAddr::from(([127, 0, 0, 1], 1));
        tokio::spawn(ConnectionActor::handle_connection(
            server,
            peer_addr,
            Arc::new(config),
            Arc::clone(&self.registry),
            self.shutdown.child_token(),
        ));
        TestClient::new(client, &self.config.domain)
    }

    /// Wait until `jid` shows up in the registry.
    pub async fn wait_registered(&self, jid: &str) {
        self.wait_for(|r| r.is_registered(jid)).await
    }

    /// Wait until `jid` is gone from the registry.
    pub async fn wait_unregistered(&self, jid: &str) {
        self.wait_for(|r| !r.is_registered(jid)).await
    }

    async fn wait_for(&self, check: impl Fn(&SessionRegistry) -> bool) {
        timeout(DEFAULT_TIMEOUT, async {
            while !check(&self.registry) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Timed out waiting for registry state");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Raw XMPP client for driving the server byte by byte.
pub struct TestClient<S> {
    stream: S,
    domain: String,
    buffer: String,
}

impl<S: AsyncRead + AsyncWrite + Unpin> TestClient<S> {
    pub fn new(stream: S, domain: &str) -> Self {
        Self {
            stream,
            domain: domain.to_string(),
            buffer: String::new(),
        }
    }

    /// Send raw XML data.
    pub async fn send(&mut self, data: &str) -> Result<(), std::io::Error> {
        self.stream.write_all(data.as_bytes()).await?;
        self.stream.flush().await
    }

    /// Read until `pattern` arrives and return everything up to and
    /// including it. Later bytes stay buffered for the next call.
    pub async fn read_until(
        &mut self,
        pattern: &str,
        timeout_dur: Duration,
    ) -> Result<String, std::io::Error> {
        let result = timeout(timeout_dur, async {
            loop {
                if let Some(pos) = self.buffer.find(pattern) {
                    let end = pos + pattern.len();
                    let taken = self.buffer[..end].to_string();
                    self.buffer.drain(..end);
                    return Ok(taken);
                }

                let mut buf = [0u8; 4096];
                let n = self.stream.read(&mut buf).await?;
                if n == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("Connection closed waiting for pattern: {}", pattern),
                    ));
                }
                self.buffer.push_str(&String::from_utf8_lossy(&buf[..n]));
            }
        })
        .await;

        match result {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("Timeout waiting for pattern: {}", pattern),
            )),
        }
    }

    /// Read everything until the server closes the transport.
    pub async fn read_to_end(&mut self) -> Result<String, std::io::Error> {
        let mut rest = String::new();
        timeout(DEFAULT_TIMEOUT, self.stream.read_to_string(&mut rest))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "Read timeout"))??;
        let mut all = std::mem::take(&mut self.buffer);
        all.push_str(&rest);
        Ok(all)
    }

    /// Send XMPP stream header.
    pub async fn send_stream_header(&mut self) -> Result<(), std::io::Error> {
        let header = format!(
            "<?xml version='1.0'?>\
            <stream:stream \
            xmlns='jabber:client' \
            xmlns:stream='http://etherx.jabber.org/streams' \
            to='{}' \
            version='1.0'>",
            self.domain
        );
        self.send(&header).await
    }

    /// Wait for stream features.
    pub async fn expect_features(&mut self) -> Result<String, std::io::Error> {
        self.read_until("</stream:features>", DEFAULT_TIMEOUT).await
    }

    /// Send SASL PLAIN auth.
    pub async fn send_sasl_plain(&mut self, user: &str, password: &str) -> Result<(), std::io::Error> {
        let encoded = BASE64_STANDARD.encode(format!("\0{}\0{}", user, password));
        self.send(&format!(
            "<auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='PLAIN'>{}</auth>",
            encoded
        ))
        .await
    }

    /// Send a bind request, optionally asking for a resource.
    pub async fn send_bind(&mut self, id: &str, resource: Option<&str>) -> Result<(), std::io::Error> {
        let resource = resource
            .map(|r| format!("<resource>{}</resource>", r))
            .unwrap_or_default();
        self.send(&format!(
            "<iq type='set' id='{}'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'>{}</bind></iq>",
            id, resource
        ))
        .await
    }

    /// Authenticate, restart the stream and bind, stopping before the session
    /// request. Returns the bind response.
    pub async fn login_and_bind(
        &mut self,
        user: &str,
        resource: Option<&str>,
    ) -> Result<String, std::io::Error> {
        self.send_stream_header().await?;
        self.expect_features().await?;

        self.send_sasl_plain(user, "secret").await?;
        self.read_until("<success", DEFAULT_TIMEOUT).await?;

        self.send_stream_header().await?;
        self.expect_features().await?;

        self.send_bind("bind_1", resource).await?;
        self.read_until("</iq>", DEFAULT_TIMEOUT).await
    }

    /// Run the full negotiation through to an active session.
    pub async fn negotiate(&mut self, user: &str, resource: Option<&str>) -> Result<(), std::io::Error> {
        self.login_and_bind(user, resource).await?;
        self.send("<iq type='set' id='sess_1'><session xmlns='urn:ietf:params:xml:ns:xmpp-session'/></iq>")
            .await?;
        self.read_until("sess_1", DEFAULT_TIMEOUT).await?;
        Ok(())
    }

    /// Send a ping and wait for its result.
    pub async fn ping(&mut self, id: &str) -> Result<String, std::io::Error> {
        self.send(&format!(
            "<iq type='get' id='{}' to='{}'><ping xmlns='urn:xmpp:ping'/></iq>",
            id, self.domain
        ))
        .await?;
        self.read_until(id, DEFAULT_TIMEOUT).await
    }
}

/// Whether `xml` carries `name=value` in either quoting style.
pub fn has_attr(xml: &str, name: &str, value: &str) -> bool {
    xml.contains(&format!("{}='{}'", name, value)) || xml.contains(&format!("{}=\"{}\"", name, value))
}
