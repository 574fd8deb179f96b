//! Connection actor for handling individual XMPP client connections.
//!
//! Each accepted transport gets one actor. It drives the negotiation state
//! machine (stream open, SASL PLAIN, stream restart, bind, session) and then
//! hands every element to the [`StanzaDispatcher`] until the stream ends.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use jid::BareJid;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Span};
use uuid::Uuid;

use crate::auth::{bare_identity, parse_plain, SaslMechanism};
use crate::dispatch::StanzaDispatcher;
use crate::error::{generate_iq_error, stream_errors, StanzaErrorCondition, StanzaErrorType};
use crate::framer::Frame;
use crate::parser::{decode_element, ns};
use crate::presence::Presence;
use crate::registry::{SessionHandle, SessionRegistry};
use crate::server::XmppServerConfig;
use crate::stanza::{build_bind_result, build_iq_result, IqType, Payload, RequestContext, Stanza};
use crate::stream::{spawn_writer, XmppStream};
use crate::types::NegotiationState;
use crate::XmppError;

/// How long teardown waits for queued output to reach the peer.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry membership of an active session.
///
/// Dropping it removes the session and tells everyone else it went away,
/// so teardown runs exactly once on every exit path.
struct Registration {
    registry: Arc<SessionRegistry>,
    handle: SessionHandle,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.registry.unregister_session(&self.handle) {
            self.handle.update_presence(|p| *p = Presence::unavailable());
            self.registry.broadcast_presence(&self.handle);
            info!(jid = %self.handle.jid(), "Session ended");
        }
    }
}

/// Actor managing a single XMPP client connection.
pub struct ConnectionActor<S> {
    /// Identifies this connection in the registry
    conn_id: Uuid,
    /// XMPP stream handler over the read half
    stream: XmppStream<ReadHalf<S>>,
    /// Current negotiation state
    state: NegotiationState,
    /// Server configuration
    config: Arc<XmppServerConfig>,
    /// Shared session registry
    registry: Arc<SessionRegistry>,
    /// Handler for stanzas once active
    dispatcher: StanzaDispatcher,
    /// Server-wide shutdown signal
    shutdown: CancellationToken,
    /// Authenticated bare identity
    identity: Option<BareJid>,
    /// Session handle, created at bind
    session: Option<SessionHandle>,
    /// Present while the session is registered
    registration: Option<Registration>,
    /// Connection lifecycle span, where the JID is recorded
    span: Span,
}

impl<S> ConnectionActor<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Handle a new incoming connection until it ends.
    ///
    /// Generic over the transport so that tests can drive it through
    /// in-memory pipes.
    pub async fn handle_connection(
        io: S,
        peer_addr: SocketAddr,
        config: Arc<XmppServerConfig>,
        registry: Arc<SessionRegistry>,
        shutdown: CancellationToken,
    ) -> Result<(), XmppError> {
        info!("New connection from {}", peer_addr);

        let (reader, writer) = tokio::io::split(io);
        let (tx, rx) = mpsc::channel(config.outbound_queue_size);
        let writer_task = spawn_writer(writer, rx);

        let mut actor = Self {
            conn_id: Uuid::new_v4(),
            stream: XmppStream::new(reader, tx, config.domain.clone(), config.max_stanza_size),
            state: NegotiationState::Connected,
            dispatcher: StanzaDispatcher::new(Arc::clone(&registry), Arc::clone(&config)),
            config,
            registry,
            shutdown,
            identity: None,
            session: None,
            registration: None,
            span: Span::current(),
        };

        let result = actor.run().await;
        match result {
            Ok(()) => actor.transition(NegotiationState::Closed),
            Err(ref e) => {
                debug!(error = %e, "Connection failed");
                actor.transition(NegotiationState::Failed);
            }
        }

        // Unregisters the session and releases every outbound sender.
        drop(actor);

        let abort = writer_task.abort_handle();
        match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Writer task failed"),
            Err(_) => {
                warn!("Peer not reading, dropping unsent output");
                abort.abort();
            }
        }

        info!("Connection closed");
        result
    }

    fn transition(&mut self, next: NegotiationState) {
        debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
    }

    /// Main connection loop.
    async fn run(&mut self) -> Result<(), XmppError> {
        self.stream.send_stream_header().await?;
        self.transition(NegotiationState::StreamOpen);
        self.stream.send_features_sasl().await?;
        self.transition(NegotiationState::AwaitingAuth);

        let shutdown = self.shutdown.clone();
        loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                frame = self.read_frame() => Some(frame),
            };
            let Some(frame) = frame else {
                info!("Server shutting down, closing stream");
                let _ = self
                    .stream
                    .send_stream_error(stream_errors::SYSTEM_SHUTDOWN, None)
                    .await;
                return Ok(());
            };

            match frame {
                Ok(Frame::StreamOpen(_)) => {}
                Ok(Frame::StreamClosed) => {
                    debug!("Client closed stream");
                    let _ = self.stream.close().await;
                    return Ok(());
                }
                Ok(Frame::Element(raw)) => match self.handle_element(&raw).await {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(XmppError::RouteMiss(to)) => debug!(to = %to, "No session for recipient, dropped"),
                    Err(e) => warn!(error = %e, "Dropped element"),
                },
                Err(XmppError::EndOfStream) => {
                    debug!("Transport closed by peer");
                    return Ok(());
                }
                Err(e) => {
                    self.send_stream_error_for(&e).await;
                    return Err(e);
                }
            }
        }
    }

    /// Read a frame, bounded by the idle timeout when one is configured.
    async fn read_frame(&mut self) -> Result<Frame, XmppError> {
        match self.config.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, self.stream.read_frame())
                .await
                .map_err(|_| XmppError::Timeout)?,
            None => self.stream.read_frame().await,
        }
    }

    async fn send_stream_error_for(&self, error: &XmppError) {
        let sent = match error {
            XmppError::PolicyViolation(text) => {
                self.stream
                    .send_stream_error(stream_errors::POLICY_VIOLATION, Some(text))
                    .await
            }
            XmppError::Timeout => {
                self.stream
                    .send_stream_error(stream_errors::CONNECTION_TIMEOUT, None)
                    .await
            }
            _ => return,
        };
        if let Err(e) = sent {
            debug!(error = %e, "Could not send stream error");
        }
    }

    /// Route one element according to the negotiation state.
    async fn handle_element(&mut self, raw: &[u8]) -> Result<(), XmppError> {
        match self.state {
            NegotiationState::AwaitingAuth => self.handle_auth(raw).await,
            NegotiationState::FeaturesSent => self.handle_bind(Stanza::decode(raw)?).await,
            NegotiationState::Bound => self.handle_session(Stanza::decode(raw)?).await,
            NegotiationState::Active => match self.session {
                Some(ref session) => self.dispatcher.dispatch(session, raw).await,
                None => Err(XmppError::internal("Active without a session")),
            },
            state => Err(XmppError::internal(format!(
                "Element received in transient state {}",
                state
            ))),
        }
    }

    /// Handle SASL PLAIN authentication and the stream restart that follows.
    #[instrument(skip_all, name = "xmpp.stream.authenticate")]
    async fn handle_auth(&mut self, raw: &[u8]) -> Result<(), XmppError> {
        let element = decode_element(raw).map_err(|e| {
            if is_auth_markup(raw) {
                XmppError::malformed_auth(e.to_string())
            } else {
                e
            }
        })?;
        if !element.is("auth", ns::SASL) {
            return Err(XmppError::unknown_stanza(format!(
                "{} before authentication",
                element.name()
            )));
        }

        let mechanism = element.attr("mechanism").unwrap_or_default();
        if SaslMechanism::parse(mechanism).is_none() {
            warn!(mechanism = %mechanism, "Unsupported SASL mechanism");
            return self.stream.send_sasl_failure("invalid-mechanism").await;
        }

        let credentials = parse_plain(&element.text())?;
        let identity = bare_identity(&credentials.authcid, &self.config.domain)?;

        self.stream.send_sasl_success().await?;
        self.transition(NegotiationState::Authenticated);
        self.span.record("jid", tracing::field::display(&identity));
        info!(jid = %identity, "Authentication successful");

        // Stream restart
        self.stream.close().await?;
        if !self.config.restart_delay.is_zero() {
            tokio::time::sleep(self.config.restart_delay).await;
        }
        self.stream.send_stream_header().await?;
        self.transition(NegotiationState::StreamRestarted);
        self.stream.send_features_bind().await?;
        self.transition(NegotiationState::FeaturesSent);

        self.identity = Some(identity);
        Ok(())
    }

    /// Handle the resource bind request.
    #[instrument(skip_all, name = "xmpp.stream.bind")]
    async fn handle_bind(&mut self, stanza: Stanza) -> Result<(), XmppError> {
        let (Some(Payload::Bind { resource }), Some(IqType::Set)) =
            (&stanza.payload, stanza.iq_type())
        else {
            return Err(XmppError::unknown_stanza(format!(
                "{} before resource binding",
                stanza.name
            )));
        };
        let identity = self
            .identity
            .clone()
            .ok_or_else(|| XmppError::internal("Bind before authentication"))?;
        let id = stanza.id.as_deref().unwrap_or("bind_1");

        let bound = match resource {
            Some(resource) => match identity.with_resource_str(resource) {
                Ok(full) => full.to_string(),
                Err(e) => {
                    debug!(error = %e, "Invalid resource requested");
                    let error = generate_iq_error(
                        id,
                        None,
                        Some(&self.config.domain),
                        StanzaErrorCondition::BadRequest,
                        StanzaErrorType::Modify,
                    );
                    return self.stream.write_raw(error).await;
                }
            },
            None => identity.to_string(),
        };

        let ctx = RequestContext {
            id,
            requester: &bound,
            domain: &self.config.domain,
            target: None,
            node: None,
        };
        self.stream
            .send_element(&build_bind_result(&ctx, &bound))
            .await?;

        self.span.record("jid", bound.as_str());
        debug!(jid = %bound, "Resource bound");

        self.session = Some(SessionHandle::new(
            bound,
            self.conn_id,
            self.stream.outbound().clone(),
        ));
        self.transition(NegotiationState::Bound);
        Ok(())
    }

    /// Handle the session request, or establish the session implicitly when
    /// the client skips it.
    #[instrument(skip_all, name = "xmpp.stream.session")]
    async fn handle_session(&mut self, stanza: Stanza) -> Result<(), XmppError> {
        if stanza.is_session() && stanza.iq_type() == Some(IqType::Set) {
            let session = self
                .session
                .as_ref()
                .ok_or_else(|| XmppError::internal("Session request before bind"))?;
            let ctx = RequestContext {
                id: stanza.id.as_deref().unwrap_or_default(),
                requester: session.jid(),
                domain: &self.config.domain,
                target: None,
                node: None,
            };
            self.stream
                .send_element(&build_iq_result(&ctx, None))
                .await?;
            self.transition(NegotiationState::SessionEstablished);
            self.activate()?;
            return Ok(());
        }

        debug!("Stanza before session request, establishing session implicitly");
        self.transition(NegotiationState::SessionEstablished);
        self.activate()?;
        match self.session {
            Some(ref session) => self.dispatcher.dispatch_stanza(session, stanza).await,
            None => Err(XmppError::internal("Active without a session")),
        }
    }

    /// Register the session and announce its presence.
    fn activate(&mut self) -> Result<(), XmppError> {
        let handle = self
            .session
            .clone()
            .ok_or_else(|| XmppError::internal("Activating without a session"))?;

        self.registry.register(handle.clone());
        self.registration = Some(Registration {
            registry: Arc::clone(&self.registry),
            handle: handle.clone(),
        });
        self.registry.broadcast_presence(&handle);

        self.transition(NegotiationState::Active);
        info!(jid = %handle.jid(), "Session established");
        Ok(())
    }
}

/// Whether a frame that failed to decode was meant as a SASL `<auth>`.
fn is_auth_markup(raw: &[u8]) -> bool {
    let start = raw
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(raw.len());
    let rest = &raw[start..];
    rest.starts_with(b"<auth")
        && matches!(rest.get(5), Some(b' ' | b'\t' | b'\r' | b'\n' | b'>' | b'/'))
}
