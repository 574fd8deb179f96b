//! Stanza dispatch for active sessions.
//!
//! Once a connection has registered its session, every element it sends is
//! decoded here and handed to the matching handler. Failures are scoped to
//! the element that caused them; the caller decides from
//! [`XmppError::is_fatal`] whether to keep reading.

use std::sync::Arc;

use tracing::{debug, info_span, instrument, warn, Instrument};

use crate::disco::{
    build_disco_info_response, build_disco_items_response, server_features, Identity,
    DISCO_INFO_NS, DISCO_ITEMS_NS,
};
use crate::error::{generate_iq_error, StanzaErrorCondition, StanzaErrorType};
use crate::parser::{element_to_string, ns};
use crate::registry::{OutboundStanza, SendResult, SessionHandle, SessionRegistry};
use crate::roster::{build_roster_result, online_roster};
use crate::server::XmppServerConfig;
use crate::stanza::{build_bind_result, build_iq_result, IqType, Payload, RequestContext, Stanza};
use crate::types::StanzaKind;
use crate::xep::{build_ping_result, build_vcard_response};
use crate::XmppError;

/// Presence types that change availability. Subscription management
/// (`subscribe`, `probe`, ...) is not supported.
const AVAILABILITY_TYPES: &[&str] = &["unavailable"];

/// Routes stanzas from an active session to their handlers.
#[derive(Clone)]
pub struct StanzaDispatcher {
    registry: Arc<SessionRegistry>,
    config: Arc<XmppServerConfig>,
}

impl StanzaDispatcher {
    /// Create a dispatcher over the shared registry.
    pub fn new(registry: Arc<SessionRegistry>, config: Arc<XmppServerConfig>) -> Self {
        Self { registry, config }
    }

    /// Decode a framed element and dispatch it on behalf of `session`.
    pub async fn dispatch(&self, session: &SessionHandle, raw: &[u8]) -> Result<(), XmppError> {
        let stanza = Stanza::decode(raw)?;
        self.dispatch_stanza(session, stanza).await
    }

    /// Dispatch an already decoded stanza.
    pub async fn dispatch_stanza(
        &self,
        session: &SessionHandle,
        stanza: Stanza,
    ) -> Result<(), XmppError> {
        let kind = stanza.kind();
        let span = info_span!(
            "xmpp.stanza.process",
            stanza_type = %kind,
            from = %session.jid(),
            to = ?stanza.to,
        );

        async move {
            match kind {
                StanzaKind::Iq => self.handle_iq(session, stanza).await,
                StanzaKind::Presence => self.handle_presence(session, stanza),
                StanzaKind::Message => self.handle_message(session, stanza),
                StanzaKind::Other => Err(XmppError::unknown_stanza(stanza.name)),
            }
        }
        .instrument(span)
        .await
    }

    async fn handle_iq(&self, session: &SessionHandle, stanza: Stanza) -> Result<(), XmppError> {
        let iq_type = stanza
            .iq_type()
            .ok_or_else(|| XmppError::decode("IQ without a valid type"))?;

        if !iq_type.is_request() {
            debug!(iq_type = ?iq_type, "Ignoring IQ response from client");
            return Ok(());
        }

        let id = stanza
            .id
            .as_deref()
            .ok_or_else(|| XmppError::decode("IQ request without id"))?;

        let node = match stanza.payload {
            Some(Payload::Query(ref query)) => query.node.as_deref(),
            _ => None,
        };
        let ctx = RequestContext {
            id,
            requester: session.jid(),
            domain: &self.config.domain,
            target: stanza.to.as_deref(),
            node,
        };

        let response = match (&stanza.payload, iq_type) {
            // Already bound; answer with the existing identity.
            (Some(Payload::Bind { .. }), IqType::Set) => build_bind_result(&ctx, session.jid()),
            (Some(Payload::Session), IqType::Set) => build_iq_result(&ctx, None),
            (Some(Payload::Query(query)), IqType::Get) => {
                if query.is("query", DISCO_INFO_NS) {
                    let identities = [Identity::server(Some(self.config.server_name.as_str()))];
                    build_disco_info_response(&ctx, &identities, &server_features())
                } else if query.is("query", DISCO_ITEMS_NS) {
                    build_disco_items_response(&ctx)
                } else if query.is("vCard", ns::VCARD) {
                    build_vcard_response(&ctx)
                } else if query.is("query", ns::ROSTER) {
                    let items = online_roster(session.jid(), &self.registry.snapshot());
                    build_roster_result(&ctx, &items)
                } else if query.is("ping", ns::PING) {
                    build_ping_result(&ctx)
                } else {
                    debug!(name = %query.name, namespace = %query.namespace, "Unsupported IQ payload");
                    return self
                        .reply_error(session, &ctx, StanzaErrorCondition::ServiceUnavailable)
                        .await;
                }
            }
            (None, _) => {
                return self
                    .reply_error(session, &ctx, StanzaErrorCondition::BadRequest)
                    .await;
            }
            _ => {
                return self
                    .reply_error(session, &ctx, StanzaErrorCondition::ServiceUnavailable)
                    .await;
            }
        };

        session
            .deliver(OutboundStanza::new(element_to_string(&response)?))
            .await
    }

    async fn reply_error(
        &self,
        session: &SessionHandle,
        ctx: &RequestContext<'_>,
        condition: StanzaErrorCondition,
    ) -> Result<(), XmppError> {
        let error_type = match condition {
            StanzaErrorCondition::BadRequest => StanzaErrorType::Modify,
            _ => StanzaErrorType::Cancel,
        };
        let error = generate_iq_error(
            ctx.id,
            Some(ctx.requester),
            Some(ctx.domain),
            condition,
            error_type,
        );
        session.deliver(OutboundStanza::new(error)).await
    }

    #[instrument(skip_all, fields(presence_type = ?stanza.type_))]
    fn handle_presence(&self, session: &SessionHandle, stanza: Stanza) -> Result<(), XmppError> {
        let Some(Payload::Presence(update)) = stanza.payload else {
            return Err(XmppError::decode("Presence without payload"));
        };

        let type_ = stanza.type_.as_deref();
        if let Some(t) = type_ {
            if !AVAILABILITY_TYPES.contains(&t) {
                debug!(presence_type = %t, "Ignoring presence subscription stanza");
                return Ok(());
            }
        }

        session.update_presence(|presence| presence.apply(&update, type_));
        self.registry.broadcast_presence(session);
        Ok(())
    }

    fn handle_message(&self, session: &SessionHandle, stanza: Stanza) -> Result<(), XmppError> {
        let Some(to) = stanza.to.as_deref() else {
            debug!("Message without recipient, dropping");
            return Ok(());
        };

        let xml = element_to_string(&stanza.restamp(session.jid()))?;

        if let Some(recipient) = self.registry.lookup(to) {
            log_delivery(to, recipient.try_deliver(OutboundStanza::new(xml)));
            return Ok(());
        }

        // A bare address reaches every resource of that account.
        if !to.contains('/') {
            let recipients = self.registry.lookup_bare(to);
            if !recipients.is_empty() {
                for recipient in recipients {
                    let result = recipient.try_deliver(OutboundStanza::new(xml.clone()));
                    log_delivery(recipient.jid(), result);
                }
                return Ok(());
            }
        }

        Err(XmppError::route_miss(to))
    }
}

fn log_delivery(to: &str, result: SendResult) {
    match result {
        SendResult::Sent => debug!(to = %to, "Message routed"),
        other => warn!(to = %to, result = ?other, "Message not delivered"),
    }
}
