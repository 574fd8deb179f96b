//! Stanza model.
//!
//! A [`Stanza`] is the envelope shared by `iq`, `presence` and `message`:
//! the element name, the common routing attributes and at most one typed
//! payload. Decoding is deliberately lenient; anything the model does not
//! understand is kept in the original element so it can be forwarded
//! untouched.

use minidom::Element;

use crate::parser::{decode_element, ns};
use crate::types::StanzaKind;
use crate::XmppError;

/// IQ `type` attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IqType {
    /// Request for information
    Get,
    /// Request to change state
    Set,
    /// Successful response
    Result,
    /// Error response
    Error,
}

impl IqType {
    /// Parse the `type` attribute of an IQ.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "get" => Some(Self::Get),
            "set" => Some(Self::Set),
            "result" => Some(Self::Result),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether this IQ expects a response.
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Get | Self::Set)
    }
}

/// Child element of an IQ that is not bind or session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Local name of the payload element (`query`, `vCard`, `ping`, ...)
    pub name: String,
    /// Namespace of the payload element
    pub namespace: String,
    /// Optional disco `node` attribute
    pub node: Option<String>,
}

impl Query {
    /// Whether the payload has the given name and namespace.
    pub fn is(&self, name: &str, namespace: &str) -> bool {
        self.name == name && self.namespace == namespace
    }
}

/// Presence fields carried by an inbound presence stanza.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceUpdate {
    /// `<show/>` text, kept as free text
    pub show: Option<String>,
    /// `<status/>` text
    pub status: Option<String>,
    /// `<priority/>` value
    pub priority: Option<i8>,
}

/// Typed payload of a stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Resource bind request (RFC 6120 Section 7)
    Bind {
        /// Requested resource, if any
        resource: Option<String>,
    },
    /// Session establishment request (RFC 3921)
    Session,
    /// Any other IQ payload (disco, vCard, roster, ping)
    Query(Query),
    /// Presence information
    Presence(PresenceUpdate),
    /// Message content
    Message {
        /// `<body/>` text
        body: Option<String>,
    },
}

/// A decoded stanza.
#[derive(Debug, Clone)]
pub struct Stanza {
    /// Element name
    pub name: String,
    /// `from` attribute
    pub from: Option<String>,
    /// `to` attribute
    pub to: Option<String>,
    /// `type` attribute
    pub type_: Option<String>,
    /// `id` attribute
    pub id: Option<String>,
    /// `xml:lang` attribute
    pub lang: Option<String>,
    /// Typed payload
    pub payload: Option<Payload>,
    element: Element,
}

impl Stanza {
    /// Decode a framed element.
    pub fn decode(raw: &[u8]) -> Result<Self, XmppError> {
        Self::from_element(decode_element(raw)?)
    }

    /// Build a stanza from a parsed element.
    pub fn from_element(element: Element) -> Result<Self, XmppError> {
        let payload = if element.ns() != ns::JABBER_CLIENT {
            None
        } else {
            match element.name() {
                "iq" => iq_payload(&element),
                "presence" => Some(Payload::Presence(presence_payload(&element)?)),
                "message" => Some(Payload::Message {
                    body: element
                        .get_child("body", ns::JABBER_CLIENT)
                        .map(|b| b.text()),
                }),
                _ => None,
            }
        };

        Ok(Self {
            name: element.name().to_string(),
            from: element.attr("from").map(str::to_string),
            to: element.attr("to").map(str::to_string),
            type_: element.attr("type").map(str::to_string),
            id: element.attr("id").map(str::to_string),
            lang: element.attr("xml:lang").map(str::to_string),
            payload,
            element,
        })
    }

    /// Kind of stanza, for tracing.
    pub fn kind(&self) -> StanzaKind {
        if self.element.ns() == ns::JABBER_CLIENT {
            StanzaKind::from_name(&self.name)
        } else {
            StanzaKind::Other
        }
    }

    /// Parsed IQ type, if this is an IQ with a valid `type`.
    pub fn iq_type(&self) -> Option<IqType> {
        if self.kind() != StanzaKind::Iq {
            return None;
        }
        self.type_.as_deref().and_then(IqType::parse)
    }

    /// Whether this is a session request.
    pub fn is_session(&self) -> bool {
        matches!(self.payload, Some(Payload::Session))
    }

    /// Copy of the element with `from` replaced.
    ///
    /// All other attributes (`xml:lang` included) and every child node are
    /// carried over as-is.
    pub fn restamp(&self, from: &str) -> Element {
        let mut builder = Element::builder(self.element.name(), self.element.ns());
        for (name, value) in self.element.attrs() {
            if name != "from" {
                builder = builder.attr(name, value);
            }
        }
        builder
            .attr("from", from)
            .append_all(self.element.nodes().cloned())
            .build()
    }
}

/// Context handed to payload builders answering an IQ request.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    /// `id` of the request, echoed in the result
    pub id: &'a str,
    /// Bound identity of the requesting session
    pub requester: &'a str,
    /// Server domain, used as `from` of the result
    pub domain: &'a str,
    /// `to` of the request, if any
    pub target: Option<&'a str>,
    /// Disco `node` of the request, if any
    pub node: Option<&'a str>,
}

/// Build `<iq type='result'/>` answering the request in `ctx`.
pub fn build_iq_result(ctx: &RequestContext<'_>, payload: Option<Element>) -> Element {
    let builder = Element::builder("iq", ns::JABBER_CLIENT)
        .attr("type", "result")
        .attr("id", ctx.id)
        .attr("from", ctx.domain)
        .attr("to", ctx.requester);

    match payload {
        Some(payload) => builder.append(payload).build(),
        None => builder.build(),
    }
}

/// Build the bind result carrying the bound identity.
pub fn build_bind_result(ctx: &RequestContext<'_>, jid: &str) -> Element {
    let bind = Element::builder("bind", ns::BIND)
        .append(Element::builder("jid", ns::BIND).append(jid.to_string()))
        .build();
    build_iq_result(ctx, Some(bind))
}

fn iq_payload(element: &Element) -> Option<Payload> {
    let child = element.children().next()?;

    if child.is("bind", ns::BIND) {
        let resource = child
            .get_child("resource", ns::BIND)
            .map(|r| r.text().trim().to_string())
            .filter(|r| !r.is_empty());
        return Some(Payload::Bind { resource });
    }

    if child.is("session", ns::SESSION) {
        return Some(Payload::Session);
    }

    Some(Payload::Query(Query {
        name: child.name().to_string(),
        namespace: child.ns().to_string(),
        node: child.attr("node").map(str::to_string),
    }))
}

fn presence_payload(element: &Element) -> Result<PresenceUpdate, XmppError> {
    let text = |name: &str| {
        element
            .get_child(name, ns::JABBER_CLIENT)
            .map(|c| c.text().trim().to_string())
    };

    let priority = match text("priority") {
        Some(value) => Some(
            value
                .parse::<i8>()
                .map_err(|_| XmppError::decode(format!("Invalid presence priority: {}", value)))?,
        ),
        None => None,
    };

    Ok(PresenceUpdate {
        show: text("show").filter(|s| !s.is_empty()),
        status: text("status"),
        priority,
    })
}
