//! XML helpers for XMPP streams: namespaces, stream headers and element
//! decoding via minidom.
//!
//! Stanzas inside a stream do not carry their own default namespace; they
//! inherit `jabber:client` from the stream root. minidom requires namespace
//! declarations, so decoding re-wraps each framed element in a stream root
//! carrying the same declarations the client's stream header established.

use minidom::Element;

use crate::XmppError;

/// Namespace URIs used in XMPP
pub mod ns {
    /// XMPP client namespace
    pub const JABBER_CLIENT: &str = "jabber:client";
    /// XMPP streams namespace
    pub const STREAM: &str = "http://etherx.jabber.org/streams";
    /// Stream error namespace
    pub const STREAM_ERRORS: &str = "urn:ietf:params:xml:ns:xmpp-streams";
    /// SASL namespace
    pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
    /// Resource binding namespace
    pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
    /// Session namespace
    pub const SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
    /// Stanza error namespace
    pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
    /// Roster namespace (RFC 6121)
    pub const ROSTER: &str = "jabber:iq:roster";
    /// vcard-temp namespace (XEP-0054)
    pub const VCARD: &str = "vcard-temp";
    /// XMPP Ping namespace (XEP-0199)
    pub const PING: &str = "urn:xmpp:ping";
}

/// Parsed stream header information.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamHeader {
    /// The 'to' attribute (target domain)
    pub to: Option<String>,
    /// The 'from' attribute (source entity)
    pub from: Option<String>,
    /// The 'id' attribute (stream ID, set by server)
    pub id: Option<String>,
    /// The 'version' attribute (should be "1.0")
    pub version: Option<String>,
    /// The 'xml:lang' attribute
    pub lang: Option<String>,
}

impl StreamHeader {
    /// Parse a stream header from the raw opening tag.
    ///
    /// The tag is intentionally unclosed XML, so attributes are extracted
    /// directly instead of going through an XML parser.
    pub fn parse(tag: &str) -> Result<Self, XmppError> {
        let start = tag
            .find("<stream:stream")
            .ok_or_else(|| XmppError::stream("No stream:stream element found"))?;

        let tag = &tag[start..];
        if !tag.ends_with('>') {
            return Err(XmppError::stream("Incomplete stream header"));
        }

        Ok(StreamHeader {
            to: extract_attribute(tag, "to"),
            from: extract_attribute(tag, "from"),
            id: extract_attribute(tag, "id"),
            version: extract_attribute(tag, "version"),
            lang: extract_attribute(tag, "xml:lang"),
        })
    }

    /// Validate the stream header per RFC 6120.
    pub fn validate(&self) -> Result<(), XmppError> {
        if let Some(ref version) = self.version {
            if version != "1.0" {
                return Err(XmppError::stream(format!(
                    "Unsupported XMPP version: {}",
                    version
                )));
            }
        }
        Ok(())
    }
}

/// Extract an attribute value from an XML tag string.
///
/// The attribute name must be preceded by whitespace so that `id` does not
/// match inside `sid`.
pub(crate) fn extract_attribute(tag: &str, name: &str) -> Option<String> {
    for quote in ['"', '\''] {
        let pattern = format!("{}={}", name, quote);
        let mut offset = 0;
        while let Some(found) = tag[offset..].find(&pattern) {
            let start = offset + found;
            let preceded_by_space = tag[..start]
                .chars()
                .next_back()
                .map(char::is_whitespace)
                .unwrap_or(false);
            let value_start = start + pattern.len();
            if preceded_by_space {
                if let Some(value_end) = tag[value_start..].find(quote) {
                    return Some(tag[value_start..value_start + value_end].to_string());
                }
            }
            offset = value_start;
        }
    }
    None
}

/// Decode one framed element into a minidom Element.
///
/// The element is parsed in the context of a `jabber:client` stream so that
/// un-namespaced stanzas resolve the way they do on the wire.
pub fn decode_element(raw: &[u8]) -> Result<Element, XmppError> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| XmppError::decode(format!("Invalid UTF-8: {}", e)))?;

    let wrapped = format!(
        "<stream:stream xmlns='{}' xmlns:stream='{}'>{}</stream:stream>",
        ns::JABBER_CLIENT,
        ns::STREAM,
        text
    );

    let root = wrapped
        .parse::<Element>()
        .map_err(|e| XmppError::decode(format!("Failed to parse element: {}", e)))?;

    root.children()
        .next()
        .cloned()
        .ok_or_else(|| XmppError::decode("Frame contained no element"))
}

/// Convert a minidom Element back to an XML string.
pub fn element_to_string(element: &Element) -> Result<String, XmppError> {
    let mut output = Vec::new();
    element
        .write_to(&mut output)
        .map_err(|e| XmppError::internal(format!("Failed to serialize element: {}", e)))?;
    String::from_utf8(output).map_err(|e| XmppError::internal(format!("Invalid UTF-8: {}", e)))
}
