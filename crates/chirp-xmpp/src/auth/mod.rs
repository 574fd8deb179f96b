//! SASL authentication.
//!
//! Only SASL PLAIN (RFC 4616) is offered. Credentials are decoded and the
//! authentication identity is mapped onto the server domain; passwords are
//! not verified.

use base64::prelude::*;
use jid::BareJid;

use crate::XmppError;

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslMechanism {
    /// PLAIN mechanism (RFC 4616)
    Plain,
}

impl SaslMechanism {
    /// Parse a mechanism name string into a SaslMechanism.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PLAIN" => Some(SaslMechanism::Plain),
            _ => None,
        }
    }
}

impl std::fmt::Display for SaslMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaslMechanism::Plain => write!(f, "PLAIN"),
        }
    }
}

/// Decoded SASL PLAIN message.
#[derive(Clone, PartialEq, Eq)]
pub struct PlainCredentials {
    /// Optional authorization identity
    pub authzid: Option<String>,
    /// Authentication identity
    pub authcid: String,
    /// Password
    pub password: String,
}

impl std::fmt::Debug for PlainCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainCredentials")
            .field("authzid", &self.authzid)
            .field("authcid", &self.authcid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Decode the base64 payload of a PLAIN `<auth/>` element.
///
/// Format: `authzid \0 authcid \0 password`. The authzid may be empty.
pub fn parse_plain(payload: &str) -> Result<PlainCredentials, XmppError> {
    let decoded = BASE64_STANDARD
        .decode(payload.trim())
        .map_err(|e| XmppError::malformed_auth(format!("Invalid base64: {}", e)))?;

    let parts: Vec<&[u8]> = decoded.splitn(3, |&b| b == 0).collect();
    if parts.len() < 3 {
        return Err(XmppError::malformed_auth(format!(
            "Expected 3 NUL-separated fields, got {}",
            parts.len()
        )));
    }

    let field = |bytes: &[u8]| {
        String::from_utf8(bytes.to_vec())
            .map_err(|_| XmppError::malformed_auth("SASL PLAIN field is not UTF-8"))
    };

    let authzid = field(parts[0])?;
    Ok(PlainCredentials {
        authzid: (!authzid.is_empty()).then_some(authzid),
        authcid: field(parts[1])?,
        password: field(parts[2])?,
    })
}

/// Map an authentication identity onto `user@domain`.
///
/// Clients commonly send the full address as authcid; only the local part
/// is kept so every session lives on the server's own domain.
pub fn bare_identity(authcid: &str, domain: &str) -> Result<BareJid, XmppError> {
    let local = authcid.split('@').next().unwrap_or_default().trim();
    if local.is_empty() {
        return Err(XmppError::malformed_auth("Empty authentication identity"));
    }

    format!("{}@{}", local, domain)
        .parse::<BareJid>()
        .map_err(|e| XmppError::malformed_auth(format!("Invalid JID: {}", e)))
}
