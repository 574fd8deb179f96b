//! Error types for the XMPP server.

use thiserror::Error;

use crate::parser::ns;

/// XMPP server errors.
///
/// Errors are split into fatal ones, which end the connection, and per-stanza
/// ones, which drop a single element and keep the connection alive. See
/// [`XmppError::is_fatal`].
#[derive(Debug, Error)]
pub enum XmppError {
    /// IO error (network)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport closed while a read was outstanding.
    #[error("Connection closed by peer")]
    EndOfStream,

    /// SASL PLAIN payload could not be decoded into credentials.
    #[error("Malformed authentication: {0}")]
    MalformedAuth(String),

    /// A complete element could not be decoded into the stanza model.
    #[error("Decode error: {0}")]
    Decode(String),

    /// An element with a name the dispatcher does not handle.
    #[error("Unknown stanza: {0}")]
    UnknownStanza(String),

    /// Destination identity is not registered.
    #[error("No session for {0}")]
    RouteMiss(String),

    /// The peer violated a local limit (e.g. stanza size).
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// The peer was idle for longer than the configured timeout.
    #[error("Connection idle timeout")]
    Timeout,

    /// Stream error
    #[error("Stream error: {0}")]
    Stream(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl XmppError {
    /// Create a new malformed authentication error.
    pub fn malformed_auth(msg: impl Into<String>) -> Self {
        Self::MalformedAuth(msg.into())
    }

    /// Create a new decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new unknown stanza error.
    pub fn unknown_stanza(name: impl Into<String>) -> Self {
        Self::UnknownStanza(name.into())
    }

    /// Create a new route miss error.
    pub fn route_miss(to: impl Into<String>) -> Self {
        Self::RouteMiss(to.into())
    }

    /// Create a new policy violation error.
    pub fn policy_violation(msg: impl Into<String>) -> Self {
        Self::PolicyViolation(msg.into())
    }

    /// Create a new stream error.
    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error terminates the connection.
    ///
    /// Decode failures, unknown stanzas and route misses are isolated to the
    /// element that caused them.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Decode(_) | Self::UnknownStanza(_) | Self::RouteMiss(_)
        )
    }
}

/// XMPP stanza error conditions (RFC 6120 Section 8.3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorCondition {
    /// Bad request (malformed XML, etc.)
    BadRequest,
    /// Service unavailable
    ServiceUnavailable,
}

impl StanzaErrorCondition {
    /// Get the element name for this condition.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::ServiceUnavailable => "service-unavailable",
        }
    }
}

impl std::fmt::Display for StanzaErrorCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// XMPP stanza error types (RFC 6120 Section 8.3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaErrorType {
    /// Retry after providing credentials
    Auth,
    /// Do not retry (unrecoverable error)
    Cancel,
    /// Retry after changing the data sent
    Modify,
    /// Retry after waiting (temporary error)
    Wait,
}

impl StanzaErrorType {
    /// Get the type attribute value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Cancel => "cancel",
            Self::Modify => "modify",
            Self::Wait => "wait",
        }
    }
}

impl std::fmt::Display for StanzaErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Generate an IQ error response.
pub fn generate_iq_error(
    id: &str,
    to: Option<&str>,
    from: Option<&str>,
    condition: StanzaErrorCondition,
    error_type: StanzaErrorType,
) -> String {
    let mut iq = format!("<iq type='error' id='{}'", escape_attr(id));

    if let Some(to) = to {
        iq.push_str(&format!(" to='{}'", escape_attr(to)));
    }

    if let Some(from) = from {
        iq.push_str(&format!(" from='{}'", escape_attr(from)));
    }

    iq.push_str(&format!(
        "><error type='{}'><{} xmlns='{}'/></error></iq>",
        error_type.as_str(),
        condition.as_str(),
        ns::STANZAS,
    ));

    iq
}

/// Generate a stream error and close tag.
///
/// Stream errors are fatal and must be followed by closing the stream.
pub fn generate_stream_error(condition: &str, text: Option<&str>) -> String {
    let mut error = format!("<stream:error><{} xmlns='{}'/>", condition, ns::STREAM_ERRORS);

    if let Some(t) = text {
        error.push_str(&format!(
            "<text xmlns='{}' xml:lang='en'>{}</text>",
            ns::STREAM_ERRORS,
            escape_text(t)
        ));
    }

    error.push_str("</stream:error></stream:stream>");
    error
}

/// Stream error conditions used by this server.
pub mod stream_errors {
    /// Stream error: connection timeout
    pub const CONNECTION_TIMEOUT: &str = "connection-timeout";
    /// Stream error: policy violation
    pub const POLICY_VIOLATION: &str = "policy-violation";
    /// Stream error: system shutdown
    pub const SYSTEM_SHUTDOWN: &str = "system-shutdown";
}

/// Escape a value for use inside a single-quoted XML attribute.
pub(crate) fn escape_attr(value: &str) -> String {
    escape_text(value).replace('\'', "&apos;").replace('"', "&quot;")
}

/// Escape character data.
pub(crate) fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
