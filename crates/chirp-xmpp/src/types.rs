//! Common types for the XMPP server.

/// Negotiation state of a client connection.
///
/// States only move forward; `Active` loops on itself until the connection
/// ends in `Closed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NegotiationState {
    /// Transport accepted, nothing sent yet
    Connected,
    /// Server stream header sent
    StreamOpen,
    /// SASL mechanisms advertised, waiting for `<auth>`
    AwaitingAuth,
    /// SASL PLAIN accepted
    Authenticated,
    /// Old stream closed and a fresh one opened
    StreamRestarted,
    /// Bind and session features advertised
    FeaturesSent,
    /// Resource bound
    Bound,
    /// Session request answered
    SessionEstablished,
    /// Registered and dispatching stanzas
    Active,
    /// Orderly shutdown
    Closed,
    /// Negotiation or transport failure
    Failed,
}

impl NegotiationState {
    /// Whether the connection loop has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Whether the session has been authenticated.
    pub fn is_authenticated(&self) -> bool {
        *self >= Self::Authenticated && !self.is_terminal()
    }
}

impl std::fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connected => "connected",
            Self::StreamOpen => "stream_open",
            Self::AwaitingAuth => "awaiting_auth",
            Self::Authenticated => "authenticated",
            Self::StreamRestarted => "stream_restarted",
            Self::FeaturesSent => "features_sent",
            Self::Bound => "bound",
            Self::SessionEstablished => "session_established",
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Stanza kind for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaKind {
    /// Message stanza
    Message,
    /// Presence stanza
    Presence,
    /// IQ (info/query) stanza
    Iq,
    /// Anything else
    Other,
}

impl StanzaKind {
    /// Classify by element name.
    pub fn from_name(name: &str) -> Self {
        match name {
            "message" => Self::Message,
            "presence" => Self::Presence,
            "iq" => Self::Iq,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for StanzaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StanzaKind::Message => write!(f, "message"),
            StanzaKind::Presence => write!(f, "presence"),
            StanzaKind::Iq => write!(f, "iq"),
            StanzaKind::Other => write!(f, "other"),
        }
    }
}
