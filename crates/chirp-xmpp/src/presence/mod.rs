//! Presence management.
//!
//! Each session owns one [`Presence`]. It is replaced wholesale by every
//! inbound presence stanza and read by the broadcast path to build the
//! updates other sessions receive.

use chrono::{DateTime, Utc};
use minidom::Element;

use crate::parser::ns;
use crate::stanza::PresenceUpdate;

/// Show value of a freshly established session.
pub const DEFAULT_SHOW: &str = "chat";
/// Status text of a freshly established session.
pub const DEFAULT_STATUS: &str = "Online";

/// Current presence of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    /// Free-text show label ("chat", "away", ...); empty means plain available
    pub show: String,
    /// Custom status message
    pub status: String,
    /// Priority (-128 to 127)
    pub priority: i8,
    /// Presence `type`, e.g. "unavailable"; `None` means available
    pub type_: Option<String>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Default for Presence {
    fn default() -> Self {
        Self {
            show: DEFAULT_SHOW.to_string(),
            status: DEFAULT_STATUS.to_string(),
            priority: 0,
            type_: None,
            updated_at: Utc::now(),
        }
    }
}

impl Presence {
    /// Presence announced when a session goes away.
    pub fn unavailable() -> Self {
        Self {
            show: String::new(),
            status: String::new(),
            priority: 0,
            type_: Some("unavailable".to_string()),
            updated_at: Utc::now(),
        }
    }

    /// Replace this presence with the contents of an inbound stanza.
    pub fn apply(&mut self, update: &PresenceUpdate, type_: Option<&str>) {
        self.show = update.show.clone().unwrap_or_default();
        self.status = update.status.clone().unwrap_or_default();
        self.priority = update.priority.unwrap_or(0);
        self.type_ = type_.map(str::to_string);
        self.updated_at = Utc::now();
    }

    /// Check if this presence indicates the user is available.
    pub fn is_available(&self) -> bool {
        self.type_.is_none()
    }
}

/// Build the presence update delivered to `to` on behalf of `from`.
pub fn build_presence_update(from: &str, to: &str, presence: &Presence) -> Element {
    let mut builder = Element::builder("presence", ns::JABBER_CLIENT)
        .attr("from", from)
        .attr("to", to);

    if let Some(ref type_) = presence.type_ {
        builder = builder.attr("type", type_);
    }
    if !presence.show.is_empty() {
        builder = builder
            .append(Element::builder("show", ns::JABBER_CLIENT).append(presence.show.clone()));
    }
    if !presence.status.is_empty() {
        builder = builder.append(
            Element::builder("status", ns::JABBER_CLIENT).append(presence.status.clone()),
        );
    }
    if presence.priority != 0 {
        builder = builder.append(
            Element::builder("priority", ns::JABBER_CLIENT).append(presence.priority.to_string()),
        );
    }

    builder.build()
}
