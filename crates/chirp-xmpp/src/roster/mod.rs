//! Roster listing (RFC 6121).
//!
//! There is no roster storage; a roster get is answered with everyone who
//! is currently online, each with `subscription='both'`.
//!
//! ```xml
//! <iq type='result' id='roster-1' from='localhost' to='alice@localhost/phone'>
//!   <query xmlns='jabber:iq:roster'>
//!     <item jid='bob@localhost' name='bob' subscription='both'/>
//!   </query>
//! </iq>
//! ```

use minidom::Element;

use crate::parser::ns;
use crate::registry::SessionHandle;
use crate::stanza::{build_iq_result, RequestContext};

/// Namespace for RFC 6121 Roster Management.
pub const ROSTER_NS: &str = ns::ROSTER;

/// A roster item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterItem {
    /// The contact's bare JID
    pub jid: String,
    /// Human-readable name
    pub name: Option<String>,
}

impl RosterItem {
    /// Create a roster item named after the JID's local part.
    pub fn new(jid: &str) -> Self {
        let name = jid.split('@').next().filter(|local| !local.is_empty() && *local != jid);
        Self {
            jid: jid.to_string(),
            name: name.map(str::to_string),
        }
    }

    /// Convert to an `<item/>` element.
    pub fn to_element(&self) -> Element {
        let mut builder = Element::builder("item", ROSTER_NS)
            .attr("jid", &self.jid)
            .attr("subscription", "both");
        if let Some(ref name) = self.name {
            builder = builder.attr("name", name);
        }
        builder.build()
    }
}

/// Roster items for `requester` from a registry snapshot.
///
/// Sessions are collapsed to their bare identity and the requester's own
/// account is left out. The snapshot's identity order is preserved.
pub fn online_roster(requester: &str, sessions: &[SessionHandle]) -> Vec<RosterItem> {
    let own_bare = crate::registry::bare_of(requester);
    let mut items: Vec<RosterItem> = Vec::new();
    for session in sessions {
        let bare = session.bare_jid();
        if bare == own_bare || items.iter().any(|item| item.jid == bare) {
            continue;
        }
        items.push(RosterItem::new(bare));
    }
    items
}

/// Build a roster result.
pub fn build_roster_result(ctx: &RequestContext<'_>, items: &[RosterItem]) -> Element {
    let mut query_builder = Element::builder("query", ROSTER_NS);
    for item in items {
        query_builder = query_builder.append(item.to_element());
    }
    build_iq_result(ctx, Some(query_builder.build()))
}
