//! XEP-0054: vcard-temp
//!
//! Profiles are not stored. A vCard request is answered with a profile
//! generated from the address being asked about: the requested bare JID,
//! or the requester's own when the request is addressed to the account.

use minidom::Element;

use crate::registry::bare_of;
use crate::stanza::{build_iq_result, RequestContext};

/// Namespace for vcard-temp.
pub const NS_VCARD: &str = crate::parser::ns::VCARD;

/// Generated vCard contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VCard {
    /// Formatted name (`FN`)
    pub full_name: String,
    /// Nickname (`NICKNAME`)
    pub nickname: String,
    /// Address (`JABBERID`)
    pub jabber_id: String,
}

impl VCard {
    /// Profile for a bare JID, named after its local part.
    pub fn for_jid(bare: &str) -> Self {
        let local = bare.split('@').next().unwrap_or(bare).to_string();
        Self {
            full_name: local.clone(),
            nickname: local,
            jabber_id: bare.to_string(),
        }
    }

    /// Convert to a `<vCard/>` element.
    pub fn to_element(&self) -> Element {
        let field = |name: &str, value: &str| {
            Element::builder(name, NS_VCARD).append(value.to_string()).build()
        };
        Element::builder("vCard", NS_VCARD)
            .append(field("FN", &self.full_name))
            .append(field("NICKNAME", &self.nickname))
            .append(field("JABBERID", &self.jabber_id))
            .build()
    }
}

/// Build the vCard result for the request in `ctx`.
pub fn build_vcard_response(ctx: &RequestContext<'_>) -> Element {
    // A request to the server domain or without `to` is about the requester.
    let subject = match ctx.target {
        Some(target) if target.contains('@') => bare_of(target),
        _ => bare_of(ctx.requester),
    };
    build_iq_result(ctx, Some(VCard::for_jid(subject).to_element()))
}
