//! Service Discovery (XEP-0030) implementation.
//!
//! Answers disco#info and disco#items queries addressed to the server.
//!
//! ## Features Advertised
//!
//! - `http://jabber.org/protocol/disco#info`
//! - `http://jabber.org/protocol/disco#items`
//! - `jabber:iq:roster`
//! - `vcard-temp`
//! - `urn:xmpp:ping`

pub mod info;
pub mod items;

pub use info::{build_disco_info_response, server_features, Feature, Identity, DISCO_INFO_NS};
pub use items::{build_disco_items_response, DISCO_ITEMS_NS};
