//! XMPP Extension Protocols (XEPs) Implementation
//!
//! ## Implemented XEPs
//!
//! - **XEP-0054**: vcard-temp - A generated profile for online users.
//! - **XEP-0199**: XMPP Ping - Application-level keepalive.

pub mod xep0054;
pub mod xep0199;

pub use xep0054::{build_vcard_response, VCard, NS_VCARD};
pub use xep0199::{build_ping_result, NS_PING};
