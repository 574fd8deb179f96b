//! XEP-0199: XMPP Ping
//!
//! A ping addressed to the server is answered with an empty result.

use minidom::Element;

use crate::parser::ns;
use crate::stanza::{build_iq_result, RequestContext};

/// Namespace for XMPP Ping.
pub const NS_PING: &str = ns::PING;

/// Build the empty result answering a ping.
pub fn build_ping_result(ctx: &RequestContext<'_>) -> Element {
    build_iq_result(ctx, None)
}
