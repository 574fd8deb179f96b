//! Service Discovery: disco#items handling.

use minidom::Element;

use crate::stanza::{build_iq_result, RequestContext};

/// Service Discovery items namespace (XEP-0030).
pub const DISCO_ITEMS_NS: &str = "http://jabber.org/protocol/disco#items";

/// Build a disco#items result. The server hosts no components, so the
/// query is always empty.
pub fn build_disco_items_response(ctx: &RequestContext<'_>) -> Element {
    let mut query_builder = Element::builder("query", DISCO_ITEMS_NS);

    if let Some(node) = ctx.node {
        query_builder = query_builder.attr("node", node);
    }

    build_iq_result(ctx, Some(query_builder.build()))
}
