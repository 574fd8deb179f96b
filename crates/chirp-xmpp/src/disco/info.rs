//! Service Discovery: disco#info handling.

use minidom::Element;
use tracing::debug;

use crate::parser::ns;
use crate::stanza::{build_iq_result, RequestContext};

/// Service Discovery info namespace (XEP-0030).
pub const DISCO_INFO_NS: &str = "http://jabber.org/protocol/disco#info";

/// Identity element for disco#info response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Category (e.g., "server")
    pub category: String,
    /// Type (e.g., "im")
    pub type_: String,
    /// Optional name (human-readable)
    pub name: Option<String>,
}

impl Identity {
    /// Create a new identity.
    pub fn new(category: &str, type_: &str, name: Option<&str>) -> Self {
        Self {
            category: category.to_string(),
            type_: type_.to_string(),
            name: name.map(|s| s.to_string()),
        }
    }

    /// Server identity (category="server", type="im").
    pub fn server(name: Option<&str>) -> Self {
        Self::new("server", "im", name)
    }
}

/// Feature element for disco#info response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature(pub String);

impl Feature {
    /// Create a new feature.
    pub fn new(var: &str) -> Self {
        Self(var.to_string())
    }

    /// disco#info feature
    pub fn disco_info() -> Self {
        Self::new(DISCO_INFO_NS)
    }

    /// disco#items feature
    pub fn disco_items() -> Self {
        Self::new(super::items::DISCO_ITEMS_NS)
    }

    /// Roster feature
    pub fn roster() -> Self {
        Self::new(ns::ROSTER)
    }

    /// vcard-temp feature (XEP-0054)
    pub fn vcard() -> Self {
        Self::new(ns::VCARD)
    }

    /// XMPP Ping feature (XEP-0199)
    pub fn ping() -> Self {
        Self::new(ns::PING)
    }
}

/// Get the standard server features.
pub fn server_features() -> Vec<Feature> {
    vec![
        Feature::disco_info(),
        Feature::disco_items(),
        Feature::roster(),
        Feature::vcard(),
        Feature::ping(),
    ]
}

/// Build a disco#info result.
pub fn build_disco_info_response(
    ctx: &RequestContext<'_>,
    identities: &[Identity],
    features: &[Feature],
) -> Element {
    let mut query_builder = Element::builder("query", DISCO_INFO_NS);

    if let Some(node) = ctx.node {
        query_builder = query_builder.attr("node", node);
    }

    for identity in identities {
        let mut id_builder = Element::builder("identity", DISCO_INFO_NS)
            .attr("category", &identity.category)
            .attr("type", &identity.type_);

        if let Some(ref name) = identity.name {
            id_builder = id_builder.attr("name", name);
        }

        query_builder = query_builder.append(id_builder.build());
    }

    for feature in features {
        let feat_elem = Element::builder("feature", DISCO_INFO_NS)
            .attr("var", &feature.0)
            .build();
        query_builder = query_builder.append(feat_elem);
    }

    debug!(
        identities = identities.len(),
        features = features.len(),
        "Built disco#info response"
    );

    build_iq_result(ctx, Some(query_builder.build()))
}
