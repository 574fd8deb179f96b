//! # chirp-xmpp
//!
//! Minimal XMPP client-to-server core for Chirp.
//!
//! This crate implements the client side of RFC 6120/6121 far enough for
//! clients on one domain to log in, see who is online and message each other,
//! designed to be embedded in `chirp-server`.
//!
//! ## Architecture
//!
//! - **Server**: TCP listener on port 5222 (C2S), one task per connection
//! - **Framer**: incremental slicing of the byte stream into elements
//! - **Connection Actors**: negotiation state machine (SASL PLAIN, bind, session)
//! - **Dispatcher**: IQ, presence and message handling for active sessions
//! - **Session Registry**: bound identities, routing and presence broadcast
//!
//! Every connection owns a bounded outbound queue drained by a dedicated
//! writer task, so a peer that stops reading never stalls anyone else.
//!
//! ## XEP Support
//!
//! - XEP-0030 (Service Discovery)
//! - XEP-0054 (vcard-temp, synthesized)
//! - XEP-0199 (XMPP Ping)

pub mod auth;
pub mod connection;
pub mod disco;
pub mod dispatch;
pub mod framer;
pub mod parser;
pub mod presence;
pub mod registry;
pub mod roster;
pub mod server;
pub mod stanza;
pub mod stream;
pub mod xep;

mod error;
mod types;

pub use connection::ConnectionActor;
pub use dispatch::StanzaDispatcher;
pub use error::{
    generate_iq_error, generate_stream_error, stream_errors, StanzaErrorCondition, StanzaErrorType,
    XmppError,
};
pub use framer::{Frame, FrameBuffer, Framer};
pub use parser::{ns, StreamHeader};
pub use registry::{OutboundStanza, SendResult, SessionHandle, SessionRegistry};
pub use server::{XmppServer, XmppServerConfig};
pub use stanza::Stanza;
pub use types::*;

use tokio_util::sync::CancellationToken;

/// Start the XMPP server and run it until `shutdown` is cancelled.
pub async fn start(
    config: XmppServerConfig,
    shutdown: CancellationToken,
) -> Result<(), XmppError> {
    let server = XmppServer::new(config).await?;
    server.run(shutdown).await
}
