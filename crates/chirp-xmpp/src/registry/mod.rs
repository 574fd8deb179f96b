//! Session Registry for presence broadcast and message routing.
//!
//! Every session that completes negotiation registers a [`SessionHandle`]
//! under its bound identity. Other sessions look handles up to route
//! messages and take snapshots to broadcast presence.
//!
//! ## Architecture
//!
//! ```text
//! ConnectionActor (alice@domain/phone) --> SessionRegistry --> SessionHandle (bob@domain/desk)
//!                                               |                     |
//!                                               v                     v
//!                                  Mutex<BTreeMap<String,      mpsc::Sender --> writer task
//!                                        SessionHandle>>
//! ```
//!
//! The map lock is only held to copy handles out. Delivery happens after it
//! is released and never waits on a peer: a full outbound queue drops the
//! stanza for that peer.

mod session_registry;

pub use session_registry::{OutboundStanza, SendResult, SessionHandle, SessionRegistry};
pub(crate) use session_registry::bare_of;
