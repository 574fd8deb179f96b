//! Session Registry implementation.
//!
//! Tracks live sessions by their bound identity.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::parser::element_to_string;
use crate::presence::{build_presence_update, Presence};
use crate::XmppError;

/// Serialized XML queued for a session's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundStanza {
    /// The XML to write
    pub xml: String,
}

impl OutboundStanza {
    /// Create a new outbound stanza.
    pub fn new(xml: impl Into<String>) -> Self {
        Self { xml: xml.into() }
    }
}

/// Result of attempting to send a stanza to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Stanza was queued for delivery
    Sent,
    /// The recipient is not currently connected
    NotConnected,
    /// The recipient's outbound queue is full; the stanza was dropped
    ChannelFull,
    /// The recipient's writer has gone away
    ChannelClosed,
}

/// Handle to a live session.
///
/// Cloning is cheap; all clones share the outbound queue and presence.
#[derive(Clone)]
pub struct SessionHandle {
    /// Bound identity (`user@domain` or `user@domain/resource`)
    jid: String,
    /// Identifies the connection that owns this session
    conn_id: Uuid,
    /// Queue drained by the session's writer task
    outbound: mpsc::Sender<OutboundStanza>,
    /// Current presence, written only by the owning connection
    presence: Arc<RwLock<Presence>>,
}

impl SessionHandle {
    /// Create a handle with the default presence.
    pub fn new(jid: impl Into<String>, conn_id: Uuid, outbound: mpsc::Sender<OutboundStanza>) -> Self {
        Self {
            jid: jid.into(),
            conn_id,
            outbound,
            presence: Arc::new(RwLock::new(Presence::default())),
        }
    }

    /// Bound identity of this session.
    pub fn jid(&self) -> &str {
        &self.jid
    }

    /// Bare part of the bound identity.
    pub fn bare_jid(&self) -> &str {
        bare_of(&self.jid)
    }

    /// Connection that owns this session.
    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Copy of the current presence.
    pub fn presence(&self) -> Presence {
        self.presence.read().clone()
    }

    /// Mutate the presence in place.
    pub fn update_presence(&self, f: impl FnOnce(&mut Presence)) {
        let mut presence = self.presence.write();
        f(&mut *presence);
    }

    /// Queue a reply to this session's own request, waiting for room.
    pub async fn deliver(&self, stanza: OutboundStanza) -> Result<(), XmppError> {
        self.outbound
            .send(stanza)
            .await
            .map_err(|_| XmppError::stream("Outbound writer closed"))
    }

    /// Queue a stanza without waiting.
    pub fn try_deliver(&self, stanza: OutboundStanza) -> SendResult {
        match self.outbound.try_send(stanza) {
            Ok(()) => SendResult::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(to = %self.jid, "Outbound queue full, dropping stanza");
                SendResult::ChannelFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(to = %self.jid, "Outbound queue closed, session is going away");
                SendResult::ChannelClosed
            }
        }
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("jid", &self.jid)
            .field("conn_id", &self.conn_id)
            .finish_non_exhaustive()
    }
}

/// Registry of live sessions.
///
/// A single mutex guards the map; every operation holds it only for the
/// duration of a map access and never across a send.
///
/// ## Usage
///
/// ```ignore
/// let registry = SessionRegistry::new();
///
/// // When a session is established:
/// let (tx, rx) = mpsc::channel(256);
/// let handle = SessionHandle::new("alice@localhost/phone", conn_id, tx);
/// registry.register(handle.clone());
/// registry.broadcast_presence(&handle);
///
/// // When routing a message:
/// let result = registry.send_to("bob@localhost/desk", OutboundStanza::new(xml));
///
/// // When the connection closes:
/// registry.unregister_session(&handle);
/// ```
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<BTreeMap<String, SessionHandle>>,
}

impl SessionRegistry {
    /// Create a new session registry.
    pub fn new() -> Self {
        info!("Creating session registry");
        Self::default()
    }

    /// Register a session under its bound identity.
    ///
    /// An existing session with the same identity is replaced and returned.
    #[instrument(skip(self, handle), fields(jid = %handle.jid()))]
    pub fn register(&self, handle: SessionHandle) -> Option<SessionHandle> {
        let existing = self.sessions.lock().insert(handle.jid.clone(), handle);
        match existing {
            Some(ref old) => info!(
                replaced_conn_id = %old.conn_id,
                "Replaced existing session with the same identity"
            ),
            None => debug!("Registered new session"),
        }
        existing
    }

    /// Unregister whatever session is registered under `jid`.
    #[instrument(skip(self))]
    pub fn unregister(&self, jid: &str) -> Option<SessionHandle> {
        let removed = self.sessions.lock().remove(jid);
        if removed.is_some() {
            debug!("Unregistered session");
        } else {
            debug!("Session was not registered");
        }
        removed
    }

    /// Unregister `handle` only if it is still the registered session for
    /// its identity.
    ///
    /// A session replaced by a newer connection with the same identity must
    /// not remove its successor on teardown.
    #[instrument(skip(self, handle), fields(jid = %handle.jid()))]
    pub fn unregister_session(&self, handle: &SessionHandle) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get(&handle.jid) {
            Some(current) if current.conn_id == handle.conn_id => {
                sessions.remove(&handle.jid);
                debug!("Unregistered session");
                true
            }
            Some(_) => {
                debug!("Session was replaced, leaving successor registered");
                false
            }
            None => false,
        }
    }

    /// Look up a session by bound identity.
    pub fn lookup(&self, jid: &str) -> Option<SessionHandle> {
        self.sessions.lock().get(jid).cloned()
    }

    /// All sessions whose bare identity is `bare`, ordered by identity.
    pub fn lookup_bare(&self, bare: &str) -> Vec<SessionHandle> {
        self.sessions
            .lock()
            .values()
            .filter(|handle| handle.bare_jid() == bare)
            .cloned()
            .collect()
    }

    /// Check if an identity is currently registered.
    pub fn is_registered(&self, jid: &str) -> bool {
        self.sessions.lock().contains_key(jid)
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Consistent copy of every registered session, ordered by identity.
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.sessions.lock().values().cloned().collect()
    }

    /// Queue a stanza for the session registered under `jid`.
    #[instrument(skip(self, stanza), fields(to = %jid))]
    pub fn send_to(&self, jid: &str, stanza: OutboundStanza) -> SendResult {
        // Clone out so the lock is released before the send.
        let Some(handle) = self.lookup(jid) else {
            debug!("Recipient not connected");
            return SendResult::NotConnected;
        };
        handle.try_deliver(stanza)
    }

    /// Send `origin`'s current presence to every other registered session.
    ///
    /// Returns the number of sessions the update was queued for.
    #[instrument(skip(self, origin), fields(from = %origin.jid()))]
    pub fn broadcast_presence(&self, origin: &SessionHandle) -> usize {
        let presence = origin.presence();
        let recipients: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter(|r| r.jid != origin.jid)
            .collect();

        let mut delivered = 0;
        for recipient in &recipients {
            let update = build_presence_update(&origin.jid, &recipient.jid, &presence);
            let xml = match element_to_string(&update) {
                Ok(xml) => xml,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize presence update");
                    continue;
                }
            };
            if recipient.try_deliver(OutboundStanza::new(xml)) == SendResult::Sent {
                delivered += 1;
            }
        }

        debug!(
            from = %origin.jid,
            available = presence.is_available(),
            updated_at = %presence.updated_at,
            delivered,
            recipients = recipients.len(),
            "Broadcast presence"
        );
        delivered
    }
}

/// Bare part of an identity string.
pub(crate) fn bare_of(jid: &str) -> &str {
    jid.split_once('/').map(|(bare, _)| bare).unwrap_or(jid)
}
