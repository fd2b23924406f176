//! Process-wide session registry

use crate::session::Session;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ras_sockjs_types::{CloseFrame, SessionId, SessionState};
use std::sync::{Arc, Weak};
use tokio::time::Instant;
use tracing::{debug, info};

/// Close frame remembered for a session that was recently retired
#[derive(Debug, Clone)]
struct Tombstone {
    frame: CloseFrame,
    expires_at: Instant,
}

/// Concurrent map from session id to live session
///
/// Closed sessions are replaced by a tombstone for one session timeout so a
/// late receiver learns how the session ended instead of starting a new one.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    tombstones: DashMap<SessionId, Tombstone>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Return the live session for `id`, creating it with `create` if absent
    ///
    /// Exactly one caller wins a concurrent creation race; the flag tells
    /// whether it was this one.
    pub fn get_or_create<F>(self: &Arc<Self>, id: &SessionId, create: F) -> (Arc<Session>, bool)
    where
        F: FnOnce(Weak<SessionRegistry>) -> Arc<Session>,
    {
        match self.sessions.entry(id.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().state() != SessionState::Closed {
                    return (Arc::clone(entry.get()), false);
                }
                let session = create(Arc::downgrade(self));
                entry.insert(Arc::clone(&session));
                debug!(session_id = %id, "replaced closed session");
                (session, true)
            }
            Entry::Vacant(entry) => {
                let session = create(Arc::downgrade(self));
                entry.insert(Arc::clone(&session));
                self.tombstones.remove(id);
                debug!(session_id = %id, "session created");
                (session, true)
            }
        }
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a session; removing an absent id is a no-op
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// The close frame of a recently retired session, if still remembered
    pub fn tombstone(&self, id: &SessionId) -> Option<CloseFrame> {
        let now = Instant::now();
        self.tombstones
            .get(id)
            .filter(|tombstone| tombstone.expires_at > now)
            .map(|tombstone| tombstone.frame.clone())
    }

    /// Evict a session that reached CLOSED
    ///
    /// Only evicts the exact instance given, so a session that already
    /// replaced it under the same id is left alone.
    pub(crate) fn retire(&self, session: &Session) {
        let removed = self
            .sessions
            .remove_if(session.id(), |_, current| {
                std::ptr::eq(Arc::as_ptr(current), session)
            })
            .is_some();

        if removed {
            self.tombstones.insert(
                session.id().clone(),
                Tombstone {
                    frame: session.close_frame().unwrap_or_default(),
                    expires_at: Instant::now() + session.session_timeout(),
                },
            );
        }
    }

    /// Close and evict every session whose timeout elapsed without a transport
    pub fn sweep_expired(&self, now: Instant) -> Vec<Arc<Session>> {
        let expired: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().expire(now))
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for session in &expired {
            self.retire(session);
        }
        self.tombstones.retain(|_, tombstone| tombstone.expires_at > now);

        if !expired.is_empty() {
            info!(count = expired.len(), "swept expired sessions");
        }
        expired
    }

    /// Close every live session with the given frame
    pub fn close_all(&self, frame: CloseFrame) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for session in sessions {
            session.close(frame.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
