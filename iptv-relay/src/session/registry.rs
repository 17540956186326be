//! Channel to session mapping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use super::state::{Phase, Session};
use crate::media::ChannelId;
use crate::{Error, Result};

struct RegistryInner {
    sessions: DashMap<ChannelId, Arc<Session>>,
    next_id: AtomicU64,
}

/// At most one session per channel.
///
/// A session is inserted when a start begins and removed at the end of its
/// cleanup, so an absent channel is idle.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Claim `channel` for a new start.
    ///
    /// The phase check and the insertion happen under the same map entry lock.
    pub fn begin_start(&self, channel: ChannelId) -> Result<Arc<Session>> {
        match self.inner.sessions.entry(channel) {
            Entry::Occupied(entry) => Err(match entry.get().phase() {
                Phase::Active => Error::AlreadyActive,
                Phase::Starting => Error::AlreadyStarting,
                Phase::Cleaning | Phase::Idle => Error::CleanupInProgress,
            }),
            Entry::Vacant(entry) => {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                let session = Arc::new(Session::starting(id, channel));
                entry.insert(Arc::clone(&session));
                debug!(%channel, session_id = id, "Session created");
                Ok(session)
            }
        }
    }

    pub fn get(&self, channel: ChannelId) -> Option<Arc<Session>> {
        self.inner
            .sessions
            .get(&channel)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn phase(&self, channel: ChannelId) -> Phase {
        self.get(channel).map_or(Phase::Idle, |s| s.phase())
    }

    /// Phase of every tracked channel, ordered by channel.
    pub fn snapshot(&self) -> Vec<(ChannelId, Phase)> {
        let sessions: Vec<_> = self
            .inner
            .sessions
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        let mut out: Vec<_> = sessions
            .into_iter()
            .map(|(channel, session)| (channel, session.phase()))
            .collect();
        out.sort_by_key(|(channel, _)| *channel);
        out
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Tear down the channel's session, whatever its phase.
    ///
    /// Returns whether this call performed the teardown.
    pub fn cleanup(&self, channel: ChannelId) -> bool {
        cleanup(&self.inner, channel, None)
    }

    /// Tear down every tracked session. Returns how many were torn down.
    pub fn cleanup_all(&self) -> usize {
        let channels: Vec<ChannelId> = self.inner.sessions.iter().map(|e| *e.key()).collect();
        let cleaned = channels
            .into_iter()
            .filter(|channel| cleanup(&self.inner, *channel, None))
            .count();
        if cleaned > 0 {
            info!(cleaned, "Cleaned up all sessions");
        }
        cleaned
    }

    /// Handle for callbacks that must not keep the registry alive.
    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Non-owning registry handle held by close hooks and watchdogs.
#[derive(Clone)]
pub struct WeakRegistry {
    inner: Weak<RegistryInner>,
}

impl WeakRegistry {
    /// Tear down the channel's session only if it is still session `id`.
    pub fn cleanup_session(&self, channel: ChannelId, id: u64) -> bool {
        match self.inner.upgrade() {
            Some(inner) => cleanup(&inner, channel, Some(id)),
            None => false,
        }
    }
}

fn cleanup(inner: &RegistryInner, channel: ChannelId, id: Option<u64>) -> bool {
    let Some(session) = inner
        .sessions
        .get(&channel)
        .map(|entry| Arc::clone(entry.value()))
    else {
        debug!(%channel, "No session to clean up");
        return false;
    };

    if let Some(id) = id
        && session.id() != id
    {
        debug!(%channel, stale = id, current = session.id(), "Ignoring cleanup for a previous session");
        return false;
    }

    if !session.teardown() {
        return false;
    }

    inner
        .sessions
        .remove_if(&channel, |_, current| Arc::ptr_eq(current, &session));
    session.release();
    info!(%channel, session_id = session.id(), "Session cleaned up");
    true
}
