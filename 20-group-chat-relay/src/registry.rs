use std::{collections::HashMap, sync::Arc};

use crate::session::{Session, SessionId};

/// The set of live sessions.
///
/// Not synchronized on its own: the [`Router`](crate::router::Router) owns the
/// only instance behind the same lock it holds for a whole broadcast.
#[derive(Default)]
pub struct Registry {
    sessions: HashMap<SessionId, Arc<Session>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an open session. Returns `false` if it is already present or closed.
    pub fn add(&mut self, session: Arc<Session>) -> bool {
        if session.is_closed() || self.sessions.contains_key(&session.id()) {
            return false;
        }
        self.sessions.insert(session.id(), session);
        true
    }

    pub fn remove(&mut self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(&id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Calls `f` once for every session other than `sender`.
    pub fn for_each_except<F>(&self, sender: SessionId, mut f: F)
    where
        F: FnMut(&Arc<Session>),
    {
        self.sessions
            .iter()
            .filter(|(id, _)| **id != sender)
            .for_each(|(_, session)| f(session));
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn drain(&mut self) -> Vec<Arc<Session>> {
        self.sessions.drain().map(|(_, session)| session).collect()
    }
}
