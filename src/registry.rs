use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::session::{SessionHandle, SessionId};

/// Id-indexed table of live session handles, owned by the collaborator
/// that hosts the forks (typically one per call leg). Plain instance
/// state; the crate keeps no globals.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, handle: Arc<SessionHandle>) {
        self.sessions.lock().unwrap().insert(handle.id(), handle);
    }

    pub fn lookup(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    /// Atomic remove-if-present. The caller that actually removed the
    /// entry is responsible for acknowledging destruction.
    pub(crate) fn remove(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().unwrap().remove(id)
    }

    /// An arbitrary registered id, for "stop whatever is forking here".
    pub fn any_id(&self) -> Option<SessionId> {
        self.sessions.lock().unwrap().keys().next().copied()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
