//! Process-wide map from session id to live process handle.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::model::{SessionId, SessionKind};

/// What the registry holds for a live session: enough to kill it.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub kind: SessionKind,
    /// OS process id (and process-group id on unix).
    pub pid: Option<u32>,
    /// Tells the supervising task that the session was canceled.
    pub token: CancellationToken,
}

impl ProcessHandle {
    pub fn new(kind: SessionKind, pid: Option<u32>) -> Self {
        Self {
            kind,
            pid,
            token: CancellationToken::new(),
        }
    }
}

/// Session id to process handle. Never iterated from outside.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, ProcessHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails when `id` is already registered.
    pub fn register(&self, id: SessionId, handle: ProcessHandle) -> Result<()> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&id) {
            return Err(Error::DuplicateSession(id));
        }
        sessions.insert(id, handle);
        Ok(())
    }

    /// `None` means the session already finished or never existed.
    pub fn lookup(&self, id: &SessionId) -> Option<ProcessHandle> {
        self.sessions.lock().get(id).cloned()
    }

    /// Idempotent. Only the first call for an id returns the handle.
    pub fn remove(&self, id: &SessionId) -> Option<ProcessHandle> {
        self.sessions.lock().remove(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> ProcessHandle {
        ProcessHandle::new(SessionKind::Download, Some(4242))
    }

    #[test]
    fn register_rejects_duplicates() {
        let reg = SessionRegistry::new();
        let id = SessionId::from("1");
        reg.register(id.clone(), handle()).unwrap();
        let err = reg.register(id.clone(), handle()).unwrap_err();
        assert!(matches!(err, Error::DuplicateSession(ref dup) if *dup == id));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn lookup_unknown_is_none() {
        let reg = SessionRegistry::new();
        assert!(reg.lookup(&SessionId::from("nope")).is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let reg = SessionRegistry::new();
        let id = SessionId::from("7");
        reg.register(id.clone(), handle()).unwrap();
        assert!(reg.remove(&id).is_some());
        assert!(reg.remove(&id).is_none());
        assert!(reg.is_empty());
        assert!(!reg.contains(&id));
    }

    #[test]
    fn lookup_shares_the_cancellation_token() {
        let reg = SessionRegistry::new();
        let id = SessionId::from("9");
        let h = handle();
        reg.register(id.clone(), h.clone()).unwrap();
        reg.lookup(&id).unwrap().token.cancel();
        assert!(h.token.is_cancelled());
    }
}
