//! Forced termination of running sessions.

use std::io;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::model::{CancelResponse, SessionId};
use crate::registry::SessionRegistry;

/// Kills the process tree behind a session id. No grace period.
#[derive(Debug, Clone)]
pub struct CancellationManager {
    registry: Arc<SessionRegistry>,
}

impl CancellationManager {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// `{canceled: false}` without side effects when the id is unknown or already finished.
    pub async fn cancel(&self, id: &SessionId) -> CancelResponse {
        let Some(handle) = self.registry.remove(id) else {
            debug!(session = %id, "Cancel requested for unknown or finished session");
            return CancelResponse::not_found();
        };

        // Tree first: once the token fires the supervisor kills the direct
        // child, and taskkill /T can no longer find the tree under it.
        let killed = match handle.pid {
            Some(pid) => kill_process_tree(pid).await,
            None => Ok(()),
        };
        handle.token.cancel();

        match killed {
            Ok(()) => {
                info!(session = %id, kind = ?handle.kind, pid = ?handle.pid, "Canceled session");
                CancelResponse::canceled()
            }
            Err(e) => {
                warn!(session = %id, pid = ?handle.pid, "Failed to kill process tree: {}", e);
                CancelResponse::failed(e.to_string())
            }
        }
    }
}

/// taskkill exit code when the process is already gone.
const TASKKILL_NOT_FOUND: i32 = 128;

/// Whether a taskkill exit code means the tree is dead.
#[cfg_attr(not(windows), allow(dead_code))]
fn taskkill_succeeded(code: Option<i32>) -> bool {
    matches!(code, Some(0) | Some(TASKKILL_NOT_FOUND))
}

/// SIGKILL the whole process group led by `pid`.
#[cfg(unix)]
pub async fn kill_process_tree(pid: u32) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    // Group already gone: the session finished on its own in the meantime.
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err)
}

/// `taskkill /T /F` takes the child's descendants down with it.
#[cfg(windows)]
pub async fn kill_process_tree(pid: u32) -> io::Result<()> {
    use crate::downloader::NoWindowExt;

    let status = tokio::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .no_window()
        .status()
        .await?;
    if taskkill_succeeded(status.code()) {
        Ok(())
    } else {
        Err(io::Error::other(format!("taskkill exited with {status}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionKind;
    use crate::registry::ProcessHandle;

    #[tokio::test]
    async fn unknown_id_is_not_an_error() {
        let registry = Arc::new(SessionRegistry::new());
        let manager = CancellationManager::new(Arc::clone(&registry));
        let resp = manager.cancel(&SessionId::from("missing")).await;
        assert_eq!(resp, CancelResponse::not_found());
        assert!(registry.is_empty());
    }

    #[test]
    fn taskkill_not_found_counts_as_killed() {
        assert!(taskkill_succeeded(Some(0)));
        assert!(taskkill_succeeded(Some(128)));
        assert!(!taskkill_succeeded(Some(1)));
        assert!(!taskkill_succeeded(None));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn token_fires_after_the_tree_is_killed() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let handle = ProcessHandle::new(SessionKind::Download, child.id());
        let id = SessionId::from("tree");
        registry.register(id.clone(), handle.clone()).unwrap();

        // Whoever wakes on the token must find the process already dead.
        let token = handle.token.clone();
        let waiter = tokio::spawn(async move {
            token.cancelled().await;
            tokio::time::timeout(std::time::Duration::from_secs(5), child.wait())
                .await
                .expect("process still alive when the token fired")
                .unwrap()
        });

        let manager = CancellationManager::new(Arc::clone(&registry));
        assert_eq!(manager.cancel(&id).await, CancelResponse::canceled());
        let status = waiter.await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn cancel_without_pid_still_signals_token() {
        let registry = Arc::new(SessionRegistry::new());
        let handle = ProcessHandle::new(SessionKind::Download, None);
        let id = SessionId::from("1");
        registry.register(id.clone(), handle.clone()).unwrap();

        let manager = CancellationManager::new(Arc::clone(&registry));
        assert_eq!(manager.cancel(&id).await, CancelResponse::canceled());
        assert!(handle.token.is_cancelled());
        assert!(registry.lookup(&id).is_none());

        // Second cancel is a no-op.
        assert_eq!(manager.cancel(&id).await, CancelResponse::not_found());
    }
}
