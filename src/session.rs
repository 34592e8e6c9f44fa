//! Session lifecycle: spawn, register, relay output, reconcile the exit.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationManager;
use crate::config::AppConfig;
use crate::downloader::Launcher;
use crate::error::{Error, Result};
use crate::ids::SessionIdGenerator;
use crate::model::{
    CancelResponse, DownloadRequest, MetadataResult, ProgressEvent, SessionId, SessionKind,
    SessionState, TerminationResult,
};
use crate::progress::{ChunkDecoder, Classification, StreamSource, classify};
use crate::registry::{ProcessHandle, SessionRegistry};
use crate::sink::EventSink;

const CHUNK_SIZE: usize = 4096;

/// Error-stream bytes kept for the terminal result.
const STDERR_TAIL_LIMIT: usize = 64 * 1024;

/// One tracked invocation of the downloader.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    kind: SessionKind,
    state: SessionState,
}

impl Session {
    pub fn new(id: SessionId, kind: SessionKind) -> Self {
        Self {
            id,
            kind,
            state: SessionState::Created,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!(session = %self.id, from = %self.state, to = %next, "Session transition");
        self.state = next;
        Ok(())
    }

    /// Stream events are only relayed while running.
    fn progress_event(&self, classification: Classification) -> Option<ProgressEvent> {
        if self.state != SessionState::Running {
            return None;
        }
        let phase = classification.phase();
        let (percent, text) = match classification {
            Classification::Downloading { percent } => (Some(percent), None),
            Classification::Finalizing => (None, None),
            Classification::ErrorLine(text) => (None, Some(text)),
        };
        Some(ProgressEvent {
            session_id: self.id.clone(),
            phase,
            percent,
            text,
        })
    }

    /// Move into the terminal state matching `outcome` and build the terminal event.
    fn finish(&mut self, outcome: Outcome, stderr_tail: String) -> TerminationResult {
        let (state, exit_code) = match outcome {
            Outcome::Exited(Some(0)) => (SessionState::Completed, Some(0)),
            Outcome::Exited(code) => (SessionState::Failed, code),
            Outcome::Canceled => (SessionState::Canceled, None),
        };
        if let Err(e) = self.transition(state) {
            warn!(session = %self.id, "{}", e);
        }

        let success = state == SessionState::Completed;
        TerminationResult {
            session_id: self.id.clone(),
            state,
            success,
            exit_code,
            error_text: (!success && !stderr_tail.is_empty()).then_some(stderr_tail),
        }
    }
}

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Exited(Option<i32>),
    Canceled,
}

/// Owns the sessions of the application and talks to the event sink.
pub struct SessionController {
    launcher: Launcher,
    registry: Arc<SessionRegistry>,
    cancellation: CancellationManager,
    ids: SessionIdGenerator,
    sink: Arc<dyn EventSink>,
}

impl SessionController {
    pub fn new(config: AppConfig, sink: Arc<dyn EventSink>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        Self {
            launcher: Launcher::new(config),
            cancellation: CancellationManager::new(Arc::clone(&registry)),
            registry,
            ids: SessionIdGenerator::new(),
            sink,
        }
    }

    pub fn config(&self) -> &AppConfig {
        self.launcher.config()
    }

    pub fn is_active(&self, id: &SessionId) -> bool {
        self.registry.contains(id)
    }

    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// Fetch single-item metadata for `url`.
    pub async fn fetch_metadata(&self, url: &str) -> Result<MetadataResult> {
        let mut child = self.launcher.spawn_metadata(url)?;
        let (mut session, handle) = self.register(SessionKind::MetadataFetch, &mut child)?;
        session.transition(SessionState::Running)?;

        let collected = collect_output(&mut child, &handle.token).await;
        self.registry.remove(&session.id);

        let (outcome, stdout, stderr) = match collected {
            Ok(v) => v,
            Err(e) => {
                error!(session = %session.id, "Error reading metadata output: {}", e);
                session.finish(Outcome::Exited(Some(-1)), String::new());
                return Err(e.into());
            }
        };
        let result = session.finish(outcome, stderr.clone());
        info!(session = %session.id, kind = ?session.kind(), state = %result.state, "Session finished");

        match result.state {
            SessionState::Completed => parse_metadata(&stdout),
            SessionState::Canceled => Err(Error::Canceled(session.id.clone())),
            _ => Err(Error::ToolExitFailure {
                exit_code: result.exit_code,
                stderr,
            }),
        }
    }

    /// Spawn a download and supervise it in the background.
    ///
    /// Must be called from within a tokio runtime. Progress and the terminal
    /// result go to the event sink.
    pub fn start_download(&self, req: &DownloadRequest) -> Result<SessionId> {
        let (mut child, output) = self.launcher.spawn_download(req)?;
        let (session, handle) = self.register(SessionKind::Download, &mut child)?;
        let id = session.id.clone();
        info!(session = %id, url = %req.url, format = %req.format_tag, output = %output.display(), "Download started");

        tokio::spawn(supervise(
            session,
            child,
            handle.token,
            Arc::clone(&self.registry),
            Arc::clone(&self.sink),
        ));
        Ok(id)
    }

    pub async fn cancel(&self, id: &SessionId) -> CancelResponse {
        self.cancellation.cancel(id).await
    }

    fn register(&self, kind: SessionKind, child: &mut Child) -> Result<(Session, ProcessHandle)> {
        let id = self.ids.next_id();
        let handle = ProcessHandle::new(kind, child.id());
        if let Err(e) = self.registry.register(id.clone(), handle.clone()) {
            let _ = child.start_kill();
            return Err(e);
        }
        Ok((Session::new(id, kind), handle))
    }
}

/// First non-empty line of the tool's output as JSON.
pub fn parse_metadata(stdout: &str) -> Result<MetadataResult> {
    let line = stdout
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| Error::ParseFailure("empty output".to_string()))?;
    serde_json::from_str(line).map_err(|e| Error::ParseFailure(e.to_string()))
}

async fn supervise(
    mut session: Session,
    mut child: Child,
    token: CancellationToken,
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn EventSink>,
) {
    let (outcome, stderr_tail) = relay_output(&mut session, &mut child, &token, sink.as_ref()).await;

    // Cancellation may already have taken the entry out.
    registry.remove(&session.id);

    let result = session.finish(outcome, stderr_tail);
    let kind = session.kind();
    match result.state {
        SessionState::Completed => info!(session = %result.session_id, ?kind, "Session completed"),
        SessionState::Canceled => info!(session = %result.session_id, ?kind, "Session canceled"),
        _ => warn!(session = %result.session_id, ?kind, exit_code = ?result.exit_code, "Session failed"),
    }
    sink.on_terminal(result);
}

async fn relay_output(
    session: &mut Session,
    child: &mut Child,
    token: &CancellationToken,
    sink: &dyn EventSink,
) -> (Outcome, String) {
    let mut stdout = Pump::new(child.stdout.take());
    let mut stderr = Pump::new(child.stderr.take());
    let mut stderr_tail = String::new();

    if let Err(e) = session.transition(SessionState::Running) {
        warn!(session = %session.id, "{}", e);
    }

    while !(stdout.is_done() && stderr.is_done()) {
        let (chunk, source) = tokio::select! {
            biased;
            _ = token.cancelled() => {
                kill_child(child).await;
                return (Outcome::Canceled, stderr_tail);
            }
            r = stdout.next_chunk(), if !stdout.is_done() => (r, StreamSource::Stdout),
            r = stderr.next_chunk(), if !stderr.is_done() => (r, StreamSource::Stderr),
        };

        let chunk = match chunk {
            Ok(Some(chunk)) => chunk,
            Ok(None) => continue,
            Err(e) => {
                error!(session = %session.id, "Error reading {:?}: {}", source, e);
                continue;
            }
        };

        if source == StreamSource::Stderr {
            warn!(session = %session.id, "Tool stderr: {}", chunk.trim_end());
            push_tail(&mut stderr_tail, &chunk);
        }

        if let Some(event) = classify(&chunk, source).and_then(|c| session.progress_event(c)) {
            sink.on_progress(event);
        }
    }

    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => {
            kill_child(child).await;
            Outcome::Canceled
        }
        status = child.wait() => match status {
            Ok(status) => Outcome::Exited(status.code()),
            Err(e) => {
                error!(session = %session.id, "Error waiting for process: {}", e);
                Outcome::Exited(Some(-1))
            }
        },
    };
    (outcome, stderr_tail)
}

/// Read both pipes to the end and wait for the exit, unless canceled first.
async fn collect_output(
    child: &mut Child,
    token: &CancellationToken,
) -> io::Result<(Outcome, String, String)> {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out = Vec::new();
    let mut err = Vec::new();

    let read = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        r = async {
            tokio::try_join!(read_all(stdout.as_mut(), &mut out), read_all(stderr.as_mut(), &mut err))
        } => Some(r),
    };

    let outcome = match read {
        None => {
            kill_child(child).await;
            Outcome::Canceled
        }
        Some(r) => {
            r?;
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    kill_child(child).await;
                    Outcome::Canceled
                }
                status = child.wait() => Outcome::Exited(status?.code()),
            }
        }
    };

    Ok((
        outcome,
        String::from_utf8_lossy(&out).into_owned(),
        String::from_utf8_lossy(&err).into_owned(),
    ))
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<&mut R>, buf: &mut Vec<u8>) -> io::Result<usize> {
    match reader {
        Some(r) => r.read_to_end(buf).await,
        None => Ok(0),
    }
}

/// Kill the direct child and reap it. The rest of the tree is the
/// cancellation manager's job.
async fn kill_child(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!("Kill after cancel: {}", e);
    }
}

fn push_tail(tail: &mut String, chunk: &str) {
    tail.push_str(chunk);
    if tail.len() > STDERR_TAIL_LIMIT {
        let mut cut = tail.len() - STDERR_TAIL_LIMIT;
        while !tail.is_char_boundary(cut) {
            cut += 1;
        }
        tail.drain(..cut);
    }
}

/// Chunked reads from one pipe, decoded to text.
struct Pump<R> {
    reader: Option<R>,
    decoder: ChunkDecoder,
    buf: Box<[u8; CHUNK_SIZE]>,
}

impl<R: AsyncRead + Unpin> Pump<R> {
    fn new(reader: Option<R>) -> Self {
        Self {
            reader,
            decoder: ChunkDecoder::new(),
            buf: Box::new([0u8; CHUNK_SIZE]),
        }
    }

    fn is_done(&self) -> bool {
        self.reader.is_none()
    }

    /// `Ok(None)` at end of stream or when a read held back only a partial character.
    async fn next_chunk(&mut self) -> io::Result<Option<String>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let n = match reader.read(&mut self.buf[..]).await {
            Ok(n) => n,
            Err(e) => {
                self.reader = None;
                return Err(e);
            }
        };
        let text = if n == 0 {
            self.reader = None;
            self.decoder.finish()
        } else {
            self.decoder.decode(&self.buf[..n])
        };
        Ok((!text.is_empty()).then_some(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Phase;

    #[test]
    fn parse_metadata_first_line() {
        let meta = parse_metadata("{\"title\":\"T\",\"duration\":65}\n").unwrap();
        assert_eq!(meta.title.as_deref(), Some("T"));
        assert_eq!(meta.duration_seconds, Some(65));

        let meta = parse_metadata("\r\n{\"title\":\"A\"}\r\n{\"title\":\"B\"}\r\n").unwrap();
        assert_eq!(meta.title.as_deref(), Some("A"));
    }

    #[test]
    fn parse_metadata_failures() {
        assert!(matches!(parse_metadata(""), Err(Error::ParseFailure(_))));
        assert!(matches!(parse_metadata("not json\n"), Err(Error::ParseFailure(_))));
    }

    #[test]
    fn events_only_while_running() {
        let mut s = Session::new("1".into(), SessionKind::Download);
        assert!(s.progress_event(Classification::Finalizing).is_none());

        s.transition(SessionState::Running).unwrap();
        let ev = s
            .progress_event(Classification::Downloading { percent: 42.5 })
            .unwrap();
        assert_eq!(ev.phase, Phase::Downloading);
        assert_eq!(ev.percent, Some(42.5));

        let result = s.finish(Outcome::Exited(Some(0)), String::new());
        assert!(result.success);
        assert!(s.progress_event(Classification::Finalizing).is_none());
    }

    #[test]
    fn finish_maps_outcomes() {
        let mut s = Session::new("2".into(), SessionKind::Download);
        s.transition(SessionState::Running).unwrap();
        let r = s.finish(Outcome::Exited(Some(1)), "ERROR: boom".into());
        assert_eq!(r.state, SessionState::Failed);
        assert!(!r.success);
        assert_eq!(r.exit_code, Some(1));
        assert_eq!(r.error_text.as_deref(), Some("ERROR: boom"));

        let mut s = Session::new("3".into(), SessionKind::Download);
        s.transition(SessionState::Running).unwrap();
        let r = s.finish(Outcome::Canceled, String::new());
        assert_eq!(r.state, SessionState::Canceled);
        assert_eq!(r.exit_code, None);
        assert!(r.error_text.is_none());

        let mut s = Session::new("4".into(), SessionKind::Download);
        s.transition(SessionState::Running).unwrap();
        let r = s.finish(Outcome::Exited(None), String::new());
        assert_eq!(r.state, SessionState::Failed);
    }

    #[test]
    fn terminal_state_is_final() {
        let mut s = Session::new("5".into(), SessionKind::MetadataFetch);
        s.transition(SessionState::Running).unwrap();
        s.transition(SessionState::Completed).unwrap();
        let err = s.transition(SessionState::Running).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        assert_eq!(s.state(), SessionState::Completed);
    }

    #[test]
    fn stderr_tail_is_bounded() {
        let mut tail = String::new();
        for _ in 0..100 {
            push_tail(&mut tail, &"é".repeat(1000));
        }
        assert!(tail.len() <= STDERR_TAIL_LIMIT);
        assert!(tail.ends_with('é'));
    }

    #[tokio::test]
    async fn pump_yields_chunks_then_ends() {
        let (mut tx, rx) = tokio::io::duplex(64);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let _ = tx.write_all(b"[download]  10.0%\n").await;
        });

        let mut pump = Pump::new(Some(rx));
        let mut text = String::new();
        while !pump.is_done() {
            if let Some(chunk) = pump.next_chunk().await.unwrap() {
                text.push_str(&chunk);
            }
        }
        assert_eq!(text, "[download]  10.0%\n");
    }
}
