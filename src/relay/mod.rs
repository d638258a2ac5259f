//! Streaming inference relay.
//!
//! One [`Relay::run`] call is one session: it opens the upstream generate
//! stream, turns each NDJSON line into at most one [`OutwardEvent`] and ends
//! with exactly one terminal event (`Done` or `Error`) unless the consumer
//! went away first. Events go out through a capacity-1 channel, so the
//! consumer sets the pace and dropping the receiver cancels the session.

pub mod backend;
pub mod frame;
pub mod lines;
pub mod prompt;

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::InferenceRequest;
use crate::error::RelayError;
use crate::events::{Event, EventBus};

pub use backend::{ByteStream, InferenceBackend};
pub use frame::{parse_frame, UpstreamFrame};
pub use lines::LineSplitter;

const FAR_FUTURE_SECS: u64 = 86_400 * 365 * 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutwardEvent {
    Token(String),
    Done,
    Error(String),
}

impl OutwardEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OutwardEvent::Token(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionStatus {
    Idle,
    Connecting,
    Streaming,
    Done,
    Error,
}

impl SessionStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, SessionStatus::Done | SessionStatus::Error)
    }
}

/// Per-request relay state. Owned by the task running the session.
#[derive(Debug)]
pub struct RelaySession {
    id: Uuid,
    accumulated: String,
    token_count: usize,
    status: SessionStatus,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl RelaySession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            accumulated: String::new(),
            token_count: 0,
            status: SessionStatus::Idle,
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.accumulated
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }

    /// Moves the status forward. Returns false, leaving the status untouched,
    /// for a backwards move or any move out of `Done`/`Error`.
    pub fn advance(&mut self, next: SessionStatus) -> bool {
        if self.status.is_finished() || next <= self.status {
            return false;
        }
        self.status = next;
        true
    }

    fn append(&mut self, fragment: &str) {
        self.accumulated.push_str(fragment);
        self.token_count += 1;
    }
}

impl Default for RelaySession {
    fn default() -> Self {
        Self::new()
    }
}

/// How a session ended, as seen from inside the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Done { text: String, token_count: usize },
    Failed(RelayError),
    /// The consumer dropped the receiver; nothing more was sent.
    Cancelled { token_count: usize },
}

#[derive(Clone)]
pub struct Relay {
    backend: Arc<dyn InferenceBackend>,
    events: Arc<EventBus>,
    read_timeout: Duration,
}

impl Relay {
    pub fn new(backend: Arc<dyn InferenceBackend>, events: Arc<EventBus>, read_timeout: Duration) -> Self {
        Self { backend, events, read_timeout }
    }

    pub fn backend(&self) -> &Arc<dyn InferenceBackend> {
        &self.backend
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Spawns the session on its own task and hands back the event receiver.
    pub fn start(&self, request: InferenceRequest) -> (mpsc::Receiver<OutwardEvent>, JoinHandle<RelayOutcome>) {
        let (tx, rx) = mpsc::channel(1);
        let relay = self.clone();
        let handle = tokio::spawn(async move { relay.run(request, tx).await });
        (rx, handle)
    }

    pub async fn run(&self, request: InferenceRequest, tx: mpsc::Sender<OutwardEvent>) -> RelayOutcome {
        let mut session = RelaySession::new();
        self.events.publish(Event::RelayStarted {
            session: session.id(),
            model: request.model.clone(),
        });
        session.advance(SessionStatus::Connecting);

        let opened = tokio::select! {
            biased;
            _ = tx.closed() => return self.cancel(&mut session),
            opened = tokio::time::timeout_at(self.deadline(), self.backend.open_stream(&request)) => opened,
        };
        let mut upstream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return self.fail(&mut session, err, &tx).await,
            Err(_) => return self.fail(&mut session, self.timeout_error(), &tx).await,
        };
        session.advance(SessionStatus::Streaming);

        let mut splitter = LineSplitter::new();
        let mut deadline = self.deadline();

        // Every return below drops `upstream`, which closes the connection.
        loop {
            let next = tokio::select! {
                biased;
                _ = tx.closed() => return self.cancel(&mut session),
                next = tokio::time::timeout_at(deadline, upstream.next()) => next,
            };

            let chunk = match next {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(RelayError::UpstreamEndedWithoutCompletion))) | Ok(None) => {
                    if let Some(line) = splitter.finish() {
                        if let ControlFlow::Break(outcome) = self.handle_line(&mut session, &line, &tx).await {
                            return outcome;
                        }
                    }
                    return self
                        .fail(&mut session, RelayError::UpstreamEndedWithoutCompletion, &tx)
                        .await;
                }
                Ok(Some(Err(err))) => return self.fail(&mut session, err, &tx).await,
                Err(_) => return self.fail(&mut session, self.timeout_error(), &tx).await,
            };

            let lines = splitter.push(&chunk);
            if !lines.is_empty() {
                deadline = self.deadline();
            }
            for line in lines {
                if let ControlFlow::Break(outcome) = self.handle_line(&mut session, &line, &tx).await {
                    return outcome;
                }
            }
        }
    }

    async fn handle_line(
        &self,
        session: &mut RelaySession,
        line: &str,
        tx: &mpsc::Sender<OutwardEvent>,
    ) -> ControlFlow<RelayOutcome> {
        match parse_frame(line) {
            UpstreamFrame::TokenFragment(text) => {
                session.append(&text);
                if tx.send(OutwardEvent::Token(text)).await.is_err() {
                    return ControlFlow::Break(self.cancel(session));
                }
                ControlFlow::Continue(())
            }
            UpstreamFrame::Completion => {
                if tx.send(OutwardEvent::Done).await.is_err() {
                    return ControlFlow::Break(self.cancel(session));
                }
                session.advance(SessionStatus::Done);
                self.events.publish(Event::RelayCompleted {
                    session: session.id(),
                    token_count: session.token_count(),
                    text: session.text().to_string(),
                    elapsed: session.elapsed(),
                });
                ControlFlow::Break(RelayOutcome::Done {
                    text: std::mem::take(&mut session.accumulated),
                    token_count: session.token_count(),
                })
            }
            UpstreamFrame::Failure(message) => {
                ControlFlow::Break(self.fail(session, RelayError::Backend(message), tx).await)
            }
            UpstreamFrame::Malformed(raw) => {
                self.events.publish(Event::MalformedFrame { session: session.id(), raw });
                ControlFlow::Continue(())
            }
        }
    }

    async fn fail(
        &self,
        session: &mut RelaySession,
        err: RelayError,
        tx: &mpsc::Sender<OutwardEvent>,
    ) -> RelayOutcome {
        session.advance(SessionStatus::Error);
        self.events.publish(Event::RelayFailed {
            session: session.id(),
            token_count: session.token_count(),
            error: err.to_string(),
        });
        if tx.send(OutwardEvent::Error(err.to_string())).await.is_err() {
            self.events.publish(Event::ClientDisconnected {
                session: session.id(),
                token_count: session.token_count(),
            });
        }
        RelayOutcome::Failed(err)
    }

    fn cancel(&self, session: &mut RelaySession) -> RelayOutcome {
        session.advance(SessionStatus::Error);
        self.events.publish(Event::ClientDisconnected {
            session: session.id(),
            token_count: session.token_count(),
        });
        RelayOutcome::Cancelled { token_count: session.token_count() }
    }

    /// Next read deadline. Timeouts too large to represent never fire.
    fn deadline(&self) -> tokio::time::Instant {
        let now = tokio::time::Instant::now();
        now.checked_add(self.read_timeout)
            .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
    }

    fn timeout_error(&self) -> RelayError {
        RelayError::BackendTimeout(self.read_timeout.as_secs())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedBackend;
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn relay(backend: ScriptedBackend, timeout: Duration) -> (Relay, Arc<EventBus>) {
        let events = Arc::new(EventBus::new());
        (Relay::new(Arc::new(backend), events.clone(), timeout), events)
    }

    fn request() -> InferenceRequest {
        prompt::build_request("codellama:7b", "Oi", None, true)
    }

    async fn collect(relay: &Relay) -> (Vec<OutwardEvent>, RelayOutcome) {
        let (mut rx, handle) = relay.start(request());
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (events, handle.await.unwrap())
    }

    fn assert_single_terminal(events: &[OutwardEvent]) {
        let terminals = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminals, 1, "{events:?}");
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_tokens_then_done() {
        let backend = ScriptedBackend::lines(&[
            r#"{"response":"Ol","done":false}"#,
            r#"{"response":"á!","done":false}"#,
            r#"{"done":true}"#,
        ]);
        let released = backend.released.clone();
        let (relay, events) = relay(backend, Duration::from_secs(5));

        let logged = Arc::new(Mutex::new(None));
        let sink = logged.clone();
        events.subscribe_to("relay_completed", Box::new(move |event| {
            if let Event::RelayCompleted { text, token_count, .. } = event {
                *sink.lock() = Some((text.clone(), *token_count));
            }
        }));

        let (out, outcome) = collect(&relay).await;
        assert_eq!(
            out,
            vec![
                OutwardEvent::Token("Ol".into()),
                OutwardEvent::Token("á!".into()),
                OutwardEvent::Done,
            ]
        );
        assert_eq!(outcome, RelayOutcome::Done { text: "Olá!".into(), token_count: 2 });
        assert_eq!(*logged.lock(), Some(("Olá!".to_string(), 2)));
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_accumulated_text_matches_forwarded_tokens() {
        let backend = ScriptedBackend::lines(&[
            r#"{"response":"fn ","done":false}"#,
            r#"{"response":"main","done":false}"#,
            r#"{"response":"() {}","done":false}"#,
            r#"{"response":"","done":true}"#,
        ]);
        let (relay, _) = relay(backend, Duration::from_secs(5));
        let (out, outcome) = collect(&relay).await;

        let forwarded: String = out
            .iter()
            .filter_map(|e| match e {
                OutwardEvent::Token(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        match outcome {
            RelayOutcome::Done { text, token_count } => {
                assert_eq!(text, forwarded);
                assert_eq!(token_count, 3);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_single_terminal(&out);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let backend = ScriptedBackend::failing(RelayError::BackendUnreachable("http://localhost:11434".into()));
        let (relay, _) = relay(backend, Duration::from_secs(5));
        let (out, outcome) = collect(&relay).await;

        assert_eq!(out.len(), 1);
        match &out[0] {
            OutwardEvent::Error(msg) => assert!(msg.contains("conectar")),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(outcome, RelayOutcome::Failed(RelayError::BackendUnreachable(_))));
    }

    #[tokio::test]
    async fn test_bad_status_fails_fast() {
        let backend = ScriptedBackend::failing(RelayError::BackendHttp {
            status: 404,
            body: r#"{"error":"model not found"}"#.into(),
        });
        let (relay, _) = relay(backend, Duration::from_secs(5));
        let (out, _) = collect(&relay).await;

        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], OutwardEvent::Error(msg) if msg.contains("model not found")));
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let backend = ScriptedBackend::lines(&[
            "not-json",
            r#"{"response":"Hi","done":false}"#,
            r#"{"done":true}"#,
        ]);
        let (relay, events) = relay(backend, Duration::from_secs(5));
        let malformed = Arc::new(AtomicUsize::new(0));
        let counter = malformed.clone();
        events.subscribe_to("malformed_frame", Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let (out, _) = collect(&relay).await;
        assert_eq!(out, vec![OutwardEvent::Token("Hi".into()), OutwardEvent::Done]);
        assert_eq!(malformed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_interleaved_malformed_lines() {
        let mut lines = Vec::new();
        for i in 0..5 {
            lines.push(format!(r#"{{"response":"t{i}","done":false}}"#));
            lines.push("{broken".to_string());
            lines.push(r#"{"unexpected":true}"#.to_string());
        }
        lines.push(r#"{"done":true}"#.to_string());
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();

        let (relay, _) = relay(ScriptedBackend::lines(&refs), Duration::from_secs(5));
        let (out, _) = collect(&relay).await;
        assert_eq!(out.len(), 6);
        assert_eq!(out.iter().filter(|e| matches!(e, OutwardEvent::Token(_))).count(), 5);
        assert_eq!(out.last(), Some(&OutwardEvent::Done));
    }

    #[tokio::test]
    async fn test_end_without_completion_is_error() {
        let backend = ScriptedBackend::lines(&[
            r#"{"response":"a","done":false}"#,
            r#"{"response":"b","done":false}"#,
        ]);
        let (relay, _) = relay(backend, Duration::from_secs(5));
        let (out, outcome) = collect(&relay).await;

        assert_eq!(out.len(), 3);
        assert_eq!(
            out[2],
            OutwardEvent::Error(RelayError::UpstreamEndedWithoutCompletion.to_string())
        );
        assert_eq!(outcome, RelayOutcome::Failed(RelayError::UpstreamEndedWithoutCompletion));
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let backend = ScriptedBackend::chunks(vec![
            b"{\"response\":\"a\"}\n{\"done\":true}".to_vec(),
        ]);
        let (relay, _) = relay(backend, Duration::from_secs(5));
        let (out, _) = collect(&relay).await;
        assert_eq!(out, vec![OutwardEvent::Token("a".into()), OutwardEvent::Done]);
    }

    #[tokio::test]
    async fn test_frames_split_across_chunks() {
        let body = "{\"response\":\"Ol\",\"done\":false}\n{\"response\":\"á!\",\"done\":false}\n{\"done\":true}\n";
        let bytes = body.as_bytes();
        let split = body.find('á').unwrap() + 1;
        let backend = ScriptedBackend::chunks(vec![
            bytes[..10].to_vec(),
            bytes[10..split].to_vec(),
            bytes[split..].to_vec(),
        ]);
        let (relay, _) = relay(backend, Duration::from_secs(5));
        let (_, outcome) = collect(&relay).await;
        assert_eq!(outcome, RelayOutcome::Done { text: "Olá!".into(), token_count: 2 });
    }

    #[tokio::test]
    async fn test_lines_after_completion_are_ignored() {
        let backend = ScriptedBackend::chunks(vec![
            b"{\"response\":\"a\"}\n{\"done\":true}\n{\"response\":\"late\"}\n".to_vec(),
        ]);
        let (relay, _) = relay(backend, Duration::from_secs(5));
        let (out, _) = collect(&relay).await;
        assert_eq!(out, vec![OutwardEvent::Token("a".into()), OutwardEvent::Done]);
    }

    #[tokio::test]
    async fn test_in_stream_backend_error() {
        let backend = ScriptedBackend::lines(&[
            r#"{"response":"a","done":false}"#,
            r#"{"error":"out of memory"}"#,
            r#"{"response":"b","done":false}"#,
        ]);
        let (relay, _) = relay(backend, Duration::from_secs(5));
        let (out, outcome) = collect(&relay).await;

        assert_eq!(out.len(), 2);
        assert!(matches!(&out[1], OutwardEvent::Error(msg) if msg.contains("out of memory")));
        assert_eq!(outcome, RelayOutcome::Failed(RelayError::Backend("out of memory".into())));
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let backend = ScriptedBackend::lines(&[r#"{"response":"a","done":false}"#]).hanging();
        let released = backend.released.clone();
        let (relay, _) = relay(backend, Duration::from_millis(50));
        let (out, outcome) = collect(&relay).await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0], OutwardEvent::Token("a".into()));
        assert!(matches!(out[1], OutwardEvent::Error(_)));
        assert!(matches!(outcome, RelayOutcome::Failed(RelayError::BackendTimeout(_))));
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_body_cut_short_reads_trailing_line() {
        let backend = ScriptedBackend::chunks(vec![b"{\"response\":\"a\"}\n{\"response\":\"b\"}".to_vec()])
            .ending_with(RelayError::UpstreamEndedWithoutCompletion);
        let (relay, _) = relay(backend, Duration::from_secs(5));
        let (out, outcome) = collect(&relay).await;

        assert_eq!(
            out,
            vec![
                OutwardEvent::Token("a".into()),
                OutwardEvent::Token("b".into()),
                OutwardEvent::Error(RelayError::UpstreamEndedWithoutCompletion.to_string()),
            ]
        );
        assert_eq!(outcome, RelayOutcome::Failed(RelayError::UpstreamEndedWithoutCompletion));
    }

    #[tokio::test]
    async fn test_other_body_errors_fail_immediately() {
        let backend = ScriptedBackend::chunks(vec![b"{\"response\":\"a\"}\n{\"done\":true}".to_vec()])
            .ending_with(RelayError::Unexpected("connection reset".into()));
        let (relay, _) = relay(backend, Duration::from_secs(5));
        let (out, _) = collect(&relay).await;
        assert_eq!(
            out,
            vec![OutwardEvent::Token("a".into()), OutwardEvent::Error("connection reset".into())]
        );
    }

    #[tokio::test]
    async fn test_unbounded_timeout_does_not_overflow() {
        let backend = ScriptedBackend::lines(&[r#"{"response":"a","done":false}"#, r#"{"done":true}"#]);
        let (relay, _) = relay(backend, Duration::from_secs(u64::MAX));
        let (out, outcome) = collect(&relay).await;
        assert_eq!(out, vec![OutwardEvent::Token("a".into()), OutwardEvent::Done]);
        assert_eq!(outcome, RelayOutcome::Done { text: "a".into(), token_count: 1 });
    }

    #[tokio::test]
    async fn test_client_disconnect_releases_upstream() {
        let backend = ScriptedBackend::lines(&[r#"{"response":"a","done":false}"#]).hanging();
        let released = backend.released.clone();
        let (relay, events) = relay(backend, Duration::from_secs(30));
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = failures.clone();
        events.subscribe_to("relay_failed", Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let (mut rx, handle) = relay.start(request());
        assert_eq!(rx.recv().await, Some(OutwardEvent::Token("a".into())));
        drop(rx);

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert_eq!(outcome, RelayOutcome::Cancelled { token_count: 1 });
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(failures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_session_moves_forward_only() {
        let mut session = RelaySession::new();
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(session.advance(SessionStatus::Connecting));
        assert!(!session.advance(SessionStatus::Idle));
        assert!(session.advance(SessionStatus::Error));
        assert!(!session.advance(SessionStatus::Done));
        assert_eq!(session.status(), SessionStatus::Error);

        let mut session = RelaySession::new();
        session.advance(SessionStatus::Streaming);
        assert!(session.advance(SessionStatus::Done));
        assert!(!session.advance(SessionStatus::Error));
    }
}
