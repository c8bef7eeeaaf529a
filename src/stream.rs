//! The incremental-response channel.
//!
//! A [`SessionHandle`] owns exactly one channel.  The channel is driven on its own task, which
//! decodes fragments and forwards tokens in arrival order.  Malformed fragments are logged and
//! skipped.  The last event is always a single [`StreamEvent::Ended`], whether the body finished
//! or the transport broke.
//!
//! Closing a handle cancels the task and drops anything it had queued.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::observability::{
    CHANNELS_OPENED, STREAM_DURATION, STREAM_FAULTS, STREAM_FRAGMENTS, STREAM_MALFORMED,
    STREAM_TOKENS, STREAM_TTFT,
};
use crate::types::{Fragment, StreamEnd};

/// Raw `data:` payloads of one channel, in arrival order.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Something that can open an answer channel for a question.
#[async_trait::async_trait]
pub trait AnswerSource: Send + Sync {
    /// Opens a channel for `question` and returns its payloads.
    ///
    /// Returning an error means the channel could not be established.
    async fn open(&self, question: &str) -> Result<FragmentStream>;
}

/// What a channel reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A fragment of answer text.
    Token(String),

    /// The channel finished.  No events follow.
    Ended(StreamEnd),
}

/// The single open channel for one question.
pub struct SessionHandle {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    tokens: usize,
    closed: bool,
}

impl SessionHandle {
    /// Opens a channel for `question` on `source`.
    ///
    /// A question that is empty after trimming is rejected and no channel is opened.  Must be
    /// called from within a tokio runtime.
    pub fn open(source: Arc<dyn AnswerSource>, question: &str) -> Result<Self> {
        if question.trim().is_empty() {
            return Err(Error::validation(
                "question must not be empty",
                Some("question".to_string()),
            ));
        }
        CHANNELS_OPENED.click();
        let (tx, events) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_channel(
            source,
            question.to_string(),
            tx,
            cancel.clone(),
        ));
        Ok(Self {
            events,
            cancel,
            task: Some(task),
            tokens: 0,
            closed: false,
        })
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the handle is closed or after [`StreamEvent::Ended`] was delivered.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.closed {
            return None;
        }
        let event = match self.events.recv().await {
            Some(event) => event,
            None => {
                // The task went away without reporting an end.
                warn!("answer channel task exited without an end event");
                StreamEvent::Ended(StreamEnd::faulted(self.tokens))
            }
        };
        match &event {
            StreamEvent::Token(_) => self.tokens += 1,
            StreamEvent::Ended(_) => self.close(),
        }
        Some(event)
    }

    /// Number of tokens delivered through this handle so far.
    pub fn tokens(&self) -> usize {
        self.tokens
    }

    /// Returns true once the handle is closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closes the channel.  Safe to call any number of times.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();
        self.events.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        debug!(tokens = self.tokens, "answer channel closed");
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("tokens", &self.tokens)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

async fn run_channel(
    source: Arc<dyn AnswerSource>,
    question: String,
    tx: mpsc::UnboundedSender<StreamEvent>,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    let end = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        end = drive_channel(source.as_ref(), &question, &tx, started) => end,
    };
    STREAM_DURATION.add(started.elapsed().as_secs_f64());
    info!(reason = %end.reason, tokens = end.tokens, "answer channel ended");
    let _ = tx.send(StreamEvent::Ended(end));
}

async fn drive_channel(
    source: &dyn AnswerSource,
    question: &str,
    tx: &mpsc::UnboundedSender<StreamEvent>,
    started: Instant,
) -> StreamEnd {
    let mut fragments = match source.open(question).await {
        Ok(fragments) => fragments,
        Err(err) => {
            STREAM_FAULTS.click();
            warn!(error = %err, "failed to open answer channel");
            return StreamEnd::faulted(0);
        }
    };
    let mut tokens = 0;
    while let Some(payload) = fragments.next().await {
        let payload = match payload {
            Ok(payload) => payload,
            Err(err) => {
                STREAM_FAULTS.click();
                warn!(error = %err, tokens, "answer channel failed");
                return StreamEnd::faulted(tokens);
            }
        };
        STREAM_FRAGMENTS.click();
        let fragment = match Fragment::parse(&payload) {
            Ok(fragment) => fragment,
            Err(err) => {
                STREAM_MALFORMED.click();
                warn!(error = %err, payload = %payload, "skipping malformed fragment");
                continue;
            }
        };
        if let Some(token) = fragment.token {
            if tokens == 0 {
                STREAM_TTFT.add(started.elapsed().as_secs_f64());
            }
            tokens += 1;
            STREAM_TOKENS.click();
            if tx.send(StreamEvent::Token(token)).is_err() {
                // Receiver is gone; the handle was closed.
                return StreamEnd::cancelled(tokens);
            }
        }
        if fragment.done {
            return StreamEnd::completed(tokens);
        }
    }
    StreamEnd::completed(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StreamEndReason;
    use futures::stream;

    struct Scripted(Vec<Result<String>>);

    #[async_trait::async_trait]
    impl AnswerSource for Scripted {
        async fn open(&self, _question: &str) -> Result<FragmentStream> {
            Ok(Box::pin(stream::iter(self.0.clone())))
        }
    }

    struct Unreachable;

    #[async_trait::async_trait]
    impl AnswerSource for Unreachable {
        async fn open(&self, _question: &str) -> Result<FragmentStream> {
            Err(Error::connection("connection refused", None))
        }
    }

    struct Hanging;

    #[async_trait::async_trait]
    impl AnswerSource for Hanging {
        async fn open(&self, _question: &str) -> Result<FragmentStream> {
            Ok(Box::pin(
                stream::iter(vec![Ok(r#"{"token":"first"}"#.to_string())])
                    .chain(stream::pending()),
            ))
        }
    }

    fn token(text: &str) -> Result<String> {
        Ok(serde_json::json!({ "token": text }).to_string())
    }

    async fn drain(handle: &mut SessionHandle) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let source: Arc<dyn AnswerSource> = Arc::new(Scripted(vec![]));
        let err = SessionHandle::open(source.clone(), "   \n\t").unwrap_err();
        assert!(err.is_validation());
        assert!(SessionHandle::open(source, "").is_err());
    }

    #[tokio::test]
    async fn tokens_then_completed() {
        let source = Arc::new(Scripted(vec![token("Hel"), token("lo")]));
        let mut handle = SessionHandle::open(source, "hi").unwrap();
        let events = drain(&mut handle).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Token("Hel".to_string()),
                StreamEvent::Token("lo".to_string()),
                StreamEvent::Ended(StreamEnd::completed(2)),
            ]
        );
        assert!(handle.is_closed());
        assert_eq!(handle.tokens(), 2);
    }

    #[tokio::test]
    async fn transport_error_ends_as_fault() {
        let source = Arc::new(Scripted(vec![
            token("Hel"),
            Err(Error::streaming("connection reset", None)),
            token("never"),
        ]));
        let mut handle = SessionHandle::open(source, "hi").unwrap();
        let events = drain(&mut handle).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], StreamEvent::Ended(StreamEnd::faulted(1)));
    }

    #[tokio::test]
    async fn open_failure_ends_as_fault() {
        let mut handle = SessionHandle::open(Arc::new(Unreachable), "hi").unwrap();
        let events = drain(&mut handle).await;
        assert_eq!(events, vec![StreamEvent::Ended(StreamEnd::faulted(0))]);
    }

    #[tokio::test]
    async fn malformed_fragments_are_skipped() {
        let source = Arc::new(Scripted(vec![
            token("a"),
            Ok("{not json".to_string()),
            Ok(r#"{"other": 1}"#.to_string()),
            token("b"),
        ]));
        let mut handle = SessionHandle::open(source, "hi").unwrap();
        let tokens: Vec<_> = drain(&mut handle)
            .await
            .into_iter()
            .filter_map(|event| match event {
                StreamEvent::Token(text) => Some(text),
                StreamEvent::Ended(_) => None,
            })
            .collect();
        assert_eq!(tokens, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn done_marker_completes_early() {
        let source = Arc::new(Scripted(vec![
            token("x"),
            Ok(r#"{"done": true}"#.to_string()),
            token("ignored"),
        ]));
        let mut handle = SessionHandle::open(source, "hi").unwrap();
        let events = drain(&mut handle).await;
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Ended(StreamEnd::completed(1)))
        );
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn close_stops_delivery() {
        let mut handle = SessionHandle::open(Arc::new(Hanging), "hi").unwrap();
        assert_eq!(
            handle.next_event().await,
            Some(StreamEvent::Token("first".to_string()))
        );
        handle.close();
        handle.close();
        assert!(handle.is_closed());
        assert_eq!(handle.next_event().await, None);
    }

    #[tokio::test]
    async fn end_reason_is_reported_once() {
        let mut handle = SessionHandle::open(Arc::new(Scripted(vec![])), "hi").unwrap();
        match handle.next_event().await {
            Some(StreamEvent::Ended(end)) => assert_eq!(end.reason, StreamEndReason::Completed),
            other => panic!("expected end, got {other:?}"),
        }
        assert_eq!(handle.next_event().await, None);
    }
}
