//! The session controller: one question-answer cycle at a time.
//!
//! ```text
//! Idle -> submit -> QuestionRecorded -> channel opened -> Streaming
//! Streaming -> first token -> Streaming (visible)
//! Streaming -> channel ended -> Idle (finalizing any content)
//! Streaming -> submit -> old channel closed, content discarded -> QuestionRecorded
//! ```
//!
//! The controller is driven by its owner: call [`SessionController::next_update`] to process the
//! next event from the open channel.  Every mutation takes `&mut self`.

use std::sync::Arc;

use tracing::{debug, info};

use crate::conversation::{ConversationStore, InFlightAnswer, TranscriptListener};
use crate::error::{Error, Result};
use crate::history::{HistoryStore, KeyValueStore};
use crate::observability::CHANNELS_SUPERSEDED;
use crate::stream::{AnswerSource, SessionHandle, StreamEvent};
use crate::types::{Message, MessageId, StreamEnd};

/// Tunables for a [`SessionController`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// Upper bound on the bytes kept for one answer.  `None` is unbounded.
    pub max_answer_bytes: Option<usize>,
}

impl SessionConfig {
    /// Sets the answer ceiling.
    pub fn with_max_answer_bytes(mut self, max_answer_bytes: Option<usize>) -> Self {
        self.max_answer_bytes = max_answer_bytes;
        self
    }
}

/// Where the current cycle is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No channel is open.
    Idle,

    /// The question is in the transcript; the channel is not open yet.
    QuestionRecorded,

    /// The channel is open.  `visible` turns true with the first token.
    Streaming { visible: bool },
}

/// What happened when the controller processed an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Text was appended to the in-flight answer.
    Token {
        /// The text as it was appended, including any truncation marker.
        text: String,
        /// True for the first token of the answer.
        first: bool,
    },

    /// The channel ended and the cycle is over.
    Ended {
        /// Why the channel ended.
        end: StreamEnd,
        /// The finalized answer, or `None` if nothing was received.
        answer: Option<Message>,
    },
}

/// A snapshot of conversation counts for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub messages: usize,
    pub questions: usize,
    pub answers: usize,
    pub streaming: bool,
    pub in_flight_bytes: usize,
}

/// Owns the conversation and the single open channel.
pub struct SessionController {
    source: Arc<dyn AnswerSource>,
    conversation: ConversationStore,
    handle: Option<SessionHandle>,
    state: SessionState,
}

impl SessionController {
    /// Creates a controller and restores the transcript from `store`.
    pub async fn start(
        source: Arc<dyn AnswerSource>,
        store: Arc<dyn KeyValueStore>,
        config: SessionConfig,
    ) -> Self {
        let conversation = ConversationStore::new(HistoryStore::new(store))
            .with_answer_ceiling(config.max_answer_bytes);
        Self::with_conversation(source, conversation).await
    }

    /// Creates a controller around an existing conversation, loading it if needed.
    pub async fn with_conversation(
        source: Arc<dyn AnswerSource>,
        mut conversation: ConversationStore,
    ) -> Self {
        let restored = conversation.load().await;
        debug!(messages = restored, "session controller started");
        Self {
            source,
            conversation,
            handle: None,
            state: SessionState::Idle,
        }
    }

    /// Records `text` as a question and opens a channel for it.
    ///
    /// Blank input is rejected before anything is recorded.  An open channel is closed first and
    /// its partial answer discarded.
    pub async fn submit(&mut self, text: &str) -> Result<MessageId> {
        if text.trim().is_empty() {
            return Err(Error::validation(
                "question must not be empty",
                Some("question".to_string()),
            ));
        }
        if let Some(mut previous) = self.handle.take() {
            previous.close();
            self.conversation.discard_answer();
            CHANNELS_SUPERSEDED.click();
            info!(tokens = previous.tokens(), "superseding open answer channel");
        }

        let id = self.conversation.append_question(text).await;
        self.state = SessionState::QuestionRecorded;
        self.conversation.begin_answer(Some(id.clone()));
        match SessionHandle::open(self.source.clone(), text) {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state = SessionState::Streaming { visible: false };
                Ok(id)
            }
            Err(err) => {
                self.conversation.discard_answer();
                self.state = SessionState::Idle;
                Err(err)
            }
        }
    }

    /// Waits for and applies the next channel event.
    ///
    /// Returns `None` when no channel is open.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        let handle = self.handle.as_mut()?;
        let tokens = handle.tokens();
        let event = handle.next_event().await;
        match event {
            Some(StreamEvent::Token(token)) => {
                let before = self.in_flight_len();
                let first = self.conversation.append_token(&token);
                let text = self
                    .conversation
                    .in_flight()
                    .and_then(|answer| answer.content().get(before..))
                    .unwrap_or_default()
                    .to_string();
                self.state = SessionState::Streaming { visible: true };
                Some(SessionUpdate::Token { text, first })
            }
            Some(StreamEvent::Ended(end)) => Some(self.finish(end).await),
            None => Some(self.finish(StreamEnd::faulted(tokens)).await),
        }
    }

    /// Drives the open channel until it ends and returns the final update.
    pub async fn run_to_idle(&mut self) -> Option<SessionUpdate> {
        while let Some(update) = self.next_update().await {
            if let SessionUpdate::Ended { .. } = update {
                return Some(update);
            }
        }
        None
    }

    /// Stops the open channel at the user's request, keeping what arrived so far.
    pub async fn stop(&mut self) -> Option<SessionUpdate> {
        let mut handle = self.handle.take()?;
        handle.close();
        let end = StreamEnd::cancelled(handle.tokens());
        info!(tokens = end.tokens, "answer stopped");
        Some(self.finish(end).await)
    }

    /// Closes the open channel and discards its partial answer.
    ///
    /// Returns true if a channel was open.
    pub fn cancel(&mut self) -> bool {
        let Some(mut handle) = self.handle.take() else {
            return false;
        };
        handle.close();
        self.conversation.discard_answer();
        self.state = SessionState::Idle;
        debug!(tokens = handle.tokens(), "answer channel cancelled");
        true
    }

    /// Cancels any open channel, then deletes the transcript and its snapshot.
    pub async fn clear_history(&mut self) -> Result<()> {
        self.cancel();
        self.conversation.clear_all().await
    }

    /// Registers a callback run after every transcript change.
    pub fn on_transcript_changed(&mut self, listener: TranscriptListener) {
        self.conversation.on_transcript_changed(listener);
    }

    /// The current cycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true while a channel is open.
    pub fn is_streaming(&self) -> bool {
        self.handle.is_some()
    }

    /// Returns true while a channel is open and no token has arrived.
    pub fn is_thinking(&self) -> bool {
        self.is_streaming() && self.in_flight().is_some_and(InFlightAnswer::is_thinking)
    }

    /// The finalized transcript.
    pub fn transcript(&self) -> &[Message] {
        self.conversation.transcript()
    }

    /// The answer being streamed, if any.
    pub fn in_flight(&self) -> Option<&InFlightAnswer> {
        self.conversation.in_flight()
    }

    /// Counts for display.
    pub fn stats(&self) -> SessionStats {
        let transcript = self.transcript();
        let questions = transcript.iter().filter(|m| m.is_question()).count();
        SessionStats {
            messages: transcript.len(),
            questions,
            answers: transcript.len() - questions,
            streaming: self.is_streaming(),
            in_flight_bytes: self.in_flight_len(),
        }
    }

    fn in_flight_len(&self) -> usize {
        self.in_flight().map_or(0, |answer| answer.content().len())
    }

    async fn finish(&mut self, end: StreamEnd) -> SessionUpdate {
        self.handle = None;
        let answer = self.conversation.finalize_answer().await;
        self.state = SessionState::Idle;
        debug!(reason = %end.reason, finalized = answer.is_some(), "answer cycle finished");
        SessionUpdate::Ended { end, answer }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("conversation", &self.conversation)
            .field("handle", &self.handle)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
