//! Transcript and in-flight answer state.
//!
//! [`ConversationStore`] is the single source of truth for what a view renders: the finalized
//! transcript plus the answer currently being streamed.  It decides when a durable save happens:
//! after every transcript mutation, but never before the initial history load.

use std::time::Instant;

use tracing::{debug, warn};

use crate::error::Result;
use crate::history::HistoryStore;
use crate::observability::{ANSWERS_DISCARDED, ANSWERS_FINALIZED, ANSWERS_TRUNCATED};
use crate::types::{Message, MessageId};

/// Appended to an answer that hit the configured size ceiling.
pub const TRUNCATION_MARKER: &str = "\n[truncated]";

/// Callback invoked with the full transcript after it changes.
pub type TranscriptListener = Box<dyn FnMut(&[Message]) + Send>;

/// The answer currently being accumulated.
#[derive(Debug, Clone)]
pub struct InFlightAnswer {
    content: String,
    in_reply_to: Option<MessageId>,
    received_token: bool,
    live: bool,
    truncated: bool,
    started: Instant,
}

impl InFlightAnswer {
    fn new(in_reply_to: Option<MessageId>) -> Self {
        Self {
            content: String::new(),
            in_reply_to,
            received_token: false,
            live: true,
            truncated: false,
            started: Instant::now(),
        }
    }

    /// Text accumulated so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// The question this answer responds to.
    pub fn in_reply_to(&self) -> Option<&MessageId> {
        self.in_reply_to.as_ref()
    }

    /// True until the first token arrives.
    pub fn is_thinking(&self) -> bool {
        self.live && !self.received_token
    }

    /// True while the channel feeding this answer is open.
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// True if the content hit the size ceiling.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Time since the answer began.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}

/// Holds the transcript and the in-flight answer.
pub struct ConversationStore {
    history: HistoryStore,
    transcript: Vec<Message>,
    in_flight: Option<InFlightAnswer>,
    loaded: bool,
    max_answer_bytes: Option<usize>,
    listeners: Vec<TranscriptListener>,
}

impl ConversationStore {
    /// Creates an empty, not-yet-loaded store.
    pub fn new(history: HistoryStore) -> Self {
        Self {
            history,
            transcript: Vec::new(),
            in_flight: None,
            loaded: false,
            max_answer_bytes: None,
            listeners: Vec::new(),
        }
    }

    /// Caps in-flight answers at `max_answer_bytes`; `None` leaves them unbounded.
    pub fn with_answer_ceiling(mut self, max_answer_bytes: Option<usize>) -> Self {
        self.max_answer_bytes = max_answer_bytes;
        self
    }

    /// Restores the transcript from history.  Only the first call reads the store.
    ///
    /// Messages appended before the load follow the restored history and are saved once the load
    /// completes.
    pub async fn load(&mut self) -> usize {
        if self.loaded {
            debug!("chat history already loaded");
            return self.transcript.len();
        }
        let mut transcript = self.history.load().await;
        let early = std::mem::take(&mut self.transcript);
        let had_early = !early.is_empty();
        transcript.extend(early);
        self.transcript = transcript;
        self.loaded = true;
        if had_early {
            self.persist().await;
        }
        self.notify();
        self.transcript.len()
    }

    /// Returns true once [`load`](Self::load) has completed.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Appends a question and returns its id.
    pub async fn append_question(&mut self, text: &str) -> MessageId {
        let message = Message::question(text);
        let id = message.id.clone();
        self.transcript.push(message);
        self.persist().await;
        self.notify();
        id
    }

    /// Starts a fresh in-flight answer, replacing any previous one.
    pub fn begin_answer(&mut self, in_reply_to: Option<MessageId>) {
        if let Some(previous) = self.in_flight.take() {
            if !previous.content.is_empty() {
                ANSWERS_DISCARDED.click();
                debug!(bytes = previous.content.len(), "replacing unfinished answer");
            }
        }
        self.in_flight = Some(InFlightAnswer::new(in_reply_to));
    }

    /// Appends `token` to the in-flight answer.
    ///
    /// Returns true if this was the first token of the answer.  Tokens arriving with no answer
    /// in flight are dropped.
    pub fn append_token(&mut self, token: &str) -> bool {
        let ceiling = self.max_answer_bytes;
        let Some(answer) = self.in_flight.as_mut() else {
            debug!("dropping token with no answer in flight");
            return false;
        };
        let first = !answer.received_token;
        answer.received_token = true;
        if answer.truncated {
            return first;
        }
        match ceiling {
            Some(limit) if answer.content.len() + token.len() > limit => {
                let room = limit.saturating_sub(answer.content.len());
                let cut = floor_char_boundary(token, room);
                answer.content.push_str(&token[..cut]);
                answer.content.push_str(TRUNCATION_MARKER);
                answer.truncated = true;
                ANSWERS_TRUNCATED.click();
                warn!(limit, "answer reached size ceiling; truncating");
            }
            _ => answer.content.push_str(token),
        }
        first
    }

    /// Moves non-empty in-flight content into the transcript as an answer.
    ///
    /// The in-flight answer is cleared either way.  Returns the new message, if any.
    pub async fn finalize_answer(&mut self) -> Option<Message> {
        let answer = self.in_flight.take()?;
        if answer.content.is_empty() {
            debug!("discarding empty answer");
            return None;
        }
        let message = Message::answer(answer.content, answer.in_reply_to);
        self.transcript.push(message.clone());
        ANSWERS_FINALIZED.click();
        self.persist().await;
        self.notify();
        Some(message)
    }

    /// Drops the in-flight answer without finalizing it.
    pub fn discard_answer(&mut self) -> Option<InFlightAnswer> {
        let mut answer = self.in_flight.take()?;
        answer.live = false;
        if !answer.content.is_empty() {
            ANSWERS_DISCARDED.click();
            debug!(bytes = answer.content.len(), "discarded unfinished answer");
        }
        Some(answer)
    }

    /// Deletes the durable snapshot, then empties the transcript and in-flight answer.
    ///
    /// If the snapshot cannot be deleted nothing is cleared.
    pub async fn clear_all(&mut self) -> Result<()> {
        if let Err(err) = self.history.clear().await {
            warn!(error = %err, "failed to clear chat history");
            return Err(err);
        }
        self.transcript.clear();
        self.in_flight = None;
        self.notify();
        Ok(())
    }

    /// The finalized transcript.
    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    /// The answer being streamed, if any.
    pub fn in_flight(&self) -> Option<&InFlightAnswer> {
        self.in_flight.as_ref()
    }

    /// Registers a callback run after every transcript change.
    pub fn on_transcript_changed(&mut self, listener: TranscriptListener) {
        self.listeners.push(listener);
    }

    async fn persist(&self) {
        if !self.loaded {
            debug!("history not loaded yet; skipping save");
            return;
        }
        if let Err(err) = self.history.save(&self.transcript).await {
            warn!(error = %err, "failed to save chat history");
        }
    }

    fn notify(&mut self) {
        for listener in self.listeners.iter_mut() {
            listener(&self.transcript);
        }
    }
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStore")
            .field("history", &self.history)
            .field("messages", &self.transcript.len())
            .field("in_flight", &self.in_flight)
            .field("loaded", &self.loaded)
            .finish_non_exhaustive()
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut index = index;
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HISTORY_KEY, MemoryStore};
    use std::sync::{Arc, Mutex};

    async fn loaded_store(store: &MemoryStore) -> ConversationStore {
        let mut conversation = ConversationStore::new(HistoryStore::new(Arc::new(store.clone())));
        conversation.load().await;
        conversation
    }

    #[tokio::test]
    async fn question_is_appended_and_saved() {
        let store = MemoryStore::new();
        let mut conversation = loaded_store(&store).await;
        let id = conversation.append_question("hi").await;

        assert_eq!(conversation.transcript().len(), 1);
        assert_eq!(conversation.transcript()[0].id, id);
        assert!(conversation.transcript()[0].is_question());
        assert!(store.raw(HISTORY_KEY).unwrap().contains("\"hi\""));
    }

    #[tokio::test]
    async fn no_save_before_load() {
        let store = MemoryStore::new();
        let mut conversation = ConversationStore::new(HistoryStore::new(Arc::new(store.clone())));
        conversation.append_question("early").await;
        assert!(store.raw(HISTORY_KEY).is_none());

        conversation.load().await;
        assert!(store.raw(HISTORY_KEY).unwrap().contains("early"));
    }

    #[tokio::test]
    async fn load_keeps_restored_history_first() {
        let store = MemoryStore::new();
        HistoryStore::new(Arc::new(store.clone()))
            .save(&[Message::question("old")])
            .await
            .unwrap();

        let mut conversation = ConversationStore::new(HistoryStore::new(Arc::new(store.clone())));
        conversation.append_question("new").await;
        assert_eq!(conversation.load().await, 2);
        let contents: Vec<_> = conversation
            .transcript()
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["old", "new"]);
    }

    #[tokio::test]
    async fn tokens_accumulate_and_finalize() {
        let store = MemoryStore::new();
        let mut conversation = loaded_store(&store).await;
        let question = conversation.append_question("hi").await;
        conversation.begin_answer(Some(question.clone()));
        assert!(conversation.in_flight().unwrap().is_thinking());

        assert!(conversation.append_token("Hel"));
        assert!(!conversation.in_flight().unwrap().is_thinking());
        assert!(!conversation.append_token("lo"));
        assert_eq!(conversation.in_flight().unwrap().content(), "Hello");

        let answer = conversation.finalize_answer().await.unwrap();
        assert_eq!(answer.content, "Hello");
        assert_eq!(answer.in_reply_to, Some(question));
        assert!(conversation.in_flight().is_none());
        assert_eq!(conversation.transcript().len(), 2);
        assert!(store.raw(HISTORY_KEY).unwrap().contains("Hello"));
    }

    #[tokio::test]
    async fn empty_answer_is_not_finalized() {
        let store = MemoryStore::new();
        let mut conversation = loaded_store(&store).await;
        conversation.append_question("hi").await;
        conversation.begin_answer(None);
        assert!(conversation.finalize_answer().await.is_none());
        assert!(conversation.in_flight().is_none());
        assert_eq!(conversation.transcript().len(), 1);
    }

    #[tokio::test]
    async fn finalize_without_answer_is_noop() {
        let mut conversation = loaded_store(&MemoryStore::new()).await;
        assert!(conversation.finalize_answer().await.is_none());
        assert!(conversation.transcript().is_empty());
    }

    #[tokio::test]
    async fn discard_drops_content() {
        let mut conversation = loaded_store(&MemoryStore::new()).await;
        conversation.begin_answer(None);
        conversation.append_token("partial");
        let dropped = conversation.discard_answer().unwrap();
        assert_eq!(dropped.content(), "partial");
        assert!(!dropped.is_live());
        assert!(conversation.in_flight().is_none());
        assert!(conversation.transcript().is_empty());
    }

    #[tokio::test]
    async fn token_without_answer_is_dropped() {
        let mut conversation = loaded_store(&MemoryStore::new()).await;
        assert!(!conversation.append_token("stray"));
        assert!(conversation.in_flight().is_none());
    }

    #[tokio::test]
    async fn ceiling_truncates_with_marker() {
        let store = MemoryStore::new();
        let mut conversation = ConversationStore::new(HistoryStore::new(Arc::new(store)))
            .with_answer_ceiling(Some(8));
        conversation.load().await;
        conversation.begin_answer(None);
        conversation.append_token("Hello");
        conversation.append_token(" world");
        conversation.append_token(" again");

        let answer = conversation.in_flight().unwrap();
        assert!(answer.is_truncated());
        assert_eq!(answer.content(), format!("Hello wo{TRUNCATION_MARKER}"));
    }

    #[tokio::test]
    async fn ceiling_respects_char_boundaries() {
        let mut conversation = ConversationStore::new(HistoryStore::new(Arc::new(
            MemoryStore::new(),
        )))
        .with_answer_ceiling(Some(3));
        conversation.load().await;
        conversation.begin_answer(None);
        // 'à' is two bytes and would straddle the ceiling.
        conversation.append_token("chào");
        assert_eq!(
            conversation.in_flight().unwrap().content(),
            format!("ch{TRUNCATION_MARKER}")
        );
    }

    #[tokio::test]
    async fn clear_all_is_idempotent() {
        let store = MemoryStore::new();
        let mut conversation = loaded_store(&store).await;
        conversation.append_question("hi").await;
        conversation.begin_answer(None);
        conversation.append_token("partial");

        conversation.clear_all().await.unwrap();
        conversation.clear_all().await.unwrap();
        assert!(conversation.transcript().is_empty());
        assert!(conversation.in_flight().is_none());
        assert!(store.raw(HISTORY_KEY).is_none());

        let reloaded = loaded_store(&store).await;
        assert!(reloaded.transcript().is_empty());
    }

    #[tokio::test]
    async fn listeners_see_every_transcript_change() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut conversation = loaded_store(&MemoryStore::new()).await;
        let sink = seen.clone();
        conversation.on_transcript_changed(Box::new(move |messages| {
            sink.lock().unwrap().push(messages.len());
        }));

        conversation.append_question("hi").await;
        conversation.begin_answer(None);
        conversation.append_token("yo");
        conversation.finalize_answer().await;
        conversation.clear_all().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 0]);
    }
}
