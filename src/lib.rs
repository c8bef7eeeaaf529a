// Public modules
pub mod chat;
pub mod client;
pub mod controller;
pub mod conversation;
pub mod error;
pub mod history;
pub mod observability;
pub mod render;
pub mod sse;
pub mod stream;
pub mod types;
pub mod utils;

// Re-exports
pub use client::AskClient;
pub use controller::{SessionConfig, SessionController, SessionState, SessionStats, SessionUpdate};
pub use conversation::{ConversationStore, InFlightAnswer, TranscriptListener};
pub use error::{Error, Result};
pub use history::{FileStore, HISTORY_KEY, HistoryStore, KeyValueStore, MemoryStore};
pub use observability::register_biometrics;
pub use stream::{AnswerSource, FragmentStream, SessionHandle, StreamEvent};
pub use types::*;
