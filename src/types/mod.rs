// Public modules
pub mod fragment;
pub mod message;
pub mod stream_end;

// Re-exports
pub use fragment::Fragment;
pub use message::{Message, MessageId, MessageRole};
pub use stream_end::{StreamEnd, StreamEndReason};
