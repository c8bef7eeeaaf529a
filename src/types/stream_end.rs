use std::fmt;

/// Why a channel stopped delivering fragments.
///
/// The service does not distinguish "finished" from "broke"; both arrive as the end of the
/// channel.  The reason is recorded for logging only: every reason finalizes the same way.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StreamEndReason {
    /// The response body ended or the service sent an explicit completion marker.
    Completed,

    /// The channel could not be opened or the transport failed mid-stream.
    Faulted,

    /// The user stopped the answer.
    Cancelled,
}

impl fmt::Display for StreamEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamEndReason::Completed => f.write_str("completed"),
            StreamEndReason::Faulted => f.write_str("faulted"),
            StreamEndReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// The terminal event of a channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StreamEnd {
    /// Why the channel ended.
    pub reason: StreamEndReason,

    /// Number of tokens delivered before the end.
    pub tokens: usize,
}

impl StreamEnd {
    /// Creates a new terminal event.
    pub fn new(reason: StreamEndReason, tokens: usize) -> Self {
        Self { reason, tokens }
    }

    /// A completed channel.
    pub fn completed(tokens: usize) -> Self {
        Self::new(StreamEndReason::Completed, tokens)
    }

    /// A faulted channel.
    pub fn faulted(tokens: usize) -> Self {
        Self::new(StreamEndReason::Faulted, tokens)
    }

    /// A channel stopped by the user.
    pub fn cancelled(tokens: usize) -> Self {
        Self::new(StreamEndReason::Cancelled, tokens)
    }
}
