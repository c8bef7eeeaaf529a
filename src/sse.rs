//! Server-Sent Events (SSE) decoding for the answer channel.
//!
//! This module turns the raw byte stream of an `/ask_stream` response into a stream of
//! [`SseEvent`] frames.  It only understands the framing; decoding the `data:` payload into a
//! [`Fragment`](crate::Fragment) is the stream session's job.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use tracing::debug;

use crate::error::{Error, Result};
use crate::observability::STREAM_BYTES;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` name, if the server sent one.
    pub event: Option<String>,

    /// The `data:` lines of the frame, joined with newlines.
    pub data: String,
}

impl SseEvent {
    /// Returns true for unnamed events and events named `message`.
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }
}

/// Process a stream of bytes into a stream of server-sent events.
///
/// Frames may be split across chunks at any byte, including inside a multi-byte character.
/// An incomplete frame left over when the byte stream ends is dropped.
pub fn process_sse<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseEvent>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    let stream = byte_stream.map(|result| {
        result
            .map_err(|e| Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e))))
    });

    stream::unfold(
        (stream, FrameDecoder::default()),
        move |(mut stream, mut decoder)| async move {
            loop {
                if let Some(event) = decoder.next_event() {
                    return Some((Ok(event), (stream, decoder)));
                }

                match stream.next().await {
                    Some(Ok(bytes)) => {
                        STREAM_BYTES.count(bytes.len() as u64);
                        decoder.push(&bytes);
                    }
                    Some(Err(e)) => {
                        return Some((Err(e), (stream, decoder)));
                    }
                    None => {
                        if decoder.has_partial_frame() {
                            debug!("dropping incomplete SSE frame at end of stream");
                        }
                        return None;
                    }
                }
            }
        },
    )
}

#[derive(Debug, Default)]
struct FrameDecoder {
    // Bytes of a character split across chunks.
    pending: Vec<u8>,
    text: String,
    // The last character appended was a CR; a following LF belongs to it.
    after_cr: bool,
}

impl FrameDecoder {
    /// Appends a chunk.  Invalid UTF-8 sequences become U+FFFD; an incomplete trailing sequence
    /// waits for the next chunk.
    fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        let mut decoded = String::new();
        let mut rest = self.pending.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    decoded.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            debug!(bytes = len, "replacing invalid UTF-8 in stream");
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        self.pending = rest.to_vec();
        self.append(&decoded);
    }

    /// CRLF, lone CR, and LF all end a line.
    fn append(&mut self, chunk: &str) {
        for c in chunk.chars() {
            match c {
                '\r' => {
                    self.text.push('\n');
                    self.after_cr = true;
                    continue;
                }
                '\n' if self.after_cr => {}
                c => self.text.push(c),
            }
            self.after_cr = false;
        }
    }

    fn next_event(&mut self) -> Option<SseEvent> {
        while let Some(end) = self.text.find("\n\n") {
            let frame: String = self.text.drain(..end + 2).collect();
            if let Some(event) = parse_frame(&frame[..end]) {
                return Some(event);
            }
        }
        None
    }

    fn has_partial_frame(&self) -> bool {
        !self.pending.is_empty() || !self.text.trim().is_empty()
    }
}

/// Parse one blank-line-delimited frame.  Frames without data lines are not dispatched.
fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();
    for line in frame.split('\n') {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => data.push(value),
            "event" => event = Some(value.to_string()),
            _ => {}
        }
    }
    if data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::io;

    fn chunks(parts: &[&[u8]]) -> impl Stream<Item = std::result::Result<Bytes, io::Error>> + Unpin {
        let parts: Vec<_> = parts
            .iter()
            .map(|part| Ok(Bytes::copy_from_slice(part)))
            .collect();
        stream::iter(parts)
    }

    async fn collect(parts: &[&[u8]]) -> Vec<Result<SseEvent>> {
        process_sse(chunks(parts)).collect().await
    }

    #[tokio::test]
    async fn parse_token_event() {
        let events = collect(&[b"data:{\"token\": \"Hel\"}\n\n"]).await;
        assert_eq!(events.len(), 1);
        let event = events[0].as_ref().unwrap();
        assert_eq!(event.data, "{\"token\": \"Hel\"}");
        assert!(event.is_message());
    }

    #[tokio::test]
    async fn parse_multiple_events() {
        let events = collect(&[b"data: {\"token\":\"a\"}\n\ndata: {\"token\":\"b\"}\n\n"]).await;
        let data: Vec<_> = events.into_iter().map(|e| e.unwrap().data).collect();
        assert_eq!(data, vec!["{\"token\":\"a\"}", "{\"token\":\"b\"}"]);
    }

    #[tokio::test]
    async fn handle_split_event() {
        let events = collect(&[b"da", b"ta: {\"tok", b"en\":\"x\"}\n", b"\n"]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().data, "{\"token\":\"x\"}");
    }

    #[tokio::test]
    async fn handle_character_split_across_chunks() {
        let bytes = "data: {\"token\":\"chào\"}\n\n".as_bytes();
        // Split inside the two-byte encoding of 'à'.
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let events = collect(&[&bytes[..split], &bytes[split..]]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().data, "{\"token\":\"chào\"}");
    }

    #[tokio::test]
    async fn handle_crlf_delimiters() {
        let events = collect(&[b"data: one\r\n\r", b"\ndata: two\r\n\r\n"]).await;
        let data: Vec<_> = events.into_iter().map(|e| e.unwrap().data).collect();
        assert_eq!(data, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn comments_and_empty_frames_are_skipped() {
        let events = collect(&[b": keep-alive\n\nretry: 1000\n\ndata: real\n\n"]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().data, "real");
    }

    #[tokio::test]
    async fn multi_line_data_is_joined() {
        let events = collect(&[b"event: message\ndata: first\ndata: second\n\n"]).await;
        let event = events[0].as_ref().unwrap();
        assert_eq!(event.data, "first\nsecond");
        assert!(event.is_message());
    }

    #[tokio::test]
    async fn named_events_are_reported() {
        let events = collect(&[b"event: status\ndata: {}\n\n"]).await;
        let event = events[0].as_ref().unwrap();
        assert_eq!(event.event.as_deref(), Some("status"));
        assert!(!event.is_message());
    }

    #[tokio::test]
    async fn incomplete_trailing_frame_is_dropped() {
        let events = collect(&[b"data: done\n\ndata: partial"]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().data, "done");
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced() {
        let events = collect(&[
            b"data: {\"token\":\"Hel\"}\n\ndata: {\"token\":\"\xff\"}\n\n",
            b"data: {\"token\":\"lo\"}\n\n",
        ])
        .await;
        let data: Vec<_> = events.into_iter().map(|e| e.unwrap().data).collect();
        assert_eq!(
            data,
            vec![
                "{\"token\":\"Hel\"}",
                "{\"token\":\"\u{FFFD}\"}",
                "{\"token\":\"lo\"}"
            ]
        );
    }

    #[tokio::test]
    async fn lone_cr_ends_a_line() {
        let events = collect(&[b"data: a\rdata: b\r\rdata: c\r", b"\n\r\n"]).await;
        let data: Vec<_> = events.into_iter().map(|e| e.unwrap().data).collect();
        assert_eq!(data, vec!["a\nb", "c"]);
    }

    #[tokio::test]
    async fn transport_errors_pass_through() {
        let parts: Vec<std::result::Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"data: a\n\n")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut sse = Box::pin(process_sse(stream::iter(parts)));
        assert_eq!(sse.next().await.unwrap().unwrap().data, "a");
        let err = sse.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("Error in HTTP stream"));
    }
}
