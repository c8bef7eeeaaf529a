//! Output rendering for the chat application.
//!
//! The [`Renderer`] trait is what a view implements to show a conversation.  The plain-text
//! implementation writes streamed tokens straight to the terminal with optional ANSI styling.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::types::{Message, MessageRole};

/// ANSI escape code for dim text (used for the thinking indicator).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for question labels).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for green text (used for answer labels).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code for yellow text (used for interruptions).
const ANSI_YELLOW: &str = "\x1b[33m";

const THINKING: &str = "thinking...";

/// Trait for rendering chat output.
pub trait Renderer: Send {
    /// Print a chunk of answer text as it streams in.
    fn print_text(&mut self, text: &str);

    /// Show the waiting indicator shown before the first token.
    fn start_thinking(&mut self);

    /// Remove the waiting indicator.
    fn stop_thinking(&mut self);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Print a finalized transcript message.
    fn print_message(&mut self, message: &Message);

    /// Called when an answer is complete.
    fn finish_response(&mut self);

    /// Called when the answer is stopped by the user.
    fn print_interrupted(&mut self);

    /// Returns true if streaming should be interrupted.
    fn should_interrupt(&self) -> bool {
        false
    }
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    out: Box<dyn Write + Send>,
    use_color: bool,
    thinking: bool,
    line_start: bool,
    interrupted: Option<Arc<AtomicBool>>,
}

impl PlainTextRenderer {
    /// Creates a renderer for stdout with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a renderer for stdout with the specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self::with_writer(Box::new(io::stdout()), use_color)
    }

    /// Creates a renderer that writes to `out`.
    pub fn with_writer(out: Box<dyn Write + Send>, use_color: bool) -> Self {
        Self {
            out,
            use_color,
            thinking: false,
            line_start: true,
            interrupted: None,
        }
    }

    /// Attaches an interrupt flag to the renderer.
    pub fn with_interrupt(mut self, interrupted: Arc<AtomicBool>) -> Self {
        self.interrupted = Some(interrupted);
        self
    }

    fn write(&mut self, text: &str) {
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
        if let Some(last) = text.chars().last() {
            self.line_start = last == '\n';
        }
    }

    fn styled(&self, color: &str, text: &str) -> String {
        if self.use_color {
            format!("{color}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn print_text(&mut self, text: &str) {
        self.stop_thinking();
        self.write(text);
    }

    fn start_thinking(&mut self) {
        if self.thinking {
            return;
        }
        self.thinking = true;
        let indicator = self.styled(ANSI_DIM, THINKING);
        self.write(&indicator);
    }

    fn stop_thinking(&mut self) {
        if !self.thinking {
            return;
        }
        self.thinking = false;
        if self.use_color {
            // Erase the indicator in place.
            self.write("\r\x1b[2K");
            self.line_start = true;
        } else {
            self.write("\n");
        }
    }

    fn print_error(&mut self, error: &str) {
        self.stop_thinking();
        let prefix = if self.line_start { "" } else { "\n" };
        let line = self.styled(ANSI_RED, &format!("Error: {error}"));
        self.write(&format!("{prefix}{line}\n"));
    }

    fn print_info(&mut self, info: &str) {
        self.stop_thinking();
        self.write(&format!("{info}\n"));
    }

    fn print_message(&mut self, message: &Message) {
        let label = match message.role {
            MessageRole::Question => self.styled(ANSI_CYAN, "you>"),
            MessageRole::Answer => self.styled(ANSI_GREEN, "answer>"),
        };
        self.write(&format!("{label} {}\n", message.content));
    }

    fn finish_response(&mut self) {
        self.stop_thinking();
        if !self.line_start {
            self.write("\n");
        }
    }

    fn print_interrupted(&mut self) {
        self.stop_thinking();
        let prefix = if self.line_start { "" } else { "\n" };
        let marker = self.styled(ANSI_YELLOW, "[interrupted]");
        self.write(&format!("{prefix}{marker}\n"));
    }

    fn should_interrupt(&self) -> bool {
        self.interrupted
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn plain() -> (PlainTextRenderer, Capture) {
        let capture = Capture::default();
        (
            PlainTextRenderer::with_writer(Box::new(capture.clone()), false),
            capture,
        )
    }

    #[test]
    fn renderer_default_has_color() {
        let renderer = PlainTextRenderer::new();
        assert!(renderer.use_color);
    }

    #[test]
    fn thinking_then_tokens() {
        let (mut renderer, capture) = plain();
        renderer.start_thinking();
        renderer.start_thinking();
        renderer.print_text("Hel");
        renderer.print_text("lo");
        renderer.finish_response();
        assert_eq!(capture.text(), "thinking...\nHello\n");
    }

    #[test]
    fn finish_without_text_adds_nothing() {
        let (mut renderer, capture) = plain();
        renderer.finish_response();
        assert_eq!(capture.text(), "");
    }

    #[test]
    fn interrupted_starts_on_fresh_line() {
        let (mut renderer, capture) = plain();
        renderer.print_text("partial");
        renderer.print_interrupted();
        assert_eq!(capture.text(), "partial\n[interrupted]\n");
    }

    #[test]
    fn messages_are_labelled() {
        let (mut renderer, capture) = plain();
        renderer.print_message(&Message::question("hi"));
        renderer.print_message(&Message::answer("hello", None));
        assert_eq!(capture.text(), "you> hi\nanswer> hello\n");
    }

    #[test]
    fn colored_error() {
        let capture = Capture::default();
        let mut renderer = PlainTextRenderer::with_writer(Box::new(capture.clone()), true);
        renderer.print_error("boom");
        assert_eq!(capture.text(), format!("{ANSI_RED}Error: boom{ANSI_RESET}\n"));
    }

    #[test]
    fn interrupt_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let renderer = PlainTextRenderer::with_color(false).with_interrupt(flag.clone());
        assert!(!renderer.should_interrupt());
        flag.store(true, Ordering::Relaxed);
        assert!(renderer.should_interrupt());
    }
}
