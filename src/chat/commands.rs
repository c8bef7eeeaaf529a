//! Slash command parsing for the chat application.
//!
//! Input starting with `/` controls the session instead of being asked as a question.

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Delete the conversation history (after confirmation).
    Clear,

    /// Print the transcript.
    History,

    /// Upload a document to the service.
    Upload(String),

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Display session statistics.
    Stats,

    /// Show the current configuration.
    ShowConfig,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it should be asked as a
/// question.
///
/// # Examples
///
/// ```
/// # use askstream::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/upload report.pdf").is_some());
/// assert!(parse_command("What does the report say?").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "clear" => ChatCommand::Clear,
        "history" => ChatCommand::History,
        "upload" => match argument {
            Some(path) => ChatCommand::Upload(unquote(path).to_string()),
            None => ChatCommand::Invalid("/upload requires a file path".to_string()),
        },
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        "stats" | "status" => ChatCommand::Stats,
        "config" => ChatCommand::ShowConfig,
        _ => ChatCommand::Invalid(format!("Unknown command: /{command}")),
    };

    Some(result)
}

/// Returns true if `answer` confirms a yes/no prompt.  Anything but yes means no.
pub fn is_confirmation(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn unquote(path: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = path
            .strip_prefix(quote)
            .and_then(|p| p.strip_suffix(quote))
        {
            return inner;
        }
    }
    path
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /clear                 Delete the conversation history
  /history               Show the conversation so far
  /upload <file>         Upload a PDF for the service to answer from
  /stats                 Show session statistics
  /config                Show current configuration
  /help                  Show this help message
  /quit                  Exit the chat

Press Ctrl+C while an answer streams to stop it; Ctrl+D exits."#
}
