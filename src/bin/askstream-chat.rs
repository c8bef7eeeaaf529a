//! Interactive chat client for a streaming question-answering service.
//!
//! Answers are printed token by token as the service produces them.  The conversation is kept in
//! a history directory and restored on the next start.
//!
//! # Usage
//!
//! ```bash
//! # Talk to the service on localhost:8000
//! askstream-chat
//!
//! # Another server, with a private history directory
//! askstream-chat --server http://qa.internal:8000/ --history-dir /tmp/qa-history
//!
//! # Settings from a file, colors off
//! askstream-chat --config askstream.yaml --no-color
//! ```
//!
//! # Commands
//!
//! - `/help` - Show available commands
//! - `/clear` - Delete the conversation history
//! - `/history` - Show the conversation so far
//! - `/upload <file>` - Upload a PDF to the service
//! - `/stats` - Show session statistics
//! - `/quit` - Exit the application

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use askstream::chat::{
    ChatArgs, ChatCommand, ChatConfig, PlainTextRenderer, Renderer, help_text, is_confirmation,
    parse_command,
};
use askstream::{
    AnswerSource, AskClient, FileStore, SessionController, SessionUpdate, StreamEndReason,
};

const INTERRUPT_POLL: Duration = Duration::from_millis(50);

enum Step {
    Update(Option<SessionUpdate>),
    Interrupted,
}

/// Main entry point for the askstream-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs to stderr; stdout carries answers.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("askstream=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("askstream-chat [OPTIONS]");
    let config = ChatConfig::load(args)?;
    tracing::info!(
        server = %config.server_url,
        history = %config.history_dir.display(),
        "starting askstream-chat"
    );

    let client = AskClient::with_options(
        Some(&config.server_url),
        config.api_key.clone(),
        Some(config.timeout()),
    )?;
    let source: Arc<dyn AnswerSource> = Arc::new(client.clone());
    let store = Arc::new(FileStore::new(&config.history_dir));
    let mut controller =
        SessionController::start(source, store, config.session_config()).await;

    // Flag for interrupt handling during streaming
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::Relaxed);
    })?;

    let mut renderer =
        PlainTextRenderer::with_color(config.use_color).with_interrupt(interrupted.clone());
    let mut rl = DefaultEditor::new()?;

    println!("askstream chat (server: {})", client.base_url());
    let restored = controller.transcript().len();
    if restored > 0 {
        println!("Restored {restored} messages; /history shows them.");
    }
    println!("Type /help for commands, /quit to exit\n");

    loop {
        // Reset interrupt flag before each input
        interrupted.store(false, Ordering::Relaxed);

        match rl.readline("You: ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                if let Some(cmd) = parse_command(line) {
                    match cmd {
                        ChatCommand::Quit => {
                            println!("Goodbye!");
                            break;
                        }
                        ChatCommand::Clear => {
                            let answer = rl
                                .readline("Delete the entire chat history? [y/N] ")
                                .unwrap_or_default();
                            if !is_confirmation(&answer) {
                                renderer.print_info("History kept.");
                            } else {
                                match controller.clear_history().await {
                                    Ok(()) => renderer.print_info("Chat history deleted."),
                                    Err(err) => renderer
                                        .print_error(&format!("Failed to delete history: {err}")),
                                }
                            }
                        }
                        ChatCommand::History => {
                            if controller.transcript().is_empty() {
                                renderer.print_info("(no messages)");
                            }
                            for message in controller.transcript() {
                                renderer.print_message(message);
                            }
                        }
                        ChatCommand::Upload(path) => {
                            renderer.print_info(&format!("Uploading {path}..."));
                            match client.upload_document(&path).await {
                                Ok(()) => renderer.print_info("File uploaded successfully."),
                                Err(err) => renderer.print_error(&format!("Upload failed: {err}")),
                            }
                        }
                        ChatCommand::Help => {
                            for line in help_text().lines() {
                                println!("    {line}");
                            }
                        }
                        ChatCommand::Stats => print_stats(&controller),
                        ChatCommand::ShowConfig => print_config(&config, &client),
                        ChatCommand::Invalid(message) => renderer.print_error(&message),
                    }
                    continue;
                }

                match controller.submit(line).await {
                    Ok(_) => stream_answer(&mut controller, &mut renderer).await,
                    Err(err) => renderer.print_error(&err.to_string()),
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - ignored
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {err}"));
                break;
            }
        }
    }

    Ok(())
}

/// Prints the open answer as it streams until it ends or the user presses Ctrl+C.
async fn stream_answer(controller: &mut SessionController, renderer: &mut PlainTextRenderer) {
    println!("Answer:");
    renderer.start_thinking();
    loop {
        let step = tokio::select! {
            biased;
            update = controller.next_update() => Step::Update(update),
            _ = wait_for_interrupt(renderer) => Step::Interrupted,
        };
        match step {
            Step::Update(Some(SessionUpdate::Token { text, .. })) => renderer.print_text(&text),
            Step::Update(Some(SessionUpdate::Ended { end, answer })) => {
                renderer.finish_response();
                if answer.is_none() {
                    renderer.print_info("(no answer)");
                }
                if end.reason == StreamEndReason::Faulted {
                    tracing::debug!(tokens = end.tokens, "answer ended by a channel fault");
                }
                break;
            }
            Step::Update(None) => {
                renderer.finish_response();
                break;
            }
            Step::Interrupted => {
                controller.stop().await;
                renderer.print_interrupted();
                break;
            }
        }
    }
}

async fn wait_for_interrupt(renderer: &PlainTextRenderer) {
    while !renderer.should_interrupt() {
        tokio::time::sleep(INTERRUPT_POLL).await;
    }
}

fn print_stats(controller: &SessionController) {
    let stats = controller.stats();
    println!("    Session Statistics:");
    println!("      Messages: {}", stats.messages);
    println!("      Questions: {}", stats.questions);
    println!("      Answers: {}", stats.answers);
    println!(
        "      Streaming: {}",
        if stats.streaming { "yes" } else { "no" }
    );
}

fn print_config(config: &ChatConfig, client: &AskClient) {
    println!("    Current Configuration:");
    println!("      Server: {}", client.base_url());
    println!("      History directory: {}", config.history_dir.display());
    println!(
        "      API key: {}",
        if client.has_api_key() { "set" } else { "(none)" }
    );
    println!("      Timeout: {}s", config.timeout_secs);
    match config.max_answer_bytes {
        Some(limit) => println!("      Answer limit: {limit} bytes"),
        None => println!("      Answer limit: (none)"),
    }
    println!(
        "      Color: {}",
        if config.use_color { "on" } else { "off" }
    );
}
