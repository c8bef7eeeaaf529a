//! Chat application module for the interactive terminal client.
//!
//! This module holds the pieces of `askstream-chat` that are not the session core:
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`commands`]: Slash command parsing

mod commands;
mod config;

pub use crate::render::{PlainTextRenderer, Renderer};
pub use commands::{ChatCommand, help_text, is_confirmation, parse_command};
pub use config::{ChatArgs, ChatConfig, ConfigFile};
