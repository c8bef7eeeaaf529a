//! Configuration types for the chat application.
//!
//! Values come from three layers: built-in defaults, an optional YAML file named by `--config`,
//! and command-line flags.  Later layers win.

use std::path::{Path, PathBuf};
use std::time::Duration;

use arrrg_derive::CommandLine;
use serde::Deserialize;

use crate::client::DEFAULT_SERVER_URL;
use crate::controller::SessionConfig;
use crate::error::{Error, Result};

/// Default connect and upload timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Directory under `$HOME` that holds the history store.
const HISTORY_DIR_NAME: &str = ".askstream";

/// Command-line arguments for the askstream-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Base URL of the question-answering service.
    #[arrrg(optional, "Service base URL (default: http://localhost:8000/)", "URL")]
    pub server: Option<String>,

    /// Directory holding the chat history.
    #[arrrg(optional, "History directory (default: ~/.askstream)", "DIR")]
    pub history_dir: Option<String>,

    /// YAML configuration file.
    #[arrrg(optional, "YAML configuration file", "FILE")]
    pub config: Option<String>,

    /// Connect and upload timeout in seconds.
    #[arrrg(optional, "Connect/upload timeout in seconds (default: 300)", "SECS")]
    pub timeout_secs: Option<u64>,

    /// Cap on the size of one answer.
    #[arrrg(optional, "Truncate answers beyond this many bytes", "BYTES")]
    pub max_answer_bytes: Option<usize>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// The YAML configuration file.  Every field is optional.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub server: Option<String>,
    pub history_dir: Option<PathBuf>,
    pub api_key: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_answer_bytes: Option<usize>,
    pub color: Option<bool>,
}

impl ConfigFile {
    /// Parses a configuration file from YAML text.
    pub fn parse(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Reads and parses the configuration file at `path`.
    pub fn read(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("failed to read {}", path.display()), e))?;
        Self::parse(&yaml)
    }
}

/// Configuration for a chat session.
///
/// This struct holds the resolved configuration values after applying the configuration file
/// and command-line arguments over the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Base URL of the question-answering service.
    pub server_url: String,

    /// Directory holding the chat history.
    pub history_dir: PathBuf,

    /// Bearer token.  `None` falls back to `ASKSTREAM_API_KEY`.
    pub api_key: Option<String>,

    /// Connect and upload timeout in seconds.
    pub timeout_secs: u64,

    /// Cap on the size of one answer.
    pub max_answer_bytes: Option<usize>,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Server: http://localhost:8000/
    /// - History: ~/.askstream
    /// - Timeout: 300 seconds
    /// - Answers: unbounded
    /// - Color: enabled
    pub fn new() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            history_dir: default_history_dir(),
            api_key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_answer_bytes: None,
            use_color: true,
        }
    }

    /// Resolves configuration from the defaults, the file named by `--config`, and `args`.
    pub fn load(args: ChatArgs) -> Result<Self> {
        let mut config = Self::new();
        if let Some(path) = &args.config {
            config = config.with_file(ConfigFile::read(Path::new(path))?);
        }
        Ok(config.with_args(args))
    }

    /// Applies the values set in a configuration file.
    pub fn with_file(mut self, file: ConfigFile) -> Self {
        if let Some(server) = file.server {
            self.server_url = server;
        }
        if let Some(dir) = file.history_dir {
            self.history_dir = dir;
        }
        if file.api_key.is_some() {
            self.api_key = file.api_key;
        }
        if let Some(timeout_secs) = file.timeout_secs {
            self.timeout_secs = timeout_secs;
        }
        if file.max_answer_bytes.is_some() {
            self.max_answer_bytes = file.max_answer_bytes;
        }
        if let Some(color) = file.color {
            self.use_color = color;
        }
        self
    }

    /// Applies the values given on the command line.
    pub fn with_args(mut self, args: ChatArgs) -> Self {
        if let Some(server) = args.server {
            self.server_url = server;
        }
        if let Some(dir) = args.history_dir {
            self.history_dir = PathBuf::from(dir);
        }
        if let Some(timeout_secs) = args.timeout_secs {
            self.timeout_secs = timeout_secs;
        }
        if args.max_answer_bytes.is_some() {
            self.max_answer_bytes = args.max_answer_bytes;
        }
        if args.no_color {
            self.use_color = false;
        }
        self
    }

    /// Sets the service base URL.
    pub fn with_server_url(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = server_url.into();
        self
    }

    /// Sets the history directory.
    pub fn with_history_dir(mut self, history_dir: impl Into<PathBuf>) -> Self {
        self.history_dir = history_dir.into();
        self
    }

    /// Sets the bearer token.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Sets the connect and upload timeout.
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Sets the answer size ceiling.
    pub fn with_max_answer_bytes(mut self, max_answer_bytes: Option<usize>) -> Self {
        self.max_answer_bytes = max_answer_bytes;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// The timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The controller settings derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default().with_max_answer_bytes(self.max_answer_bytes)
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ChatArgs> for ChatConfig {
    fn from(args: ChatArgs) -> Self {
        ChatConfig::new().with_args(args)
    }
}

fn default_history_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(HISTORY_DIR_NAME),
        None => PathBuf::from(HISTORY_DIR_NAME),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ChatConfig::new();
        assert_eq!(config.server_url, "http://localhost:8000/");
        assert!(config.history_dir.ends_with(".askstream"));
        assert!(config.api_key.is_none());
        assert_eq!(config.timeout_secs, 300);
        assert_eq!(config.timeout(), Duration::from_secs(300));
        assert!(config.max_answer_bytes.is_none());
        assert!(config.use_color);
    }

    #[test]
    fn config_from_args_defaults() {
        let config = ChatConfig::from(ChatArgs::default());
        assert_eq!(config, ChatConfig::new());
    }

    #[test]
    fn config_from_args_custom() {
        let args = ChatArgs {
            server: Some("http://qa.internal:9000/".to_string()),
            history_dir: Some("/tmp/askstream".to_string()),
            config: None,
            timeout_secs: Some(30),
            max_answer_bytes: Some(65_536),
            no_color: true,
        };
        let config = ChatConfig::from(args);
        assert_eq!(config.server_url, "http://qa.internal:9000/");
        assert_eq!(config.history_dir, PathBuf::from("/tmp/askstream"));
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.max_answer_bytes, Some(65_536));
        assert!(!config.use_color);
        assert_eq!(config.session_config().max_answer_bytes, Some(65_536));
    }

    #[test]
    fn config_builder_pattern() {
        let config = ChatConfig::new()
            .with_server_url("http://example.com/")
            .with_history_dir("history")
            .with_api_key(Some("key".to_string()))
            .with_timeout_secs(5)
            .with_max_answer_bytes(Some(10))
            .without_color();

        assert_eq!(config.server_url, "http://example.com/");
        assert_eq!(config.history_dir, PathBuf::from("history"));
        assert_eq!(config.api_key.as_deref(), Some("key"));
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.max_answer_bytes, Some(10));
        assert!(!config.use_color);
    }

    #[test]
    fn parse_config_file() {
        let file = ConfigFile::parse(
            "server: http://files.example.com/\n\
             history_dir: /var/lib/askstream\n\
             api_key: secret\n\
             timeout_secs: 12\n\
             max_answer_bytes: 4096\n\
             color: false\n",
        )
        .unwrap();
        let config = ChatConfig::new().with_file(file);
        assert_eq!(config.server_url, "http://files.example.com/");
        assert_eq!(config.history_dir, PathBuf::from("/var/lib/askstream"));
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.timeout_secs, 12);
        assert_eq!(config.max_answer_bytes, Some(4096));
        assert!(!config.use_color);
    }

    #[test]
    fn empty_config_file_changes_nothing() {
        let file = ConfigFile::parse("{}").unwrap();
        assert_eq!(file, ConfigFile::default());
        assert_eq!(ChatConfig::new().with_file(file), ChatConfig::new());
    }

    #[test]
    fn unknown_config_key_is_rejected() {
        let err = ConfigFile::parse("sever: typo\n").unwrap_err();
        assert!(err.is_serialization());
    }

    #[test]
    fn flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("askstream.yaml");
        std::fs::write(&path, "server: http://from-file/\ntimeout_secs: 7\n").unwrap();

        let args = ChatArgs {
            server: Some("http://from-flag/".to_string()),
            config: Some(path.to_string_lossy().into_owned()),
            ..ChatArgs::default()
        };
        let config = ChatConfig::load(args).unwrap();
        assert_eq!(config.server_url, "http://from-flag/");
        assert_eq!(config.timeout_secs, 7);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let args = ChatArgs {
            config: Some("/definitely/not/here.yaml".to_string()),
            ..ChatArgs::default()
        };
        assert!(matches!(ChatConfig::load(args), Err(Error::Io { .. })));
    }
}
