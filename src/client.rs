use std::env;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client as ReqwestClient, RequestBuilder, Response};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::observability::{UPLOAD_ERRORS, UPLOADS};
use crate::sse::{SseEvent, process_sse};
use crate::stream::{AnswerSource, FragmentStream};

/// Where the question-answering service listens unless told otherwise.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000/";

/// Environment variable holding an optional bearer token.
pub const API_KEY_ENV: &str = "ASKSTREAM_API_KEY";

/// Server-sent events of one answer channel.
pub type SseStream = Pin<Box<dyn Stream<Item = Result<SseEvent>> + Send>>;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const ASK_STREAM_PATH: &str = "ask_stream";
const UPLOAD_PATH: &str = "upload_pdf";

/// Client for the question-answering service.
#[derive(Debug, Clone)]
pub struct AskClient {
    client: ReqwestClient,
    base_url: Url,
    api_key: Option<String>,
    timeout: Duration,
}

impl AskClient {
    /// Create a client for [`DEFAULT_SERVER_URL`].
    ///
    /// The bearer token is read from `ASKSTREAM_API_KEY` if set.
    pub fn new() -> Result<Self> {
        Self::with_options(None, None, None)
    }

    /// Create a client with custom settings.
    pub fn with_options(
        base_url: Option<&str>,
        api_key: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let base_url = parse_base_url(base_url.unwrap_or(DEFAULT_SERVER_URL))?;
        let api_key = api_key
            .or_else(|| env::var(API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty());
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        // No overall timeout: answer bodies stream for as long as the server talks.
        let client = ReqwestClient::builder()
            .connect_timeout(timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            timeout,
        })
    }

    /// The service's base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The connect and upload timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns true if requests carry a bearer token.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| Error::validation("API key is not a valid header value", None))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::url(format!("Invalid endpoint {path}: {e}"), Some(e)))
    }

    /// The URL the answer channel for `question` is opened on.
    pub fn ask_stream_url(&self, question: &str) -> Result<Url> {
        let mut url = self.endpoint(ASK_STREAM_PATH)?;
        url.query_pairs_mut().append_pair("question", question);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request
            .headers(self.default_headers()?)
            .send()
            .await
            .map_err(|e| Error::from_transport(e, self.timeout))?;

        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }
        Ok(response)
    }

    /// Map a non-success response to a typed error.
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<u64>().ok());

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {e}"),
                    Some(Box::new(e)),
                );
            }
        };
        let message = error_message(status_code, &body);

        match status_code {
            400 => Error::bad_request(message),
            401 => Error::authentication(message),
            403 => Error::permission(message),
            404 => Error::not_found(message),
            408 => Error::timeout(message, None),
            429 => Error::rate_limit(message, retry_after),
            500 => Error::internal_server(message),
            502..=504 => Error::service_unavailable(message, retry_after),
            _ => Error::api(status_code, message),
        }
    }

    /// Open the answer channel for `question` and return its server-sent events.
    pub async fn open_stream(&self, question: &str) -> Result<SseStream> {
        let url = self.ask_stream_url(question)?;
        debug!(url = %url, "opening answer channel");
        let request = self
            .client
            .get(url)
            .header(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        let response = self.send(request).await?;
        Ok(Box::pin(process_sse(response.bytes_stream())))
    }

    /// Upload a document for the service to answer questions about.
    ///
    /// The file is sent as the `file` field of a multipart form.
    pub async fn upload_document(&self, path: impl AsRef<Path>) -> Result<()> {
        let result = self.upload_document_inner(path.as_ref()).await;
        match &result {
            Ok(()) => {
                UPLOADS.click();
                info!(path = %path.as_ref().display(), "document uploaded");
            }
            Err(err) => {
                UPLOAD_ERRORS.click();
                warn!(path = %path.as_ref().display(), error = %err, "document upload failed");
            }
        }
        result
    }

    async fn upload_document_inner(&self, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::io(format!("failed to read {}", path.display()), e))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/pdf")
            .map_err(|e| {
                Error::http_client(format!("Invalid upload part: {e}"), Some(Box::new(e)))
            })?;
        let form = Form::new().part("file", part);

        let request = self
            .client
            .post(self.endpoint(UPLOAD_PATH)?)
            .timeout(self.timeout)
            .multipart(form);
        self.send(request).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AnswerSource for AskClient {
    async fn open(&self, question: &str) -> Result<FragmentStream> {
        let events = self.open_stream(question).await?;
        Ok(message_payloads(events))
    }
}

/// Keep the `data` of unnamed and `message` events; other named events are dropped.
pub fn message_payloads(events: SseStream) -> FragmentStream {
    Box::pin(events.filter_map(|event| async move {
        match event {
            Ok(event) if event.is_message() => Some(Ok(event.data)),
            Ok(event) => {
                debug!(event = ?event.event, "ignoring named server event");
                None
            }
            Err(err) => Some(Err(err)),
        }
    }))
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)
        .map_err(|e| Error::url(format!("Invalid server URL {raw:?}: {e}"), Some(e)))?;
    if url.cannot_be_a_base() {
        return Err(Error::validation(
            format!("server URL {raw:?} cannot be used as a base"),
            Some("server".to_string()),
        ));
    }
    // Relative joins replace the last path segment unless the path ends in a slash.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn error_message(status_code: u16, body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        detail: Option<serde_json::Value>,
        message: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        match parsed.detail {
            Some(serde_json::Value::String(detail)) => return detail,
            Some(detail) => return detail.to_string(),
            None => {}
        }
        if let Some(message) = parsed.message {
            return message;
        }
    }
    let body = body.trim();
    if body.is_empty() {
        format!("HTTP {status_code}")
    } else {
        body.to_string()
    }
}
