//! Single-round-trip HTTP transport seam and its `ureq` implementation.

use std::time::Duration;

use serde::de::DeserializeOwned;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// User agent sent with every request; the MediaWiki API rejects anonymous
/// clients.
pub const USER_AGENT: &str = concat!(
    "steam-pick/",
    env!("CARGO_PKG_VERSION"),
    " (https://github.com/dajoen/steam-pick)"
);

/// Outgoing GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: vec![
                ("User-Agent".to_string(), USER_AGENT.to_string()),
                ("Accept".to_string(), "application/json".to_string()),
            ],
        }
    }

    /// URL without its query string; safe to log since queries may carry keys.
    pub fn endpoint(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }

    /// Appends percent-encoded query parameters to the URL.
    pub fn with_query(mut self, params: &[(&str, &str)]) -> Self {
        if params.is_empty() {
            return self;
        }
        self.url.push(if self.url.contains('?') { '&' } else { '?' });
        for (index, (key, value)) in params.iter().enumerate() {
            if index > 0 {
                self.url.push('&');
            }
            self.url.push_str(key);
            self.url.push('=');
            self.url.push_str(urlencoding::encode(value).as_ref());
        }
        self
    }
}

/// Response status and fully-read body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Network-level failure; the request may not have reached the server.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Performs exactly one HTTP round trip. Non-2xx statuses are responses,
/// not errors.
pub trait HttpTransport: Send + Sync {
    fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Blocking transport over a shared `ureq` agent.
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT.min(timeout))
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self { agent }
    }

    fn classify_transport_failure(transport: &ureq::Transport) -> TransportError {
        let message = transport.to_string();
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("timed out") || lowered.contains("timeout") {
            TransportError::Timeout(message)
        } else {
            TransportError::Connection(message)
        }
    }

    fn read_body(response: ureq::Response) -> Result<HttpResponse, TransportError> {
        let status = response.status();
        let body = response
            .into_string()
            .map_err(|error| TransportError::Body(error.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

impl HttpTransport for UreqTransport {
    fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut call = self.agent.get(&request.url);
        for (name, value) in &request.headers {
            call = call.set(name, value);
        }
        match call.call() {
            Ok(response) => Self::read_body(response),
            Err(ureq::Error::Status(_, response)) => Self::read_body(response),
            Err(ureq::Error::Transport(transport)) => {
                Err(Self::classify_transport_failure(&transport))
            }
        }
    }
}
