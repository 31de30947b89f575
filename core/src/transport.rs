//! The I/O half of the client: executing one `HttpRequest`.

use ureq::http;
use ureq::Agent;

use crate::error::{CouchError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Executes a single HTTP round-trip.
///
/// Implementations must return 4xx/5xx responses as data; only failures that
/// produced no response at all become `CouchError::Transport`.
pub trait Transport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Blocking transport backed by a `ureq::Agent`.
///
/// Response bodies are read in full with no size cap unless one is set with
/// [`UreqTransport::with_body_limit`].
#[derive(Clone)]
pub struct UreqTransport {
    agent: Agent,
    body_limit: u64,
}

impl UreqTransport {
    /// Disables ureq's status-code-as-error behavior so the client does the
    /// status interpretation, and enables the non-standard `COPY` verb.
    pub fn new() -> Self {
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .allow_non_standard_methods(true)
            .build()
            .new_agent();
        Self::with_agent(agent)
    }

    /// Wrap a caller-configured agent. It must not treat HTTP statuses as
    /// errors.
    pub fn with_agent(agent: Agent) -> Self {
        Self {
            agent,
            body_limit: u64::MAX,
        }
    }

    /// Fail responses whose body exceeds `limit` bytes.
    pub fn with_body_limit(mut self, limit: u64) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn body_limit(&self) -> u64 {
        self.body_limit
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = http::Request::builder()
            .method(request.method.as_str())
            .uri(request.url.as_str());
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        // PUT and POST always carry a body, empty if need be.
        let body = match (&request.body, request.method) {
            (Some(body), _) => Some(body.as_str()),
            (None, HttpMethod::Put | HttpMethod::Post) => Some(""),
            (None, _) => None,
        };
        let sent = match body {
            Some(body) => builder
                .body(body)
                .map_err(transport_error)
                .and_then(|req| self.agent.run(req).map_err(transport_error)),
            None => builder
                .body(())
                .map_err(transport_error)
                .and_then(|req| self.agent.run(req).map_err(transport_error)),
        };
        let mut response = sent?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(key, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (key.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .body_mut()
            .with_config()
            .limit(self.body_limit)
            .read_to_string()
            .map_err(transport_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn transport_error<E>(err: E) -> CouchError
where
    E: std::error::Error + Send + Sync + 'static,
{
    CouchError::Transport(Box::new(err))
}
