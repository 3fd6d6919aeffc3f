//! HTTP tunneling to the local request handler
//!
//! Inbound `HTTP_REQUEST` frames are forwarded to an external local
//! HTTP-serving collaborator. Every well-formed request produces exactly
//! one `HTTP_RESPONSE` frame, including on internal failure: a route miss
//! maps to 404, an unreachable local server to 502, anything else to 500.

use async_trait::async_trait;
use base64::Engine;
use station_proto::{HttpTunnelRequest, HttpTunnelResponse};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Failures a local handler can report for one request.
///
/// These never escalate to link state; they only shape the reply frame.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("no route for {0}")]
    NotFound(String),

    #[error("local server unreachable: {0}")]
    Unreachable(String),

    #[error("handler failure: {0}")]
    Internal(String),
}

/// A captured local HTTP response
#[derive(Debug, Clone)]
pub struct LocalResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

/// The local HTTP-serving collaborator the link tunnels to
#[async_trait]
pub trait LocalHttpHandler: Send + Sync {
    async fn handle(
        &self,
        method: &str,
        path: &str,
        headers: &BTreeMap<String, String>,
        body: Option<&[u8]>,
    ) -> Result<LocalResponse, HandlerError>;
}

/// Build the reply frame for a request outcome. Binary bodies are
/// base64-encoded; text passes through as-is.
pub(crate) fn build_response(
    request_id: &str,
    outcome: Result<LocalResponse, HandlerError>,
) -> HttpTunnelResponse {
    match outcome {
        Ok(response) => {
            let (body, is_base64) = match String::from_utf8(response.body) {
                Ok(text) => (text, false),
                Err(raw) => (
                    base64::engine::general_purpose::STANDARD.encode(raw.into_bytes()),
                    true,
                ),
            };
            HttpTunnelResponse {
                request_id: request_id.to_string(),
                status_code: response.status,
                response_headers: response.headers,
                response_body: body,
                is_base64,
            }
        }
        Err(error) => {
            let status = match &error {
                HandlerError::NotFound(_) => 404,
                HandlerError::Unreachable(_) => 502,
                HandlerError::Internal(_) => 500,
            };
            debug!(request_id = %request_id, status, error = %error, "tunnel request failed locally");
            HttpTunnelResponse {
                request_id: request_id.to_string(),
                status_code: status,
                response_headers: BTreeMap::from([(
                    "content-type".to_string(),
                    "text/plain".to_string(),
                )]),
                response_body: error.to_string(),
                is_base64: false,
            }
        }
    }
}

/// Forwards tunneled requests to a local HTTP server over reqwest.
///
/// An optional prefix allowlist rejects unroutable paths up front; an empty
/// list forwards everything.
pub struct HttpForwarder {
    base_url: String,
    allowed_prefixes: Vec<String>,
    client: reqwest::Client,
}

impl HttpForwarder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            allowed_prefixes: Vec::new(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_allowed_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.allowed_prefixes = prefixes;
        self
    }

    fn is_routable(&self, path: &str) -> bool {
        self.allowed_prefixes.is_empty()
            || self
                .allowed_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

#[async_trait]
impl LocalHttpHandler for HttpForwarder {
    async fn handle(
        &self,
        method: &str,
        path: &str,
        headers: &BTreeMap<String, String>,
        body: Option<&[u8]>,
    ) -> Result<LocalResponse, HandlerError> {
        if !self.is_routable(path) {
            return Err(HandlerError::NotFound(path.to_string()));
        }

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| HandlerError::Internal(format!("invalid method '{method}'")))?;
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);

        let mut request = self.client.request(method, &url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.body(body.to_vec());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                HandlerError::Unreachable(e.to_string())
            } else {
                HandlerError::Internal(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let mut response_headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                response_headers.insert(name.to_string(), value.to_string());
            }
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| HandlerError::Internal(e.to_string()))?
            .to_vec();

        Ok(LocalResponse {
            status,
            headers: response_headers,
            body,
        })
    }
}

/// Decode the inbound request body to bytes
pub(crate) fn request_body(request: &HttpTunnelRequest) -> Option<Vec<u8>> {
    request.body.as_ref().map(|text| text.clone().into_bytes())
}

/// Log-and-forward wrapper used by the router
pub(crate) async fn run_request(
    handler: &dyn LocalHttpHandler,
    request: &HttpTunnelRequest,
) -> HttpTunnelResponse {
    let headers = request.headers.clone().unwrap_or_default();
    let body = request_body(request);
    let outcome = handler
        .handle(&request.method, &request.path, &headers, body.as_deref())
        .await;

    if let Err(error) = &outcome {
        warn!(
            request_id = %request.request_id,
            method = %request.method,
            path = %request.path,
            error = %error,
            "local handler failed"
        );
    }

    build_response(&request.request_id, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let not_found = build_response("r-1", Err(HandlerError::NotFound("/x".into())));
        assert_eq!(not_found.status_code, 404);

        let unreachable = build_response("r-2", Err(HandlerError::Unreachable("refused".into())));
        assert_eq!(unreachable.status_code, 502);

        let internal = build_response("r-3", Err(HandlerError::Internal("boom".into())));
        assert_eq!(internal.status_code, 500);
    }

    #[test]
    fn test_text_body_passes_through() {
        let response = build_response(
            "r-4",
            Ok(LocalResponse {
                status: 200,
                headers: BTreeMap::new(),
                body: b"plain text".to_vec(),
            }),
        );
        assert!(!response.is_base64);
        assert_eq!(response.response_body, "plain text");
    }

    #[test]
    fn test_binary_body_is_base64() {
        let bytes = vec![0u8, 159, 146, 150];
        let response = build_response(
            "r-5",
            Ok(LocalResponse {
                status: 200,
                headers: BTreeMap::new(),
                body: bytes.clone(),
            }),
        );
        assert!(response.is_base64);
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(response.response_body.as_bytes())
            .unwrap();
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn test_prefix_allowlist() {
        let forwarder = HttpForwarder::new("http://localhost:3000")
            .with_allowed_prefixes(vec!["/api".to_string()]);
        assert!(forwarder.is_routable("/api/items"));
        assert!(!forwarder.is_routable("/admin"));

        let open = HttpForwarder::new("http://localhost:3000");
        assert!(open.is_routable("/anything"));
    }
}
