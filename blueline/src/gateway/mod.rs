//! Thin retrying client for the external rendering/vision service.
//!
//! Every pipeline call into the processing service goes through
//! [`ProcessingGateway`]. The gateway owns local-vs-remote routing (picked
//! once at startup via [`ServiceRouting`]) and bounded connection retry;
//! per-step retry of service-level failures belongs to the engine, not here.

use crate::errors::GatewayError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Header prefix used to carry request fields and lift response metadata.
const FIELD_HEADER_PREFIX: &str = "x-bl-";

/// A request to the processing service.
#[derive(Debug, Clone, Default)]
pub struct ServiceRequest {
    /// Operation name, e.g. `render-page` or `detect-callouts`.
    pub operation: String,
    /// Binary payload (source document or sheet raster).
    pub payload: Vec<u8>,
    /// Small string fields: plan id, project id, org id, page number, etc.
    pub fields: HashMap<String, String>,
}

impl ServiceRequest {
    /// Creates a request for the given operation.
    #[must_use]
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Self::default()
        }
    }

    /// Sets the binary payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Adds a string field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// A response from the processing service.
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    /// HTTP-like status code.
    pub status: u16,
    /// JSON body for JSON responses; lifted header fields for binary ones.
    pub body: serde_json::Value,
    /// Binary payload for binary responses (rasters, tile archives).
    pub payload: Option<Vec<u8>>,
}

impl ServiceResponse {
    /// Deserializes the JSON body into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Decode`] when the body does not match `T`.
    pub fn body_as<T: DeserializeOwned>(&self, operation: &str) -> Result<T, GatewayError> {
        serde_json::from_value(self.body.clone()).map_err(|err| GatewayError::Decode {
            operation: operation.to_string(),
            message: err.to_string(),
        })
    }

    /// Returns a string field from the body, if present.
    #[must_use]
    pub fn body_str(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(serde_json::Value::as_str)
    }
}

/// Transport behind the gateway.
#[async_trait]
pub trait ProcessingBackend: Send + Sync {
    /// Performs one call and returns the service's response.
    ///
    /// A non-2xx status is returned as [`GatewayError::Status`], never as an
    /// `Ok` response.
    async fn call(&self, request: ServiceRequest) -> Result<ServiceResponse, GatewayError>;
}

/// Where the processing service lives.
///
/// Selected once at startup and baked into the gateway; nothing downstream
/// consults ambient configuration to pick a transport.
#[derive(Debug, Clone)]
pub enum ServiceRouting {
    /// A developer-local service instance.
    Local {
        /// Base URL, e.g. `http://127.0.0.1:8787`.
        base_url: String,
    },
    /// The deployed remote service.
    Remote {
        /// Base URL of the deployment.
        base_url: String,
    },
}

impl ServiceRouting {
    /// Returns the base URL for this routing choice.
    #[must_use]
    pub fn base_url(&self) -> &str {
        match self {
            Self::Local { base_url } | Self::Remote { base_url } => base_url,
        }
    }
}

/// HTTP transport over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
    connect_attempts: usize,
}

impl HttpBackend {
    /// Creates a backend for the given routing choice.
    #[must_use]
    pub fn new(routing: &ServiceRouting) -> Self {
        Self {
            base_url: routing.base_url().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            connect_attempts: 3,
        }
    }

    /// Sets how many times a connection failure is retried locally.
    #[must_use]
    pub const fn with_connect_attempts(mut self, attempts: usize) -> Self {
        self.connect_attempts = attempts;
        self
    }

    async fn send_once(
        &self,
        request: &ServiceRequest,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let url = format!("{}/{}", self.base_url, request.operation);
        let mut builder = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(request.payload.clone());
        for (key, value) in &request.fields {
            builder = builder.header(format!("{FIELD_HEADER_PREFIX}{key}"), value);
        }
        builder.send().await
    }
}

#[async_trait]
impl ProcessingBackend for HttpBackend {
    async fn call(&self, request: ServiceRequest) -> Result<ServiceResponse, GatewayError> {
        let mut last_connect_error = String::new();
        for attempt in 1..=self.connect_attempts.max(1) {
            let response = match self.send_once(&request).await {
                Ok(response) => response,
                Err(err) if err.is_connect() || err.is_timeout() => {
                    debug!(
                        operation = %request.operation,
                        attempt,
                        error = %err,
                        "connection to processing service failed"
                    );
                    last_connect_error = err.to_string();
                    continue;
                }
                Err(err) => return Err(GatewayError::Connect(err.to_string())),
            };

            let status = response.status().as_u16();
            if !response.status().is_success() {
                return Err(GatewayError::Status {
                    operation: request.operation,
                    status,
                });
            }

            let is_json = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.starts_with("application/json"));

            if is_json {
                let body: serde_json::Value =
                    response.json().await.map_err(|err| GatewayError::Decode {
                        operation: request.operation.clone(),
                        message: err.to_string(),
                    })?;
                return Ok(ServiceResponse {
                    status,
                    body,
                    payload: None,
                });
            }

            // Binary response: lift x-bl-* headers into the body so callers
            // read metadata (zoom levels, dimensions) uniformly.
            let mut lifted = serde_json::Map::new();
            for (name, value) in response.headers() {
                if let Some(field) = name.as_str().strip_prefix(FIELD_HEADER_PREFIX) {
                    if let Ok(value) = value.to_str() {
                        lifted.insert(field.to_string(), serde_json::Value::from(value));
                    }
                }
            }
            let bytes = response.bytes().await.map_err(|err| GatewayError::Decode {
                operation: request.operation.clone(),
                message: err.to_string(),
            })?;
            return Ok(ServiceResponse {
                status,
                body: serde_json::Value::Object(lifted),
                payload: Some(bytes.to_vec()),
            });
        }

        Err(GatewayError::Connect(last_connect_error))
    }
}

/// The pipeline's handle on the processing service.
#[derive(Clone)]
pub struct ProcessingGateway {
    backend: Arc<dyn ProcessingBackend>,
}

impl ProcessingGateway {
    /// Creates a gateway with an HTTP backend for the given routing.
    #[must_use]
    pub fn new(routing: &ServiceRouting) -> Self {
        Self::with_backend(Arc::new(HttpBackend::new(routing)))
    }

    /// Creates a gateway over an arbitrary backend (tests use a scripted one).
    #[must_use]
    pub fn with_backend(backend: Arc<dyn ProcessingBackend>) -> Self {
        Self { backend }
    }

    /// Performs one service call.
    ///
    /// # Errors
    ///
    /// Propagates the backend's [`GatewayError`]; callers map it into step
    /// failure semantics.
    pub async fn call(&self, request: ServiceRequest) -> Result<ServiceResponse, GatewayError> {
        debug!(operation = %request.operation, payload_bytes = request.payload.len(), "calling processing service");
        self.backend.call(request).await
    }
}

impl std::fmt::Debug for ProcessingGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingGateway").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = ServiceRequest::new("render-page")
            .with_payload(vec![1, 2, 3])
            .with_field("page-number", "4");

        assert_eq!(request.operation, "render-page");
        assert_eq!(request.payload, vec![1, 2, 3]);
        assert_eq!(request.fields.get("page-number").map(String::as_str), Some("4"));
    }

    #[test]
    fn test_routing_base_url() {
        let local = ServiceRouting::Local {
            base_url: "http://127.0.0.1:8787".to_string(),
        };
        assert_eq!(local.base_url(), "http://127.0.0.1:8787");
    }

    #[test]
    fn test_response_typed_body() {
        #[derive(serde::Deserialize)]
        struct Meta {
            is_valid: bool,
        }

        let response = ServiceResponse {
            status: 200,
            body: serde_json::json!({"is_valid": true}),
            payload: None,
        };

        let meta: Meta = response.body_as("extract-metadata").unwrap();
        assert!(meta.is_valid);
    }

    #[test]
    fn test_response_decode_error_names_operation() {
        let response = ServiceResponse {
            status: 200,
            body: serde_json::json!("not an object"),
            payload: None,
        };

        let result: Result<HashMap<String, String>, _> = response.body_as("detect-layout");
        assert!(matches!(
            result,
            Err(GatewayError::Decode { ref operation, .. }) if operation == "detect-layout"
        ));
    }
}
