//! Transport adapter: one request in, one response or typed failure out.
//!
//! The workflow talks to the extraction service only through the
//! [`Transport`] trait, so callers can inject their own implementation
//! (an in-memory fake in tests, a client with custom middleware in
//! production). [`HttpTransport`] is the reqwest-backed default.
//!
//! ## Guarantees
//!
//! * exactly one network call per [`Transport::send`]
//! * no retries and no timeout; polling cadence and retry policy live in
//!   the stages above
//! * non-2xx → [`TransportError::Http`], no response → [`TransportError::Network`]

use crate::error::{TransportError, WorkflowError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// HTTP method subset used by the extraction API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
        })
    }
}

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    /// A single-part multipart/form-data body carrying one file.
    Multipart {
        field: String,
        file_name: String,
        content_type: String,
        bytes: Vec<u8>,
    },
}

/// A transport-level request. `path` is relative to the configured base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: RequestBody,
    pub headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: RequestBody::Empty,
            headers: Vec::new(),
        }
    }

    /// POST with a JSON body.
    pub fn post_json(path: impl Into<String>, body: &impl Serialize) -> Result<Self, TransportError> {
        let path = path.into();
        let value = serde_json::to_value(body).map_err(|e| TransportError::Decode {
            path: path.clone(),
            reason: format!("could not encode request body: {e}"),
        })?;
        Ok(Self {
            method: Method::Post,
            path,
            body: RequestBody::Json(value),
            headers: Vec::new(),
        })
    }

    /// POST with a one-file multipart body.
    pub fn post_multipart(
        path: impl Into<String>,
        field: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: RequestBody::Multipart {
                field: field.into(),
                file_name: file_name.into(),
                content_type: content_type.into(),
                bytes,
            },
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A 2xx response with its raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub path: String,
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Build a response from any serialisable value. Handy for fakes.
    pub fn json_body(path: impl Into<String>, value: &impl Serialize) -> Self {
        Self {
            status: 200,
            path: path.into(),
            body: serde_json::to_vec(value).unwrap_or_default(),
        }
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_slice(&self.body).map_err(|e| TransportError::Decode {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }
}

/// Anything that can carry an [`ApiRequest`] to the extraction service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue exactly one request.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// reqwest-backed [`Transport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for `base_url` (e.g. `http://localhost:8000`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, WorkflowError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("visai-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WorkflowError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Use a pre-configured reqwest client (proxies, custom TLS, …).
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let ApiRequest {
            method,
            path,
            body,
            headers,
        } = request;
        let url = self.url(&path);
        debug!("{} {}", method, url);

        let network = |reason: String| TransportError::Network {
            method: method.to_string(),
            path: path.clone(),
            reason,
        };

        let mut builder = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart {
                field,
                file_name,
                content_type,
                bytes,
            } => {
                let part = reqwest::multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str(&content_type)
                    .map_err(|e| network(format!("invalid content type '{content_type}': {e}")))?;
                builder.multipart(reqwest::multipart::Form::new().part(field, part))
            }
        };

        let response = builder.send().await.map_err(|e| network(e.to_string()))?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!("{} {} → HTTP {}", method, url, status.as_u16());
            return Err(TransportError::Http {
                status: status.as_u16(),
                path,
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| network(format!("reading response body: {e}")))?;
        debug!("{} {} → {} ({} bytes)", method, url, status.as_u16(), bytes.len());

        Ok(ApiResponse {
            status: status.as_u16(),
            path,
            body: bytes.to_vec(),
        })
    }
}
