//! Inbound request metadata.

use std::net::SocketAddr;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};

/// Request metadata as seen by request policies.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method of the inbound call.
    pub method: Method,

    /// Full path and query as received by the gateway.
    pub url: String,

    /// Path (plus query) to forward to the upstream. Policies may rewrite it.
    pub destination: String,

    pub headers: HeaderMap,

    /// API key presented by the caller, if any.
    pub api_key: Option<String>,

    pub remote_addr: Option<SocketAddr>,

    /// Whether the inbound connection was secure.
    pub transport_secure: bool,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            method,
            destination: url.clone(),
            url,
            headers: HeaderMap::new(),
            api_key: None,
            remote_addr: None,
            transport_secure: false,
        }
    }

    /// Header value as a string, ignoring non-UTF-8 values.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set a header, replacing existing values. Invalid names or values are ignored.
    pub fn set_header(&mut self, name: &str, value: &str) -> bool {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
                true
            }
            _ => false,
        }
    }

    pub fn remove_header(&mut self, name: &str) -> bool {
        self.headers.remove(name).is_some()
    }
}
