//! Upstream response metadata.

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

/// Response metadata as seen by response policies.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub code: u16,
    pub message: String,
    pub headers: HeaderMap,
}

impl ApiResponse {
    /// A response with the canonical reason phrase for `code`.
    pub fn new(code: u16) -> Self {
        let message = StatusCode::from_u16(code)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self {
            code,
            message,
            headers: HeaderMap::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

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
