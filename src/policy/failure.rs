//! Recoverable policy outcomes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad category of a policy failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PolicyFailureType {
    Authentication,
    Authorization,
    NotFound,
    Other,
}

impl PolicyFailureType {
    /// Default HTTP status for this category.
    pub fn default_status(self) -> u16 {
        match self {
            Self::Authentication => 401,
            Self::Authorization => 403,
            Self::NotFound => 404,
            Self::Other => 500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "Authentication",
            Self::Authorization => "Authorization",
            Self::NotFound => "NotFound",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for PolicyFailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured, expected outcome produced by a policy (quota exceeded,
/// authorization denied, ...).
///
/// Once produced it replaces the head for the rest of the traversal. Later
/// policies see it through their failure methods and may enrich it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyFailure {
    pub failure_type: PolicyFailureType,
    pub failure_code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_code: Option<u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl PolicyFailure {
    pub fn new(failure_type: PolicyFailureType, failure_code: u32, message: impl Into<String>) -> Self {
        Self {
            failure_type,
            failure_code,
            message: message.into(),
            response_code: None,
            headers: BTreeMap::new(),
        }
    }

    /// Override the HTTP status derived from the failure type.
    pub fn with_response_code(mut self, code: u16) -> Self {
        self.response_code = Some(code);
        self
    }

    /// Attach a header to be sent along with the failure response.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// HTTP status the failure should be reported with.
    pub fn http_status(&self) -> u16 {
        self.response_code
            .unwrap_or_else(|| self.failure_type.default_status())
    }

    /// The machine-checkable reason: type plus numeric code.
    pub fn reason(&self) -> (PolicyFailureType, u32) {
        (self.failure_type, self.failure_code)
    }
}

impl fmt::Display for PolicyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure {}: {}", self.failure_type, self.failure_code, self.message)
    }
}
