//! Outbound connector boundary.
//!
//! The executor hands the connector the request as it leaves the request
//! chain, plus the request chain's output body stream. The connector returns
//! the upstream response head and a stream of response body chunks.
//!
//! A body stream that breaks off carries the error as its last item, so the
//! receiver can tell a truncated body from a complete one.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::exchange::{ApiRequest, ApiResponse};
use crate::policy::PolicyError;

/// One item of a body stream: a chunk, or the error that ended the stream.
pub type BodyChunk = Result<Bytes, PolicyError>;

/// Receiving half of a body stream between gateway stages.
pub type BodyReceiver = mpsc::UnboundedReceiver<BodyChunk>;

/// Sending half of a body stream between gateway stages.
pub type BodySender = mpsc::UnboundedSender<BodyChunk>;

/// Create a connected body stream.
pub fn body_channel() -> (BodySender, BodyReceiver) {
    mpsc::unbounded_channel()
}

/// Errors reported by a connector.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The upstream could not be reached.
    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    /// The upstream did not answer in time.
    #[error("upstream timed out after {0} seconds")]
    Timeout(u64),

    /// The request could not be mapped onto the upstream.
    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),
}

impl From<ConnectorError> for PolicyError {
    fn from(err: ConnectorError) -> Self {
        PolicyError::Connector(err.to_string())
    }
}

/// Upstream response as produced by a connector.
#[derive(Debug)]
pub struct ConnectorResponse {
    pub head: ApiResponse,
    pub body: BodyReceiver,
}

/// Performs the outbound call for an exchange.
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        request: ApiRequest,
        body: BodyReceiver,
    ) -> BoxFuture<'static, Result<ConnectorResponse, ConnectorError>>;
}
