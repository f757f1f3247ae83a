//! Upstream connector backed by the hyper-util client.
//!
//! # Responsibilities
//! - Rewrite the request's destination onto the configured upstream URL
//! - Stream the request chain's output body to the upstream
//! - Hand the upstream response head and body back to the executor
//!
//! # Design Decisions
//! - One pooled client per gateway, shared by all exchanges
//! - The inbound `Host` header is dropped so the client sets the upstream's
//! - Hop-by-hop headers are stripped in both directions

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, Request, Uri},
};
use futures_util::{future::BoxFuture, stream, FutureExt, StreamExt};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use url::Url;

use crate::config::{TimeoutConfig, UpstreamConfig};
use crate::engine::{body_channel, BodyReceiver, Connector, ConnectorError, ConnectorResponse};
use crate::exchange::{ApiRequest, ApiResponse};
use crate::policy::PolicyError;

/// Connection-level headers that never cross the gateway. Bodies may be
/// rewritten by policies, so content framing is dropped too and recomputed
/// by the outgoing side.
const HOP_BY_HOP: [HeaderName; 10] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::CONTENT_LENGTH,
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Forwards exchanges to a single upstream base URL.
#[derive(Clone)]
pub struct UpstreamConnector {
    client: Client<HttpConnector, Body>,
    base: String,
    request_timeout: Duration,
}

impl UpstreamConnector {
    pub fn new(upstream: &UpstreamConfig, timeouts: &TimeoutConfig) -> Result<Self, ConnectorError> {
        let url = Url::parse(&upstream.url)
            .map_err(|e| ConnectorError::InvalidRequest(format!("{}: {e}", upstream.url)))?;

        let mut http = HttpConnector::new();
        http.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(http);

        Ok(Self {
            client,
            base: url.as_str().trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(timeouts.request_secs),
        })
    }

    /// Absolute upstream URI for a request destination.
    pub fn upstream_uri(&self, destination: &str) -> Result<Uri, ConnectorError> {
        let path = if destination.starts_with('/') {
            destination.to_string()
        } else {
            format!("/{destination}")
        };
        format!("{}{}", self.base, path)
            .parse::<Uri>()
            .map_err(|e| ConnectorError::InvalidRequest(e.to_string()))
    }

    fn build_request(&self, request: ApiRequest, body: BodyReceiver) -> Result<Request<Body>, ConnectorError> {
        let uri = self.upstream_uri(&request.destination)?;
        let mut headers = request.headers;
        headers.remove(header::HOST);
        strip_hop_by_hop(&mut headers);

        let chunks = stream::unfold(body, |mut body| async move {
            body.recv().await.map(|item| (item, body))
        });

        let mut outbound = Request::builder()
            .method(request.method)
            .uri(uri)
            .body(Body::from_stream(chunks))
            .map_err(|e| ConnectorError::InvalidRequest(e.to_string()))?;
        *outbound.headers_mut() = headers;
        Ok(outbound)
    }
}

impl Connector for UpstreamConnector {
    fn connect(
        &self,
        request: ApiRequest,
        body: BodyReceiver,
    ) -> BoxFuture<'static, Result<ConnectorResponse, ConnectorError>> {
        let outbound = self.build_request(request, body);
        let client = self.client.clone();
        let request_timeout = self.request_timeout;

        async move {
            let outbound = outbound?;
            tracing::debug!(uri = %outbound.uri(), method = %outbound.method(), "Forwarding upstream");

            let response = match tokio::time::timeout(request_timeout, client.request(outbound)).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return Err(ConnectorError::Unreachable(e.to_string())),
                Err(_) => return Err(ConnectorError::Timeout(request_timeout.as_secs())),
            };

            let (parts, incoming) = response.into_parts();
            let mut head = ApiResponse::new(parts.status.as_u16());
            head.headers = parts.headers;
            strip_hop_by_hop(&mut head.headers);

            Ok(ConnectorResponse {
                head,
                body: upstream_body(incoming),
            })
        }
        .boxed()
    }
}

/// Pump an upstream response body into a body channel.
fn upstream_body(incoming: Incoming) -> BodyReceiver {
    let (tx, rx) = body_channel();
    let mut stream = Body::new(incoming).into_data_stream();
    tokio::spawn(async move {
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    if tx.send(Ok(chunk)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream body stream failed");
                    let _ = tx.send(Err(PolicyError::Interrupted(format!("upstream body: {e}"))));
                    return;
                }
            }
        }
    });
    rx
}
