//! Inbound request conversion.
//!
//! # Responsibilities
//! - Map an axum request onto `ApiRequest` metadata
//! - Extract the caller's API key and remote address
//! - Stream the inbound body into the exchange's body channel
//!
//! # Design Decisions
//! - Request ID is added by `tower-http` before this runs, so it travels as a
//!   normal header through the request chain
//! - Body chunks are forwarded as they arrive; nothing is buffered here
//! - A client body that breaks off is forwarded as an error item, never as
//!   an early end-of-stream

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{request::Parts, Request},
};
use futures_util::StreamExt;

use crate::engine::{body_channel, BodyReceiver};
use crate::exchange::ApiRequest;
use crate::policy::PolicyError;

/// Header callers present their API key in.
pub const X_API_KEY: &str = "x-api-key";

/// Split an inbound request into policy metadata and a body stream.
pub fn into_exchange(request: Request<Body>) -> (ApiRequest, BodyReceiver) {
    let (parts, body) = request.into_parts();
    let api_request = api_request(&parts);

    let (tx, rx) = body_channel();
    let mut stream = body.into_data_stream();
    tokio::spawn(async move {
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    if tx.send(Ok(chunk)).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Inbound body stream failed");
                    let _ = tx.send(Err(PolicyError::Interrupted(format!("inbound body: {err}"))));
                    return;
                }
            }
        }
    });

    (api_request, rx)
}

fn api_request(parts: &Parts) -> ApiRequest {
    let url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut request = ApiRequest::new(parts.method.clone(), url);
    request.headers = parts.headers.clone();
    request.api_key = request.header(X_API_KEY).map(str::to_string);
    request.remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    request.transport_secure = parts.uri.scheme_str() == Some("https");
    request
}
