//! Response conversion.
//!
//! # Responsibilities
//! - Turn an `ExchangeOutcome` into the response sent to the client
//! - Stream response body chunks as the response chain emits them
//! - Render policy failures with their status, headers and a JSON body
//! - Map unrecoverable errors to 502 (connector) or 500
//!
//! # Design Decisions
//! - Failure detail headers can be switched off (`failures.expose_headers`)
//! - Error responses never echo internal error text back to the caller

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::stream;

use crate::config::FailureConfig;
use crate::engine::{BodyReceiver, ExchangeOutcome};
use crate::exchange::ApiResponse;
use crate::policy::{PolicyError, PolicyFailure};

pub const X_POLICY_FAILURE_TYPE: &str = "x-policy-failure-type";
pub const X_POLICY_FAILURE_CODE: &str = "x-policy-failure-code";
pub const X_POLICY_FAILURE_MESSAGE: &str = "x-policy-failure-message";

/// Render an exchange outcome for the client.
pub fn outcome_response(outcome: ExchangeOutcome, config: &FailureConfig) -> Response {
    match outcome {
        ExchangeOutcome::Response { head, body } => stream_response(head, body),
        ExchangeOutcome::Failure(failure) => failure_response(&failure, config),
        ExchangeOutcome::Error(error) => error_response(&error),
    }
}

fn stream_response(head: ApiResponse, body: BodyReceiver) -> Response {
    let status = StatusCode::from_u16(head.code).unwrap_or(StatusCode::BAD_GATEWAY);
    // An error item makes hyper cut the response off instead of ending it.
    let chunks = stream::unfold(body, |mut body| async move {
        body.recv().await.map(|item| (item, body))
    });

    let mut response = Response::new(Body::from_stream(chunks));
    *response.status_mut() = status;
    *response.headers_mut() = head.headers;
    response
}

fn failure_response(failure: &PolicyFailure, config: &FailureConfig) -> Response {
    let status = StatusCode::from_u16(failure.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(failure)).into_response();
    let headers = response.headers_mut();

    if config.expose_headers {
        let detail = [
            (X_POLICY_FAILURE_TYPE, failure.failure_type.as_str().to_string()),
            (X_POLICY_FAILURE_CODE, failure.failure_code.to_string()),
            (X_POLICY_FAILURE_MESSAGE, failure.message.clone()),
        ];
        for (name, value) in detail {
            if let Ok(value) = HeaderValue::try_from(value) {
                headers.insert(HeaderName::from_static(name), value);
            }
        }
    }

    for (name, value) in &failure.headers {
        match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::debug!(header = %name, "Dropping invalid failure header"),
        }
    }

    response
}

fn error_response(error: &PolicyError) -> Response {
    tracing::error!(error = %error, kind = error.kind(), "Exchange aborted");
    match error {
        PolicyError::Connector(_) => (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response(),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "Policy chain error").into_response(),
    }
}
