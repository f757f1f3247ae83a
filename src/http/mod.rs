//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, trace)
//!     → request.rs (ApiRequest + inbound body stream)
//!     → engine::ExchangeExecutor (request chain → connector → response chain)
//!         └─ connector.rs (hyper-util client to the upstream)
//!     → response.rs (outcome → status, headers, streamed body)
//!     → Send to client
//! ```

pub mod connector;
pub mod request;
pub mod response;
pub mod server;

pub use connector::UpstreamConnector;
pub use server::{AppState, GatewayServer, X_REQUEST_ID};
