//! Policy gateway library.
//!
//! An ordered list of policies runs over every API exchange: forward over
//! the request, reverse over the response, with body-stream transformation
//! and recoverable failures routed through the remaining policies.

pub mod config;
pub mod engine;
pub mod exchange;
pub mod http;
pub mod io;
pub mod lifecycle;
pub mod observability;
pub mod policy;

pub use config::schema::GatewayConfig;
pub use engine::{Connector, ExchangeExecutor, ExchangeOutcome};
pub use exchange::{ApiRequest, ApiResponse};
pub use http::{GatewayServer, UpstreamConnector};
pub use lifecycle::Shutdown;
pub use policy::{
    Policy, PolicyBinding, PolicyChain, PolicyConfiguration, PolicyContext, PolicyError,
    PolicyFailure, PolicyFailureType, RequestChain, ResponseChain,
};
