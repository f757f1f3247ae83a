//! Owning engine: drives one exchange through both chains.
//!
//! # Data Flow
//! ```text
//! ApiRequest + inbound body
//!     → RequestChain (forward)          ── failure ──▶ ResponseChain::apply_failure (reverse)
//!     → Connector::connect(request, request body)
//!     → ResponseChain (reverse)
//!     → ExchangeOutcome { Response | Failure | Error }
//! ```
//!
//! # Design Decisions
//! - The connector is a trait boundary; the gateway ships a hyper-based one
//!   in `http::connector`, tests use in-memory ones
//! - Bodies move between stages over unbounded channels; pacing is left to
//!   the transport on either end

pub mod connector;
pub mod executor;

pub use connector::{
    body_channel, BodyChunk, BodyReceiver, BodySender, Connector, ConnectorError, ConnectorResponse,
};
pub use executor::{ExchangeExecutor, ExchangeOutcome};
