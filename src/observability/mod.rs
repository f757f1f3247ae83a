//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! chain engine, executor, http front end produce:
//!     → tracing events with exchange_id / direction / policy fields
//!     → metrics.rs counters and histograms
//!
//! Consumers:
//!     → fmt subscriber (stdout), installed by logging.rs
//!     → Prometheus scrape endpoint, installed by metrics.rs
//! ```
//!
//! # Design Decisions
//! - Every policy invocation runs inside a `policy` span (see policy/scope.rs)
//! - Metrics are cheap and recorder-agnostic

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
