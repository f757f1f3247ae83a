//! Policy execution core.
//!
//! # Data Flow
//! ```text
//! owning engine
//!     → RequestChain::new(bindings, context)        (forward order)
//!     → apply(request) ──▶ policy A ──▶ policy B ──▶ head handler
//!     → write(chunk)* / end() ──▶ [stage A] ──▶ [stage B] ──▶ body/end handlers
//!
//!     → ResponseChain::new(bindings, context)       (reverse order)
//!     → apply(response) ──▶ policy B ──▶ policy A ──▶ head handler
//! ```
//!
//! # Design Decisions
//! - Two failure channels: `PolicyFailure` (expected, routed through the
//!   remaining policies) and `PolicyError` (unrecoverable, straight to the
//!   error handler)
//! - Control path and body path are wired separately; a policy without a
//!   body stage costs nothing on the body path
//! - One chain per exchange and direction; never reused

pub mod binding;
pub mod chain;
pub mod context;
pub mod cursor;
pub mod error;
pub mod failure;
pub mod request_chain;
pub mod response_chain;
pub mod scope;
pub mod spi;

pub use binding::{PolicyBinding, PolicyConfiguration};
pub use chain::{Chain, ChainOutcome, ChainState, Direction, PolicyChain};
pub use context::PolicyContext;
pub use cursor::{Cursor, Order};
pub use error::{ChainError, PolicyError};
pub use failure::{PolicyFailure, PolicyFailureType};
pub use request_chain::{RequestChain, RequestDirection};
pub use response_chain::{ResponseChain, ResponseDirection};
pub use scope::{PolicyScope, ScopeGuard};
pub use spi::Policy;
