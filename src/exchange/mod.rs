//! Head objects threaded through the policy chains.
//!
//! # Data Flow
//! ```text
//! inbound HTTP request
//!     → http/request.rs builds an ApiRequest
//!     → request chain (policies mutate it in order)
//!     → connector sends it upstream, returns an ApiResponse
//!     → response chain (policies mutate it in reverse order)
//!     → http/response.rs writes it to the client
//! ```
//!
//! # Design Decisions
//! - Heads are moved through the chain, never cloned between policies
//! - Only control metadata lives here; bodies stream separately

pub mod request;
pub mod response;

pub use request::ApiRequest;
pub use response::ApiResponse;
