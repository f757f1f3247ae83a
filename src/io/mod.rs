//! Body stream I/O.
//!
//! # Data Flow
//! ```text
//! transport thread
//!     → Chain::write(chunk) / Chain::end()
//!     → pipeline.rs (linked stages, traversal order)
//!     → chain terminal body/end handlers
//! ```
//!
//! # Design Decisions
//! - Chunks are `bytes::Bytes`: handing one on never copies
//! - The chain buffers nothing; any buffering belongs to a stage
//! - Backpressure is the transport's concern

pub mod pipeline;
pub mod stream;

pub use bytes::Bytes;
pub use pipeline::{BodyPipeline, Stage};
pub use stream::{BodySink, BodyTransformer, BufferedBody, MapChunks};
