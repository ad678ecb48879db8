//! The pipeline stages, in execution order.
//!
//! Each stage reads the slices of [`PipelineState`](crate::pipeline::state::PipelineState)
//! produced before it and returns its own slice. Chunked stages run their
//! model calls through the shared recovery executor.

pub mod agenda;
pub mod align;
pub mod discovery;
pub mod images;
pub mod knowledge;
pub mod load;
pub mod summarize;
pub mod topics;
