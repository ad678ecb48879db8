//! Meeting transcript to HTML report orchestration.
//!
//! A run cleans and aligns a transcript against slide captures, extracts a
//! knowledge graph, structures it into topics (from a supplied agenda or by
//! discovery), places captures under topics, summarizes each topic and
//! renders one self-contained report. Runs are queued behind a small HTTP
//! API and executed one at a time in child processes.

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod jobs;
pub mod logging;
pub mod pipeline;
pub mod recovery;
pub mod utils;

pub use error::{Error, Result};
