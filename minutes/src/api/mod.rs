//! HTTP job API.
//!
//! A thin layer over [`crate::jobs::JobQueueManager`]: submit, poll, fetch
//! the report and read the job log.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
