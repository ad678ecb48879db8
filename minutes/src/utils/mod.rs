//! Shared helpers: filesystem, clock formatting, text shaping, and lenient serde.

pub mod fs;
pub mod lenient;
pub mod text;
pub mod time;
