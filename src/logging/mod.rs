//! Structured logging.

mod format;

pub use format::{DecisionLine, StructuredLogger};
