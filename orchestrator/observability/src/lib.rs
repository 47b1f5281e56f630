//! Observability for converge.
//!
//! - **Tracing**: structured logging to stderr, human-readable or JSON, with
//!   one span per reconciled container

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, TracingConfig};
