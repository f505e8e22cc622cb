//! Shared building blocks for the courier relay: logging, configuration
//! types, error types and small address helpers.

pub mod address;
pub mod config;
pub mod error;
pub mod logging;

pub use tracing;

/// Process-wide control signal broadcast to every listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Stop accepting connections and let in-flight sessions finish.
    Shutdown,
}
