//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     dispose / signal → trigger → accept loops and in-flight sends stop
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown of the binary
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownListener};
