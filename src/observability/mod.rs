//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! receiver, batches, connection guards
//!     → logging.rs (tracing events with peer/connection fields)
//!     → metrics.rs (counters and gauges through the metrics facade)
//! ```

pub mod logging;
pub mod metrics;
