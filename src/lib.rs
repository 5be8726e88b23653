//! Network transport for a lightweight message queue.
//!
//! Accepts TCP connections and decodes their byte streams into messages,
//! and connects to remote endpoints to deliver batches of outgoing messages.
//! Framing and stream security are pluggable.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod security;

pub use config::TransportConfig;
pub use error::{ProtocolError, SecurityError, SharedError, TransportError, TransportResult};
pub use net::{Destination, InboundMessages, OutgoingBatch, Receiver};
pub use protocol::{Message, OutgoingMessage};
