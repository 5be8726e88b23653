//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound:
//!     receiver.rs (bind once, sequential accept loop)
//!     → security transform (identity unless configured)
//!     → ReceivingProtocol decode (frame.rs exact-length reads)
//!     → hub.rs (fan-out to every subscriber)
//!
//! Outbound:
//!     outgoing.rs (connect, loopback for this machine)
//!     → security transform
//!     → SendingProtocol writes frames in batch order
//! ```
//!
//! # Design Decisions
//! - Every socket has exactly one owner and is released by drop
//! - Open sockets are counted by connection.rs guards
//! - The accept loop starts on first subscription and runs once

pub mod connection;
pub mod destination;
pub mod frame;
pub mod hub;
pub mod local_host;
pub mod outgoing;
pub mod receiver;
pub mod stream;

pub use connection::{ConnectionTracker, Direction};
pub use destination::Destination;
pub use hub::{InboundItem, InboundMessages, Subscription};
pub use local_host::{LocalHost, MachineHostName, NeverLocal};
pub use outgoing::{BatchCanceller, OutgoingBatch};
pub use receiver::{FailurePolicy, Receiver};
pub use stream::{AsyncStream, BoxedStream};
