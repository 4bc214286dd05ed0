//! Shared signaling protocol for Huddle
//!
//! Wire messages and descriptor types exchanged between clients and the
//! signaling server. Both sides depend on this crate so the protocol can
//! never drift between them.

pub mod messages;
pub mod types;

pub use messages::{ClientEnvelope, ClientMessage, ServerEnvelope, ServerMessage};
pub use types::{
    ConsumerDescriptor, ErrorKind, MediaKind, ProducerInfo, TransportDescriptor,
    TransportDirection,
};
