//! Media engine abstraction
//!
//! The signaling layer never touches packets; it orchestrates handles owned
//! by an external SFU capability. This module defines the narrow surface the
//! orchestration layer consumes: routing contexts scoped to a room, transports
//! owned by a participant, and producer/consumer handles whose close events
//! feed back into session bookkeeping.
//!
//! [`inmem::InMemoryEngine`] is a complete in-process implementation of the
//! surface, used by the test suite and by signaling-only deployments.

pub mod inmem;

use async_trait::async_trait;
use huddle_protocol::{MediaKind, TransportDescriptor};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine (or its worker process) is not available. Rooms created
    /// while unavailable degrade to signaling-only operation.
    #[error("media engine unavailable")]
    Unavailable,

    /// The offered capabilities cannot receive the requested producer.
    #[error("producer cannot be consumed with the offered capabilities")]
    NotConsumable,

    /// Opaque failure from the engine, surfaced to the requesting connection.
    #[error("media engine failure: {0}")]
    Failure(String),
}

/// Callback invoked exactly once when a handle closes.
///
/// Callbacks run on the engine's notification path and must not block; spawn
/// a task for anything that needs a lock.
pub type CloseCallback = Box<dyn FnOnce() + Send + 'static>;

/// Entry point into the media engine: creates per-room routing contexts.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_routing_context(&self) -> Result<Arc<dyn RoutingContext>, EngineError>;
}

/// Per-room forwarding and capability-negotiation handle.
#[async_trait]
pub trait RoutingContext: Send + Sync {
    /// Codec capabilities the client needs before creating transports.
    fn rtp_capabilities(&self) -> serde_json::Value;

    /// Whether a producer can be received with the offered capabilities.
    /// Returns false for unknown or already-closed producers.
    fn can_consume(&self, producer_id: &str, rtp_capabilities: &serde_json::Value) -> bool;

    async fn create_transport(&self) -> Result<Arc<dyn TransportHandle>, EngineError>;

    /// Closes the context and everything created from it.
    async fn close(&self);
}

/// A negotiated network path owned by a single participant.
///
/// Closing a transport cascades to every producer and consumer created on it;
/// the session layer relies on that contract for participant teardown.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    fn id(&self) -> String;

    /// Connection parameters handed to the client verbatim.
    fn descriptor(&self) -> TransportDescriptor;

    async fn connect(&self, dtls_parameters: serde_json::Value) -> Result<(), EngineError>;

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
    ) -> Result<Arc<dyn ProducerHandle>, EngineError>;

    /// Creates a consumer for a remote producer. The consumer starts paused;
    /// the client resumes it once decode resources are ready. This layer
    /// never auto-resumes.
    async fn consume(
        &self,
        producer_id: &str,
        rtp_capabilities: &serde_json::Value,
    ) -> Result<Arc<dyn ConsumerHandle>, EngineError>;

    async fn close(&self);
}

/// One outgoing media stream on a send transport.
pub trait ProducerHandle: Send + Sync {
    fn id(&self) -> String;
    fn kind(&self) -> MediaKind;

    /// Idempotent.
    fn close(&self);

    /// Registers a callback fired when the producer closes, including
    /// out-of-band closes originating inside the engine (e.g. the underlying
    /// transport died). Not fired if the producer is already closed.
    fn on_close(&self, callback: CloseCallback);
}

/// One incoming media stream forwarded from a remote producer.
#[async_trait]
pub trait ConsumerHandle: Send + Sync {
    fn id(&self) -> String;
    fn producer_id(&self) -> String;
    fn kind(&self) -> MediaKind;
    fn rtp_parameters(&self) -> serde_json::Value;

    async fn resume(&self) -> Result<(), EngineError>;

    /// Idempotent.
    fn close(&self);

    /// Registers a callback fired when the source producer closes, so the
    /// receiving client can be told to stop rendering stale media.
    fn on_producer_close(&self, callback: CloseCallback);
}
