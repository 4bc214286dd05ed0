use huddle_protocol::{MediaKind, TransportDirection};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::engine::{ConsumerHandle, ProducerHandle, TransportHandle};

/// Per-connection state inside a room.
///
/// The participant id equals the owning connection's id. Every handle held
/// here was created on a transport owned by this participant; handles are
/// never shared across participants.
pub struct Participant {
    pub id: Uuid,
    transports: HashMap<String, (TransportDirection, Arc<dyn TransportHandle>)>,
    /// Insertion-ordered so producer listings are deterministic. One
    /// producer per kind; a later produce of the same kind supersedes.
    producers: Vec<(MediaKind, Arc<dyn ProducerHandle>)>,
    consumers: HashMap<String, Arc<dyn ConsumerHandle>>,
    closed: bool,
}

impl Participant {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            transports: HashMap::new(),
            producers: Vec::new(),
            consumers: HashMap::new(),
            closed: false,
        }
    }

    pub fn add_transport(
        &mut self,
        direction: TransportDirection,
        transport: Arc<dyn TransportHandle>,
    ) {
        self.transports
            .insert(transport.id(), (direction, transport));
    }

    /// Stale or unknown ids are a soft miss: duplicate or out-of-order
    /// messages after teardown are expected under network jitter, so callers
    /// treat `None` as a no-op rather than a protocol violation.
    pub fn transport(&self, transport_id: &str) -> Option<Arc<dyn TransportHandle>> {
        self.transports
            .get(transport_id)
            .map(|(_, transport)| transport.clone())
    }

    /// The receive transport, if one was already created for this
    /// participant. Consume requests reuse it; there is at most one.
    pub fn recv_transport(&self) -> Option<Arc<dyn TransportHandle>> {
        self.transports
            .values()
            .find(|(direction, _)| *direction == TransportDirection::Recv)
            .map(|(_, transport)| transport.clone())
    }

    /// Registers a producer under its kind. Last write wins: the superseded
    /// handle (if any) is returned so the caller can close it.
    pub fn add_producer(
        &mut self,
        kind: MediaKind,
        producer: Arc<dyn ProducerHandle>,
    ) -> Option<Arc<dyn ProducerHandle>> {
        if let Some(entry) = self.producers.iter_mut().find(|(k, _)| *k == kind) {
            let old = std::mem::replace(&mut entry.1, producer);
            return Some(old);
        }
        self.producers.push((kind, producer));
        None
    }

    /// Drops a producer from the bookkeeping map after the engine reported
    /// it closed. Keeping this map consistent is what prevents stale-handle
    /// growth when transports die out-of-band.
    pub fn remove_producer(&mut self, producer_id: &str) {
        self.producers.retain(|(_, p)| p.id() != producer_id);
    }

    pub fn producers(&self) -> impl Iterator<Item = (MediaKind, &Arc<dyn ProducerHandle>)> {
        self.producers.iter().map(|(kind, p)| (*kind, p))
    }

    pub fn add_consumer(&mut self, consumer: Arc<dyn ConsumerHandle>) {
        self.consumers.insert(consumer.id(), consumer);
    }

    pub fn consumer(&self, consumer_id: &str) -> Option<Arc<dyn ConsumerHandle>> {
        self.consumers.get(consumer_id).cloned()
    }

    pub fn remove_consumer(&mut self, consumer_id: &str) {
        self.consumers.remove(consumer_id);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closes every owned transport; the engine's close cascade takes the
    /// producers and consumers down with them. Idempotent: a second call
    /// does nothing and reports `false`.
    pub async fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        for (_, (_, transport)) in self.transports.drain() {
            transport.close().await;
        }
        self.producers.clear();
        self.consumers.clear();
        true
    }
}
