use huddle_protocol::{
    MediaKind, ProducerInfo, ServerMessage, TransportDescriptor, TransportDirection,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::engine::RoutingContext;
use crate::error::{Result, SignalError};
use crate::session::Participant;
use crate::ws::connections::ConnectionManager;

/// A named session grouping participants who exchange media.
///
/// Owns one routing context (absent in signaling-only degraded mode) and the
/// participants currently joined. All mutation happens behind the registry's
/// per-room lock, so methods take plain `&mut self`.
pub struct Room {
    pub id: String,
    router: Option<Arc<dyn RoutingContext>>,
    participants: HashMap<Uuid, Participant>,
    /// Join order, for deterministic producer listings.
    order: Vec<Uuid>,
    connections: Arc<ConnectionManager>,
}

impl Room {
    pub fn new(
        id: String,
        router: Option<Arc<dyn RoutingContext>>,
        connections: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            id,
            router,
            participants: HashMap::new(),
            order: Vec::new(),
            connections,
        }
    }

    pub fn router(&self) -> Option<Arc<dyn RoutingContext>> {
        self.router.clone()
    }

    /// Installs the routing context once creation settles. The registry
    /// calls this under the room's write lock before any participant is
    /// admitted.
    pub fn set_router(&mut self, router: Arc<dyn RoutingContext>) {
        self.router = Some(router);
    }

    /// Capabilities handed to a joining client; `None` in degraded mode.
    pub fn router_capabilities(&self) -> Option<serde_json::Value> {
        self.router.as_ref().map(|r| r.rtp_capabilities())
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn contains(&self, participant_id: Uuid) -> bool {
        self.participants.contains_key(&participant_id)
    }

    pub fn participant_mut(&mut self, participant_id: Uuid) -> Result<&mut Participant> {
        self.participants
            .get_mut(&participant_id)
            .ok_or(SignalError::ParticipantNotFound(participant_id))
    }

    /// Admits a participant and tells everyone else. The notification is
    /// fire-and-forget; nobody acknowledges it.
    pub async fn admit(&mut self, participant_id: Uuid) {
        let others = self.other_participant_ids(participant_id);
        self.participants
            .insert(participant_id, Participant::new(participant_id));
        self.order.push(participant_id);
        tracing::info!("Participant {} joined room {}", participant_id, self.id);

        self.connections
            .send_to_many(&others, &ServerMessage::PeerJoined { participant_id })
            .await;
    }

    /// Creates a transport on this room's routing context and registers it
    /// on the participant before returning.
    pub async fn create_transport(
        &mut self,
        participant_id: Uuid,
        direction: TransportDirection,
    ) -> Result<TransportDescriptor> {
        let router = self.router.clone().ok_or(SignalError::RouterUnavailable)?;
        if !self.contains(participant_id) {
            return Err(SignalError::ParticipantNotFound(participant_id));
        }

        let transport = router.create_transport().await?;
        let descriptor = transport.descriptor();

        let participant = self.participant_mut(participant_id)?;
        participant.add_transport(direction, transport);

        tracing::debug!(
            "Created {:?} transport {} for participant {} in room {}",
            direction,
            descriptor.id,
            participant_id,
            self.id
        );
        Ok(descriptor)
    }

    /// Producers of everyone but the excluded participant, in join order
    /// then producer insertion order. Newcomers use this to discover media
    /// already flowing.
    pub fn list_producers(&self, excluding: Uuid) -> Vec<ProducerInfo> {
        let mut producers = Vec::new();
        for participant_id in &self.order {
            if *participant_id == excluding {
                continue;
            }
            if let Some(participant) = self.participants.get(participant_id) {
                for (_, producer) in participant.producers() {
                    producers.push(ProducerInfo {
                        producer_id: producer.id(),
                        owner_id: *participant_id,
                    });
                }
            }
        }
        producers
    }

    /// Push discovery: recipients react by issuing a consume request.
    pub async fn broadcast_new_producer(
        &self,
        producer_id: String,
        owner_id: Uuid,
        kind: MediaKind,
    ) {
        let others = self.other_participant_ids(owner_id);
        self.connections
            .send_to_many(
                &others,
                &ServerMessage::NewProducer {
                    producer_id,
                    owner_id,
                    kind,
                },
            )
            .await;
    }

    /// Removes a participant, closing all its media resources before the
    /// departure is announced, so nobody tries to consume a producer that is
    /// already gone. Returns false if the participant was not present
    /// (second removal is a no-op and broadcasts nothing).
    pub async fn remove(&mut self, participant_id: Uuid) -> bool {
        let Some(mut participant) = self.participants.remove(&participant_id) else {
            return false;
        };
        self.order.retain(|id| *id != participant_id);

        participant.close().await;
        tracing::info!("Participant {} left room {}", participant_id, self.id);

        let others = self.other_participant_ids(participant_id);
        self.connections
            .send_to_many(&others, &ServerMessage::PeerLeft { participant_id })
            .await;
        true
    }

    /// Drops a producer from its owner's bookkeeping after the engine
    /// reported it closed. Tolerates the participant already being gone.
    pub fn prune_producer(&mut self, participant_id: Uuid, producer_id: &str) {
        if let Some(participant) = self.participants.get_mut(&participant_id) {
            participant.remove_producer(producer_id);
        }
    }

    /// Symmetric cleanup for consumers whose source producer closed.
    pub fn prune_consumer(&mut self, participant_id: Uuid, consumer_id: &str) {
        if let Some(participant) = self.participants.get_mut(&participant_id) {
            participant.remove_consumer(consumer_id);
        }
    }

    /// Closes every participant and the routing context. Used at process
    /// shutdown only; normal teardown goes through `remove`.
    pub async fn close(&mut self) {
        for (_, mut participant) in self.participants.drain() {
            participant.close().await;
        }
        self.order.clear();
        if let Some(router) = self.router.take() {
            router.close().await;
        }
    }

    fn other_participant_ids(&self, excluding: Uuid) -> Vec<Uuid> {
        self.order
            .iter()
            .copied()
            .filter(|id| *id != excluding)
            .collect()
    }
}
