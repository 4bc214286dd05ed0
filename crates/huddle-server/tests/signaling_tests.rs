//! Integration tests for the Huddle signaling server
//!
//! Each test starts the real axum app on a random port with the in-memory
//! media engine and drives it over WebSocket like a client would.
//!
//! Run with: cargo test -p huddle-server --test signaling_tests

use futures_util::{SinkExt, StreamExt};
use huddle_protocol::{
    ClientEnvelope, ClientMessage, ErrorKind, MediaKind, ServerEnvelope, ServerMessage,
    TransportDescriptor, TransportDirection,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use huddle_server::engine::inmem::InMemoryEngine;
use huddle_server::engine::{
    ConsumerHandle, EngineError, MediaEngine, ProducerHandle, RoutingContext, TransportHandle,
};
use huddle_server::session::SessionRegistry;
use huddle_server::state::{AppState, Config};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: std::net::SocketAddr,
    engine: Arc<InMemoryEngine>,
    registry: Arc<SessionRegistry>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    async fn start(engine: InMemoryEngine) -> Self {
        let engine = Arc::new(engine);
        Self::start_with(engine.clone(), engine).await
    }

    /// Starts the app on a wrapped engine while keeping the inner in-memory
    /// engine around for state inspection.
    async fn start_with(engine: Arc<dyn MediaEngine>, inspect: Arc<InMemoryEngine>) -> Self {
        let config = Config {
            bind_address: "127.0.0.1:0".to_string(),
        };
        let state = AppState::new(config, engine);
        let registry = state.registry.clone();
        let app = huddle_server::create_app(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .ok();
        });

        Self {
            addr,
            engine: inspect,
            registry,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// WebSocket test client that correlates replies by request id and queues
/// broadcasts arriving in between.
struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    connection_id: Uuid,
    next_request_id: u64,
    pending_broadcasts: VecDeque<ServerMessage>,
}

impl Client {
    async fn connect(url: &str) -> Self {
        let (ws, _) = connect_async(url).await.expect("connect websocket");
        let mut client = Self {
            ws,
            connection_id: Uuid::nil(),
            next_request_id: 1,
            pending_broadcasts: VecDeque::new(),
        };
        match client.recv_any().await {
            ServerEnvelope {
                message: ServerMessage::Welcome { connection_id },
                ..
            } => client.connection_id = connection_id,
            other => panic!("expected welcome, got {:?}", other),
        }
        client
    }

    async fn recv_any(&mut self) -> ServerEnvelope {
        let msg = timeout(RECV_TIMEOUT, self.ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("connection closed")
            .expect("websocket error");
        match msg {
            Message::Text(text) => serde_json::from_str(text.as_str()).expect("parse envelope"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    /// Sends a request without waiting for its reply.
    async fn send_request(&mut self, message: ClientMessage) -> u64 {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        let envelope = ClientEnvelope {
            request_id: Some(request_id),
            message,
        };
        let json = serde_json::to_string(&envelope).expect("serialize request");
        self.ws
            .send(Message::Text(json.into()))
            .await
            .expect("send request");
        request_id
    }

    /// Waits for the correlated reply, queueing any broadcasts that arrive
    /// first.
    async fn wait_reply(&mut self, request_id: u64) -> ServerMessage {
        loop {
            let envelope = self.recv_any().await;
            match envelope.request_id {
                Some(id) if id == request_id => return envelope.message,
                Some(other) => panic!("reply for unexpected request {}", other),
                None => self.pending_broadcasts.push_back(envelope.message),
            }
        }
    }

    async fn request(&mut self, message: ClientMessage) -> ServerMessage {
        let request_id = self.send_request(message).await;
        self.wait_reply(request_id).await
    }

    /// Next server-initiated message (queued or fresh off the wire).
    async fn next_broadcast(&mut self) -> ServerMessage {
        if let Some(msg) = self.pending_broadcasts.pop_front() {
            return msg;
        }
        loop {
            let envelope = self.recv_any().await;
            if envelope.request_id.is_none() {
                return envelope.message;
            }
        }
    }

    fn try_queued_broadcast(&mut self) -> Option<ServerMessage> {
        self.pending_broadcasts.pop_front()
    }

    async fn join(&mut self, room_id: &str) -> Option<serde_json::Value> {
        match self.request(ClientMessage::Join {
            room_id: room_id.to_string(),
        })
        .await
        {
            ServerMessage::Joined {
                router_rtp_capabilities,
            } => router_rtp_capabilities,
            other => panic!("join failed: {:?}", other),
        }
    }

    async fn create_transport(&mut self, room_id: &str, direction: TransportDirection) -> String {
        match self.request(ClientMessage::CreateTransport {
            room_id: room_id.to_string(),
            direction,
        })
        .await
        {
            ServerMessage::TransportCreated { transport } => transport.id,
            other => panic!("create_transport failed: {:?}", other),
        }
    }

    async fn produce(&mut self, transport_id: &str, kind: MediaKind) -> String {
        match self.request(ClientMessage::Produce {
            transport_id: transport_id.to_string(),
            kind,
            rtp_parameters: json!({ "codecs": [] }),
        })
        .await
        {
            ServerMessage::Produced { producer_id, .. } => producer_id,
            other => panic!("produce failed: {:?}", other),
        }
    }
}

fn caps() -> serde_json::Value {
    json!({ "codecs": [] })
}

/// Engine that delegates to the in-memory one but takes a while to produce,
/// widening the window in which other requests could observe intermediate
/// state.
struct SlowProduceEngine {
    inner: Arc<InMemoryEngine>,
    delay: Duration,
}

#[async_trait::async_trait]
impl MediaEngine for SlowProduceEngine {
    async fn create_routing_context(&self) -> Result<Arc<dyn RoutingContext>, EngineError> {
        let inner = self.inner.create_routing_context().await?;
        Ok(Arc::new(SlowProduceContext {
            inner,
            delay: self.delay,
        }))
    }
}

struct SlowProduceContext {
    inner: Arc<dyn RoutingContext>,
    delay: Duration,
}

#[async_trait::async_trait]
impl RoutingContext for SlowProduceContext {
    fn rtp_capabilities(&self) -> serde_json::Value {
        self.inner.rtp_capabilities()
    }

    fn can_consume(&self, producer_id: &str, rtp_capabilities: &serde_json::Value) -> bool {
        self.inner.can_consume(producer_id, rtp_capabilities)
    }

    async fn create_transport(&self) -> Result<Arc<dyn TransportHandle>, EngineError> {
        let inner = self.inner.create_transport().await?;
        Ok(Arc::new(SlowProduceTransport {
            inner,
            delay: self.delay,
        }))
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

struct SlowProduceTransport {
    inner: Arc<dyn TransportHandle>,
    delay: Duration,
}

#[async_trait::async_trait]
impl TransportHandle for SlowProduceTransport {
    fn id(&self) -> String {
        self.inner.id()
    }

    fn descriptor(&self) -> TransportDescriptor {
        self.inner.descriptor()
    }

    async fn connect(&self, dtls_parameters: serde_json::Value) -> Result<(), EngineError> {
        self.inner.connect(dtls_parameters).await
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
    ) -> Result<Arc<dyn ProducerHandle>, EngineError> {
        tokio::time::sleep(self.delay).await;
        self.inner.produce(kind, rtp_parameters).await
    }

    async fn consume(
        &self,
        producer_id: &str,
        rtp_capabilities: &serde_json::Value,
    ) -> Result<Arc<dyn ConsumerHandle>, EngineError> {
        self.inner.consume(producer_id, rtp_capabilities).await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

#[tokio::test]
async fn join_produce_and_discover_via_listing() {
    let server = TestServer::start(InMemoryEngine::new()).await;

    let mut alice = Client::connect(&server.ws_url()).await;
    let capabilities = alice.join("r1").await;
    assert!(capabilities.is_some(), "routing available, caps expected");

    let transport_id = alice.create_transport("r1", TransportDirection::Send).await;
    let reply = alice
        .request(ClientMessage::ConnectTransport {
            transport_id: transport_id.clone(),
            dtls_parameters: json!({ "role": "client" }),
        })
        .await;
    assert!(matches!(reply, ServerMessage::TransportConnected { .. }));

    let producer_id = alice.produce(&transport_id, MediaKind::Video).await;

    let mut bob = Client::connect(&server.ws_url()).await;
    bob.join("r1").await;

    // Alice is told about the newcomer.
    match alice.next_broadcast().await {
        ServerMessage::PeerJoined { participant_id } => {
            assert_eq!(participant_id, bob.connection_id);
        }
        other => panic!("expected peer_joined, got {:?}", other),
    }

    // Bob discovers Alice's producer through the listing, attributed to her.
    let reply = bob
        .request(ClientMessage::ListProducers {
            room_id: "r1".to_string(),
        })
        .await;
    match reply {
        ServerMessage::Producers { producers } => {
            assert_eq!(producers.len(), 1);
            assert_eq!(producers[0].producer_id, producer_id);
            assert_eq!(producers[0].owner_id, alice.connection_id);
        }
        other => panic!("expected producers, got {:?}", other),
    }
}

#[tokio::test]
async fn new_producer_is_pushed_to_present_participants_exactly_once() {
    let server = TestServer::start(InMemoryEngine::new()).await;

    let mut alice = Client::connect(&server.ws_url()).await;
    alice.join("r1").await;
    let mut bob = Client::connect(&server.ws_url()).await;
    bob.join("r1").await;

    let transport_id = alice.create_transport("r1", TransportDirection::Send).await;
    let producer_id = alice.produce(&transport_id, MediaKind::Audio).await;

    match bob.next_broadcast().await {
        ServerMessage::NewProducer {
            producer_id: announced,
            owner_id,
            kind,
        } => {
            assert_eq!(announced, producer_id);
            assert_eq!(owner_id, alice.connection_id);
            assert_eq!(kind, MediaKind::Audio);
        }
        other => panic!("expected new_producer, got {:?}", other),
    }
    assert!(
        bob.try_queued_broadcast().is_none(),
        "new_producer must arrive exactly once"
    );

    // The producing participant never sees its own announcement.
    while let Some(msg) = alice.try_queued_broadcast() {
        assert!(
            !matches!(msg, ServerMessage::NewProducer { .. }),
            "producer announced to its own owner: {:?}",
            msg
        );
    }
}

#[tokio::test]
async fn degraded_room_joins_but_refuses_transports() {
    let server = TestServer::start(InMemoryEngine::unavailable()).await;

    let mut alice = Client::connect(&server.ws_url()).await;
    let capabilities = alice.join("quiet").await;
    assert!(capabilities.is_none(), "signaling-only room has no caps");

    let reply = alice
        .request(ClientMessage::CreateTransport {
            room_id: "quiet".to_string(),
            direction: TransportDirection::Send,
        })
        .await;
    match reply {
        ServerMessage::Error { kind, .. } => assert_eq!(kind, ErrorKind::RouterUnavailable),
        other => panic!("expected router_unavailable, got {:?}", other),
    }

    // Signaling still works: a second join is announced.
    let mut bob = Client::connect(&server.ws_url()).await;
    bob.join("quiet").await;
    match alice.next_broadcast().await {
        ServerMessage::PeerJoined { participant_id } => {
            assert_eq!(participant_id, bob.connection_id);
        }
        other => panic!("expected peer_joined, got {:?}", other),
    }
}

#[tokio::test]
async fn consume_starts_paused_and_resume_activates() {
    let server = TestServer::start(InMemoryEngine::new()).await;

    let mut alice = Client::connect(&server.ws_url()).await;
    alice.join("r1").await;
    let transport_id = alice.create_transport("r1", TransportDirection::Send).await;
    let producer_id = alice.produce(&transport_id, MediaKind::Video).await;

    let mut bob = Client::connect(&server.ws_url()).await;
    bob.join("r1").await;

    let reply = bob
        .request(ClientMessage::Consume {
            remote_producer_id: producer_id.clone(),
            rtp_capabilities: caps(),
        })
        .await;
    let consumer_id = match reply {
        ServerMessage::Consumed { consumer } => {
            assert_eq!(consumer.producer_id, producer_id);
            assert_eq!(consumer.kind, MediaKind::Video);
            consumer.consumer_id
        }
        other => panic!("expected consumed, got {:?}", other),
    };

    assert_eq!(server.engine.consumer_paused(&consumer_id), Some(true));

    let reply = bob
        .request(ClientMessage::ResumeConsumer {
            consumer_id: consumer_id.clone(),
        })
        .await;
    assert!(matches!(reply, ServerMessage::ConsumerResumed { .. }));
    assert_eq!(server.engine.consumer_paused(&consumer_id), Some(false));
}

#[tokio::test]
async fn capability_mismatch_is_not_consumable() {
    let server = TestServer::start(InMemoryEngine::new()).await;

    let mut alice = Client::connect(&server.ws_url()).await;
    alice.join("r1").await;
    let transport_id = alice.create_transport("r1", TransportDirection::Send).await;
    let producer_id = alice.produce(&transport_id, MediaKind::Audio).await;

    let mut bob = Client::connect(&server.ws_url()).await;
    bob.join("r1").await;

    let reply = bob
        .request(ClientMessage::Consume {
            remote_producer_id: producer_id,
            rtp_capabilities: json!({}),
        })
        .await;
    match reply {
        ServerMessage::Error { kind, .. } => assert_eq!(kind, ErrorKind::NotConsumable),
        other => panic!("expected not_consumable, got {:?}", other),
    }
}

#[tokio::test]
async fn owner_disconnect_notifies_consumers_and_kills_producers() {
    let server = TestServer::start(InMemoryEngine::new()).await;

    let mut alice = Client::connect(&server.ws_url()).await;
    alice.join("r1").await;
    let transport_id = alice.create_transport("r1", TransportDirection::Send).await;
    let producer_id = alice.produce(&transport_id, MediaKind::Video).await;

    let mut bob = Client::connect(&server.ws_url()).await;
    bob.join("r1").await;
    let reply = bob
        .request(ClientMessage::Consume {
            remote_producer_id: producer_id.clone(),
            rtp_capabilities: caps(),
        })
        .await;
    assert!(matches!(reply, ServerMessage::Consumed { .. }));

    // Alice drops the connection; her resources close before anyone hears
    // about the departure.
    drop(alice);

    let mut saw_peer_left = false;
    let mut saw_producer_closed = false;
    for _ in 0..2 {
        match bob.next_broadcast().await {
            ServerMessage::PeerLeft { .. } => saw_peer_left = true,
            ServerMessage::ProducerClosed {
                producer_id: closed,
            } => {
                assert_eq!(closed, producer_id);
                saw_producer_closed = true;
            }
            other => panic!("unexpected broadcast: {:?}", other),
        }
    }
    assert!(saw_peer_left && saw_producer_closed);

    // The former producer can no longer be consumed.
    let reply = bob
        .request(ClientMessage::Consume {
            remote_producer_id: producer_id,
            rtp_capabilities: caps(),
        })
        .await;
    match reply {
        ServerMessage::Error { kind, .. } => assert_eq!(kind, ErrorKind::NotConsumable),
        other => panic!("expected not_consumable, got {:?}", other),
    }
}

#[tokio::test]
async fn last_leave_removes_room_and_rejoin_gets_fresh_context() {
    let server = TestServer::start(InMemoryEngine::new()).await;

    let mut alice = Client::connect(&server.ws_url()).await;
    alice.join("r1").await;
    assert_eq!(server.engine.context_count(), 1);
    assert_eq!(server.registry.room_count().await, 1);

    let reply = alice.request(ClientMessage::Leave).await;
    assert!(matches!(reply, ServerMessage::Left));
    assert_eq!(server.registry.room_count().await, 0);

    // Rejoining the same id builds a fresh room with a new routing context.
    let mut bob = Client::connect(&server.ws_url()).await;
    bob.join("r1").await;
    assert_eq!(server.engine.context_count(), 2);
}

#[tokio::test]
async fn requests_before_join_are_rejected() {
    let server = TestServer::start(InMemoryEngine::new()).await;

    let mut client = Client::connect(&server.ws_url()).await;
    let reply = client
        .request(ClientMessage::ListProducers {
            room_id: "r1".to_string(),
        })
        .await;
    match reply {
        ServerMessage::Error { kind, .. } => assert_eq!(kind, ErrorKind::BadRequest),
        other => panic!("expected bad_request, got {:?}", other),
    }
}

#[tokio::test]
async fn stale_transport_connect_is_acknowledged_as_noop() {
    let server = TestServer::start(InMemoryEngine::new()).await;

    let mut alice = Client::connect(&server.ws_url()).await;
    alice.join("r1").await;

    let reply = alice
        .request(ClientMessage::ConnectTransport {
            transport_id: "long-gone".to_string(),
            dtls_parameters: json!({}),
        })
        .await;
    assert!(matches!(reply, ServerMessage::TransportConnected { .. }));

    let reply = alice
        .request(ClientMessage::ResumeConsumer {
            consumer_id: "also-gone".to_string(),
        })
        .await;
    assert!(matches!(reply, ServerMessage::ConsumerResumed { .. }));
}

#[tokio::test]
async fn failed_leave_keeps_the_connection_usable() {
    let server = TestServer::start(InMemoryEngine::new()).await;

    let mut client = Client::connect(&server.ws_url()).await;
    let reply = client.request(ClientMessage::Leave).await;
    match reply {
        ServerMessage::Error { kind, .. } => assert_eq!(kind, ErrorKind::BadRequest),
        other => panic!("expected bad_request, got {:?}", other),
    }

    // The failed request must not have ended the connection.
    client.join("r1").await;
}

#[tokio::test]
async fn listing_never_sees_a_half_created_producer() {
    let inner = Arc::new(InMemoryEngine::new());
    let engine = Arc::new(SlowProduceEngine {
        inner: inner.clone(),
        delay: Duration::from_millis(500),
    });
    let server = TestServer::start_with(engine, inner).await;

    let mut alice = Client::connect(&server.ws_url()).await;
    alice.join("r1").await;
    let transport_id = alice.create_transport("r1", TransportDirection::Send).await;

    let mut bob = Client::connect(&server.ws_url()).await;
    bob.join("r1").await;

    // Fire the produce and list while the engine call is still in flight.
    let produce_req = alice
        .send_request(ClientMessage::Produce {
            transport_id,
            kind: MediaKind::Video,
            rtp_parameters: json!({ "codecs": [] }),
        })
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The listing serializes after the in-flight produce: it reports the
    // fully created producer, never an intermediate state.
    let listed = bob
        .request(ClientMessage::ListProducers {
            room_id: "r1".to_string(),
        })
        .await;
    let produced = alice.wait_reply(produce_req).await;
    let producer_id = match produced {
        ServerMessage::Produced { producer_id, .. } => producer_id,
        other => panic!("produce failed: {:?}", other),
    };
    match listed {
        ServerMessage::Producers { producers } => {
            assert_eq!(producers.len(), 1);
            assert_eq!(producers[0].producer_id, producer_id);
            assert_eq!(producers[0].owner_id, alice.connection_id);
        }
        other => panic!("expected producers, got {:?}", other),
    }
}

#[tokio::test]
async fn listing_an_unknown_room_is_empty() {
    let server = TestServer::start(InMemoryEngine::new()).await;

    let mut alice = Client::connect(&server.ws_url()).await;
    alice.join("r1").await;

    let reply = alice
        .request(ClientMessage::ListProducers {
            room_id: "never-created".to_string(),
        })
        .await;
    match reply {
        ServerMessage::Producers { producers } => assert!(producers.is_empty()),
        other => panic!("expected empty listing, got {:?}", other),
    }
}
