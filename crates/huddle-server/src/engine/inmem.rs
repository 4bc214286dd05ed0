//! In-memory media engine
//!
//! Implements the full engine surface without forwarding any packets:
//! handles, close cascades and the paused-consumer contract behave exactly
//! as the real SFU's, which is what the orchestration layer cares about.
//! Used by the test suite and by signaling-only deployments.

use async_trait::async_trait;
use huddle_protocol::{MediaKind, TransportDescriptor};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use uuid::Uuid;

use super::{
    CloseCallback, ConsumerHandle, EngineError, MediaEngine, ProducerHandle, RoutingContext,
    TransportHandle,
};

/// Locks here are only ever held for map operations, never across awaits.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Test/inspection registry shared by everything one engine creates.
#[derive(Default)]
struct Inspect {
    contexts: AtomicUsize,
    producers: Mutex<HashMap<String, Arc<ProducerState>>>,
    consumers: Mutex<HashMap<String, Arc<ConsumerState>>>,
    transports: Mutex<HashMap<String, Arc<TransportState>>>,
}

pub struct InMemoryEngine {
    available: bool,
    inspect: Arc<Inspect>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self {
            available: true,
            inspect: Arc::new(Inspect::default()),
        }
    }

    /// An engine whose routing-context creation always fails, for exercising
    /// signaling-only degraded mode.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            inspect: Arc::new(Inspect::default()),
        }
    }

    /// Number of routing contexts created so far.
    pub fn context_count(&self) -> usize {
        self.inspect.contexts.load(Ordering::SeqCst)
    }

    pub fn producer_closed(&self, producer_id: &str) -> Option<bool> {
        lock(&self.inspect.producers)
            .get(producer_id)
            .map(|p| p.closed.load(Ordering::SeqCst))
    }

    pub fn consumer_paused(&self, consumer_id: &str) -> Option<bool> {
        lock(&self.inspect.consumers)
            .get(consumer_id)
            .map(|c| c.paused.load(Ordering::SeqCst))
    }

    pub fn consumer_closed(&self, consumer_id: &str) -> Option<bool> {
        lock(&self.inspect.consumers)
            .get(consumer_id)
            .map(|c| c.closed.load(Ordering::SeqCst))
    }

    pub fn transport_connected(&self, transport_id: &str) -> Option<bool> {
        lock(&self.inspect.transports)
            .get(transport_id)
            .map(|t| lock(&t.connected).is_some())
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaEngine for InMemoryEngine {
    async fn create_routing_context(&self) -> Result<Arc<dyn RoutingContext>, EngineError> {
        if !self.available {
            return Err(EngineError::Unavailable);
        }
        self.inspect.contexts.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemoryContext {
            state: Arc::new(ContextState {
                producers: Mutex::new(HashMap::new()),
                inspect: self.inspect.clone(),
            }),
            transports: Mutex::new(Vec::new()),
        }))
    }
}

/// Live-producer registry scoped to one routing context (one room).
struct ContextState {
    producers: Mutex<HashMap<String, Arc<ProducerState>>>,
    inspect: Arc<Inspect>,
}

struct InMemoryContext {
    state: Arc<ContextState>,
    transports: Mutex<Vec<Arc<TransportState>>>,
}

#[async_trait]
impl RoutingContext for InMemoryContext {
    fn rtp_capabilities(&self) -> serde_json::Value {
        json!({
            "codecs": [
                { "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
                { "mimeType": "video/VP8", "clockRate": 90000 },
            ],
            "headerExtensions": [],
        })
    }

    fn can_consume(&self, producer_id: &str, rtp_capabilities: &serde_json::Value) -> bool {
        if rtp_capabilities.get("codecs").is_none() {
            return false;
        }
        lock(&self.state.producers)
            .get(producer_id)
            .map(|p| !p.closed.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    async fn create_transport(&self) -> Result<Arc<dyn TransportHandle>, EngineError> {
        let state = Arc::new(TransportState {
            id: Uuid::new_v4().to_string(),
            closed: AtomicBool::new(false),
            connected: Mutex::new(None),
            producers: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
            ctx: self.state.clone(),
        });
        lock(&self.state.inspect.transports).insert(state.id.clone(), state.clone());
        lock(&self.transports).push(state.clone());
        Ok(Arc::new(InMemoryTransport { state }))
    }

    async fn close(&self) {
        let transports: Vec<_> = lock(&self.transports).drain(..).collect();
        for transport in transports {
            transport.close();
        }
    }
}

struct TransportState {
    id: String,
    closed: AtomicBool,
    connected: Mutex<Option<serde_json::Value>>,
    producers: Mutex<Vec<Arc<ProducerState>>>,
    consumers: Mutex<Vec<Arc<ConsumerState>>>,
    ctx: Arc<ContextState>,
}

impl TransportState {
    /// Close cascade: every producer and consumer created on this transport
    /// closes with it.
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let producers: Vec<_> = lock(&self.producers).drain(..).collect();
        for producer in producers {
            producer.close();
        }
        let consumers: Vec<_> = lock(&self.consumers).drain(..).collect();
        for consumer in consumers {
            consumer.close();
        }
    }
}

struct InMemoryTransport {
    state: Arc<TransportState>,
}

#[async_trait]
impl TransportHandle for InMemoryTransport {
    fn id(&self) -> String {
        self.state.id.clone()
    }

    fn descriptor(&self) -> TransportDescriptor {
        TransportDescriptor {
            id: self.state.id.clone(),
            ice_parameters: json!({ "usernameFragment": self.state.id, "password": "inmem" }),
            ice_candidates: json!([]),
            dtls_parameters: json!({ "role": "auto", "fingerprints": [] }),
        }
    }

    async fn connect(&self, dtls_parameters: serde_json::Value) -> Result<(), EngineError> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Failure("transport closed".to_string()));
        }
        *lock(&self.state.connected) = Some(dtls_parameters);
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
    ) -> Result<Arc<dyn ProducerHandle>, EngineError> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Failure("transport closed".to_string()));
        }
        let _ = rtp_parameters;
        let producer = Arc::new(ProducerState {
            id: Uuid::new_v4().to_string(),
            kind,
            closed: AtomicBool::new(false),
            close_callbacks: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
            ctx: Arc::downgrade(&self.state.ctx),
        });
        lock(&self.state.ctx.producers).insert(producer.id.clone(), producer.clone());
        lock(&self.state.ctx.inspect.producers).insert(producer.id.clone(), producer.clone());
        lock(&self.state.producers).push(producer.clone());
        Ok(Arc::new(InMemoryProducer { state: producer }))
    }

    async fn consume(
        &self,
        producer_id: &str,
        rtp_capabilities: &serde_json::Value,
    ) -> Result<Arc<dyn ConsumerHandle>, EngineError> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Failure("transport closed".to_string()));
        }
        if rtp_capabilities.get("codecs").is_none() {
            return Err(EngineError::NotConsumable);
        }
        let producer = lock(&self.state.ctx.producers)
            .get(producer_id)
            .cloned()
            .filter(|p| !p.closed.load(Ordering::SeqCst))
            .ok_or(EngineError::NotConsumable)?;

        // Consumers start paused; the client resumes explicitly.
        let consumer = Arc::new(ConsumerState {
            id: Uuid::new_v4().to_string(),
            producer_id: producer.id.clone(),
            kind: producer.kind,
            rtp_parameters: json!({ "codecs": [], "encodings": [] }),
            paused: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            producer_close_callbacks: Mutex::new(Vec::new()),
        });
        lock(&producer.consumers).push(consumer.clone());
        lock(&self.state.consumers).push(consumer.clone());
        lock(&self.state.ctx.inspect.consumers).insert(consumer.id.clone(), consumer.clone());
        Ok(Arc::new(InMemoryConsumer { state: consumer }))
    }

    async fn close(&self) {
        self.state.close();
    }
}

struct ProducerState {
    id: String,
    kind: MediaKind,
    closed: AtomicBool,
    close_callbacks: Mutex<Vec<CloseCallback>>,
    consumers: Mutex<Vec<Arc<ConsumerState>>>,
    ctx: Weak<ContextState>,
}

impl ProducerState {
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(ctx) = self.ctx.upgrade() {
            lock(&ctx.producers).remove(&self.id);
        }
        let callbacks: Vec<_> = lock(&self.close_callbacks).drain(..).collect();
        for callback in callbacks {
            callback();
        }
        let consumers: Vec<_> = lock(&self.consumers).drain(..).collect();
        for consumer in consumers {
            consumer.close_from_producer();
        }
    }
}

struct InMemoryProducer {
    state: Arc<ProducerState>,
}

impl ProducerHandle for InMemoryProducer {
    fn id(&self) -> String {
        self.state.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.state.kind
    }

    fn close(&self) {
        self.state.close();
    }

    fn on_close(&self, callback: CloseCallback) {
        if self.state.closed.load(Ordering::SeqCst) {
            return;
        }
        lock(&self.state.close_callbacks).push(callback);
    }
}

struct ConsumerState {
    id: String,
    producer_id: String,
    kind: MediaKind,
    rtp_parameters: serde_json::Value,
    paused: AtomicBool,
    closed: AtomicBool,
    producer_close_callbacks: Mutex<Vec<CloseCallback>>,
}

impl ConsumerState {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn close_from_producer(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let callbacks: Vec<_> = lock(&self.producer_close_callbacks).drain(..).collect();
        for callback in callbacks {
            callback();
        }
    }
}

struct InMemoryConsumer {
    state: Arc<ConsumerState>,
}

#[async_trait]
impl ConsumerHandle for InMemoryConsumer {
    fn id(&self) -> String {
        self.state.id.clone()
    }

    fn producer_id(&self) -> String {
        self.state.producer_id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.state.kind
    }

    fn rtp_parameters(&self) -> serde_json::Value {
        self.state.rtp_parameters.clone()
    }

    async fn resume(&self) -> Result<(), EngineError> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Failure("consumer closed".to_string()));
        }
        self.state.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.state.close();
    }

    fn on_producer_close(&self, callback: CloseCallback) {
        if self.state.closed.load(Ordering::SeqCst) {
            return;
        }
        lock(&self.state.producer_close_callbacks).push(callback);
    }
}
