use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{
    ConsumerDescriptor, ErrorKind, MediaKind, ProducerInfo, TransportDescriptor,
    TransportDirection,
};

/// Messages sent from client to server via WebSocket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room, creating it if it does not exist
    Join { room_id: String },

    /// Create a send or receive transport in the joined room
    CreateTransport {
        room_id: String,
        direction: TransportDirection,
    },

    /// Provide DTLS parameters for a previously created transport
    ConnectTransport {
        transport_id: String,
        dtls_parameters: serde_json::Value,
    },

    /// Publish a media stream on a send transport
    Produce {
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
    },

    /// Start receiving a remote participant's producer
    Consume {
        remote_producer_id: String,
        rtp_capabilities: serde_json::Value,
    },

    /// Resume a consumer that was created paused
    ResumeConsumer { consumer_id: String },

    /// List producers of all other participants in the room
    ListProducers { room_id: String },

    /// Leave the room
    Leave,
}

/// Messages sent from server to client via WebSocket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once when the connection is accepted
    Welcome { connection_id: Uuid },

    /// Room joined; capabilities are absent when the room is signaling-only
    Joined {
        router_rtp_capabilities: Option<serde_json::Value>,
    },

    /// Transport created
    TransportCreated { transport: TransportDescriptor },

    /// Transport DTLS connect acknowledged
    TransportConnected { transport_id: String },

    /// Producer created; `producers_exist` hints that other participants
    /// already publish media worth listing
    Produced {
        producer_id: String,
        producers_exist: bool,
    },

    /// Consumer created (paused until explicitly resumed)
    Consumed { consumer: ConsumerDescriptor },

    /// Consumer resumed
    ConsumerResumed { consumer_id: String },

    /// Producer listing for the room
    Producers { producers: Vec<ProducerInfo> },

    /// Leave acknowledged
    Left,

    /// Another participant joined the room
    PeerJoined { participant_id: Uuid },

    /// Another participant left the room
    PeerLeft { participant_id: Uuid },

    /// A remote participant started producing media
    NewProducer {
        producer_id: String,
        owner_id: Uuid,
        kind: MediaKind,
    },

    /// A producer this client consumes was closed out-of-band
    ProducerClosed { producer_id: String },

    /// Typed request failure
    Error { kind: ErrorKind, message: String },
}

/// Client request with optional correlation id.
///
/// `request_id` is opaque to the server and echoed back on the direct
/// response so the client can match responses to in-flight requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(flatten)]
    pub message: ClientMessage,
}

/// Server message with the correlation id of the request it answers.
///
/// Server-initiated broadcasts carry no `request_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(flatten)]
    pub message: ServerMessage,
}

impl ServerEnvelope {
    pub fn broadcast(message: ServerMessage) -> Self {
        Self {
            request_id: None,
            message,
        }
    }

    pub fn reply(request_id: Option<u64>, message: ServerMessage) -> Self {
        Self {
            request_id,
            message,
        }
    }
}
