use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of media carried by a producer or consumer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
    Screen,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::Screen => write!(f, "screen"),
        }
    }
}

/// Direction of a transport relative to the client.
///
/// A `Send` transport carries the client's outgoing media, a `Recv` transport
/// carries media forwarded from other participants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Send,
    Recv,
}

/// Parameters the client needs to establish a transport.
///
/// The ICE/DTLS payloads are produced by the media engine and handed to the
/// client verbatim; the signaling layer never inspects them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportDescriptor {
    pub id: String,
    pub ice_parameters: serde_json::Value,
    pub ice_candidates: serde_json::Value,
    pub dtls_parameters: serde_json::Value,
}

/// Parameters the client needs to start receiving a forwarded stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerDescriptor {
    pub consumer_id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: serde_json::Value,
}

/// One entry in a producer listing: a remote stream available for consumption.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProducerInfo {
    pub producer_id: String,
    pub owner_id: Uuid,
}

/// Typed failure categories surfaced to clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RoomNotFound,
    ParticipantNotFound,
    TransportNotFound,
    RouterUnavailable,
    NotConsumable,
    MediaEngine,
    BadRequest,
}
