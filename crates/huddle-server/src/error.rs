use huddle_protocol::{ErrorKind, ServerMessage};
use thiserror::Error;
use uuid::Uuid;

use crate::engine::EngineError;

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("participant not found: {0}")]
    ParticipantNotFound(Uuid),

    #[error("transport not found: {0}")]
    TransportNotFound(String),

    #[error("media routing unavailable for this room")]
    RouterUnavailable,

    #[error("producer cannot be consumed: {0}")]
    NotConsumable(String),

    #[error("media engine failure: {0}")]
    MediaEngine(String),

    #[error("not joined to a room")]
    NotJoined,

    #[error("already joined to room {0}")]
    AlreadyJoined(String),
}

impl SignalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SignalError::RoomNotFound(_) => ErrorKind::RoomNotFound,
            SignalError::ParticipantNotFound(_) => ErrorKind::ParticipantNotFound,
            SignalError::TransportNotFound(_) => ErrorKind::TransportNotFound,
            SignalError::RouterUnavailable => ErrorKind::RouterUnavailable,
            SignalError::NotConsumable(_) => ErrorKind::NotConsumable,
            SignalError::MediaEngine(_) => ErrorKind::MediaEngine,
            SignalError::NotJoined | SignalError::AlreadyJoined(_) => ErrorKind::BadRequest,
        }
    }

    /// Converts the error into the wire message sent to the requesting
    /// connection. Failures never terminate the connection itself.
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::Error {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<EngineError> for SignalError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Unavailable => SignalError::RouterUnavailable,
            EngineError::NotConsumable => {
                SignalError::NotConsumable("capability mismatch".to_string())
            }
            EngineError::Failure(msg) => SignalError::MediaEngine(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, SignalError>;
