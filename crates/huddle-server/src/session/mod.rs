//! Session state: registry of rooms, rooms, and per-connection participants.
//!
//! Ownership is tree-shaped: the registry owns rooms, a room owns its
//! participants, a participant owns its transport/producer/consumer handles.
//! All state is in-memory and lives for the process lifetime at most.

mod participant;
mod registry;
mod room;

pub use participant::Participant;
pub use registry::SessionRegistry;
pub use room::Room;
