pub mod connections;
pub mod handler;
