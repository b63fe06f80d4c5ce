//! WebSocket transport for the chat engine: Identify handshake, commands in,
//! snapshot and event frames out.

pub mod commands;
pub mod connection;
pub mod identity;
