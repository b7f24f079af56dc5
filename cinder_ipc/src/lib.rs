//! Control-plane IPC for CinderVPN.
//!
//! This crate defines the command/response payloads exchanged with the
//! tunnel worker and the transport that carries them across the process
//! boundary. Commands are flat string-to-string maps serialized as JSON;
//! replies are plain UTF-8 strings.

pub mod messages;
pub mod transport;
