//! # tether-channels
//!
//! Transport integrations for Tether: the Socket.IO realtime channel, the
//! REST device client, and pairing-code rendering.

pub mod api;
pub mod qr;
pub mod socketio;
