//! Boardsync — client-side real-time optimistic synchronization.
//!
//! Keeps a local task cache consistent with an authoritative board
//! server: local edits apply immediately and are reconciled or rolled
//! back on confirmation, while push events from other sessions merge in
//! over an auto-reconnecting WebSocket channel.

pub mod api;
pub mod channel;
pub mod config;
pub mod session;
pub mod store;
