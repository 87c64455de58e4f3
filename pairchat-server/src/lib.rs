//! `PairChat` server library.
//!
//! Exposes the direct-message server for use in tests and embedding:
//! the durable [`store::MessageStore`], the volatile
//! [`presence::PresenceRegistry`], unseen-count derivation, best-effort
//! push delivery, and the WebSocket session handler.

pub mod config;
pub mod delivery;
pub mod presence;
pub mod roster;
pub mod server;
pub mod store;
pub mod unseen;
