//! `PairChat` client library.
//!
//! Talks to a `PairChat` server over a single WebSocket connection: the
//! request/response API in [`api`], the conversation state machine and
//! session driver in [`conversation`], and local preferences in [`prefs`].

pub mod api;
pub mod conversation;
pub mod prefs;
