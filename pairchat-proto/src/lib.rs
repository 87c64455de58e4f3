//! Shared protocol definitions for the `PairChat` wire format.

pub mod codec;
pub mod message;
pub mod wire;
