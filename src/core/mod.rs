//! Core primitives shared by the relay and the client.

pub mod streaming;

pub use streaming::{SseDecoder, SseFrame};
