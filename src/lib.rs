// src/lib.rs
// Atelier - streaming chat relay with image generation

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod client;
pub mod config;
pub mod core;
pub mod credentials;
pub mod message;
pub mod provider;
pub mod server;
pub mod tools;
