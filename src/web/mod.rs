// src/web/mod.rs
//! Web dashboard backend: websocket push, control commands and history reads

pub mod events;
pub mod gateway;
pub mod server;

pub use events::{ClientEvent, PushEvent};
pub use gateway::{ClientId, PushGateway};
pub use server::{bind, router, serve, AppState};
