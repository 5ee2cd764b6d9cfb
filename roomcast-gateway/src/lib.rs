//! Client gateway: per-socket `Client`s, the process-wide `ClientManager`,
//! the JSON wire protocol, and the axum WebSocket surface.

pub mod client;
pub mod manager;
pub mod names;
pub mod session;
pub mod websocket;
pub mod wire;

pub use client::{Client, Frame};
pub use manager::ClientManager;
pub use session::{GuestSessions, SessionResolver};
pub use websocket::{router, GatewayState};
pub use wire::{ClientFrame, CloseCode};
