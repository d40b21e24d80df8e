//! WebSocket adapters: connection registry, fan-out and the cross-instance bridge.
//!
//! # Architecture
//!
//! ```text
//!   /ws upgrade ──▶ handler ──register──▶ ┌──────────────────────────────┐
//!                     │                   │             Hub              │
//!                     │ client frames     │  user → client               │
//!                     ▼                   │  room → {clients}            │
//!               ┌─────────────┐  resolve  │  worker pool drains          │
//!               │ Broadcaster │──────────▶│  register/unregister queues  │
//!               └─────────────┘           └──────────────────────────────┘
//!                  │       ▲
//!      allow-listed│       │ publish_local_only
//!                  ▼       │
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           Message Bus                                │
//! │   InMemoryMessageBus (test) │ RedisMessageBus (production)          │
//! └─────────────────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//!                 CrossInstanceBridge (drops own messages, routes the rest)
//! ```
//!
//! # Components
//!
//! - [`client`] - one connection's bounded send queue
//! - [`hub`] - connection registry and room membership
//! - [`broadcaster`] - audience resolution and fan-out
//! - [`bridge`] - bus → local delivery
//! - [`messages`] - client frame protocol
//! - [`handler`] - Axum WebSocket upgrade handler

pub mod bridge;
pub mod broadcaster;
pub mod client;
pub mod handler;
pub mod hub;
pub mod messages;

pub use bridge::{BridgeOutcome, CrossInstanceBridge, GLOBAL_BRIDGE_EVENT_TYPES};
pub use broadcaster::{Broadcaster, BroadcasterConfig, DeliveryReport, BUS_FORWARDED_EVENT_TYPES};
pub use client::{Client, Frame, SendError};
pub use handler::{handle_client_frame, ws_handler, WebSocketState};
pub use hub::{Hub, HubConfig};
pub use messages::ClientMessage;
