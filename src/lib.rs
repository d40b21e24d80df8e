//! Cardroom Realtime - connection hub and event fan-out for the card-game platform
//!
//! This crate keeps one WebSocket per player, groups connections into rooms,
//! delivers room, lobby and game events to the right audience, and relays
//! them between instances over a message bus. Named locks serialize work on
//! shared game state.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
