//! raidcast - live broadcast signaling for guild streams
//!
//! A relay server that lets one broadcaster's stream fan out to many viewers, plus the
//! client-side orchestrator that negotiates the peer connections through it.
//!
//! - [`relay`]: connection registry, stream directory, message router, chat dedup
//! - [`webrtc`]: peer session orchestrator, candidate queue, WebRTC transport
//! - [`audio`]: broadcaster audio mixing
//! - [`client`]: WebSocket client for the relay
//! - [`web`]: HTTP and WebSocket surface of the relay server

pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod relay;
pub mod state;
pub mod storage;
pub mod web;
pub mod webrtc;

pub use error::{AppError, Result};
