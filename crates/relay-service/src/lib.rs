//! Channel Relay Service Library
//!
//! An authenticated single-tenant IPTV relay. A catalog of upstream channel
//! sources is exposed to viewers; exactly one channel is live at a time,
//! transcoded by a supervised external process and fanned out to every
//! connected viewer.
//!
//! # Architecture
//!
//! ```text
//! HTTP API ──select/stop──▶ SessionCoordinator (actor)
//!                              │ stop(old) + start(new)
//!                              ▼
//!                          Supervisor ──stdout──▶ FanoutRelay ──▶ viewers
//!                              │                  (or HLS dir served at /stream)
//!                              └──exit notification──▶ SessionCoordinator
//!
//! viewer connections ──▶ PresenceRegistry ◀── presence sweeper
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Session coordinator actor and its state machine
//! - [`supervisor`] - Transcoder process lifecycle
//! - [`relay`] - Fan-out of the single upstream to viewers
//! - [`presence`] - Online identity tracking
//! - [`catalog`] - Channel catalog trait and JSON file implementation
//! - [`auth`] - Viewer authentication trait and static token implementation
//! - [`config`] - Service configuration from environment
//! - [`errors`] - HTTP error types

pub mod actors;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod presence;
pub mod relay;
pub mod routes;
pub mod supervisor;
pub mod tasks;
