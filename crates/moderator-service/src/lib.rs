//! Moderator Service Library
//!
//! Coordinates a live, multi-participant presentation session:
//!
//! - Realtime WebSocket fan-out of every session event to all connections
//! - Written questions, votes, raised hands and slide reactions
//! - An automated moderator that rotates presenters and picks who speaks next
//! - A one-shot start announcement per meeting
//!
//! # Architecture
//!
//! ```text
//! Connection (inbound pump) ──frame──▶ Dispatcher ──▶ ModeratorEngine ⇄ Storage
//!                                         │
//!                                   outbound envelope
//!                                         ▼
//!                                   HubActor (single mailbox, owns registry)
//!                                         │ try_send
//!                                         ▼
//!                           Connection (outbound pump) × N
//! ```
//!
//! The hub is the only place the live-connection registry is read or
//! mutated. Moderator state is kept per meeting behind its own lock, so two
//! `finishword` frames for one meeting are processed one after the other.
//!
//! # Modules
//!
//! - [`hub`] - Broadcast hub actor
//! - [`connection`] - Per-connection inbound/outbound pumps
//! - [`protocol`] - Realtime envelope schema
//! - [`dispatcher`] - Inbound frame routing
//! - [`moderator`] - Questioner/presenter selection engine
//! - [`scheduler`] - Start-announcement timers
//! - [`storage`] - Storage collaborator trait and PostgreSQL implementation
//! - [`routes`] / [`handlers`] - axum router and REST handlers
//! - [`observability`] - Probes and Prometheus metrics
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod errors;
pub mod handlers;
pub mod hub;
pub mod moderator;
pub mod observability;
pub mod protocol;
pub mod routes;
pub mod scheduler;
pub mod storage;
