//! Common utilities shared across moderator components.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for the wall-clock timestamp layout used by clients
pub mod timestamp;
