//! # Moderator Test Utilities
//!
//! Shared test utilities for the moderator service.
//!
//! ## Modules
//!
//! - `mock_storage` - In-memory [`Storage`](moderator_service::storage::Storage)
//!   with builder-style fixtures and write-failure injection
//! - `fixtures` - Frame builders and a ready-made hub/engine/dispatcher stack
//!
//! ## Usage
//!
//! ```rust,ignore
//! use moderator_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let storage = MockStorage::new()
//!         .with_meeting("Weekly review", start_time(), &["alice", "bob"])
//!         .with_attendee(1, "carol");
//!
//!     let frame = finish_word(1, "alice", "present");
//!     // Run your test...
//! }
//! ```

pub mod fixtures;
pub mod mock_storage;

pub use fixtures::*;
pub use mock_storage::*;
