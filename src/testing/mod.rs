//! Testing utilities
//!
//! An in-memory transport so the listener can be exercised end to end
//! without a network connection.

pub mod fake;

pub use fake::{FakeTransport, PublishedMessage};
