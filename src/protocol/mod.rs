//! Wire-level vocabulary of the Messenger push channel
//!
//! Topic names, the connect-time auth blob, and the control-channel frames
//! and publishes that manage the server-side delta queue.

pub mod auth;
pub mod control;
pub mod topics;

pub use auth::*;
pub use control::*;
pub use topics::*;
