//! The realtime gateway core: connection auth, presence, room fanout, and
//! the single-call coordinator.

pub mod call;
pub mod events;
pub mod fanout;
pub mod registry;
pub mod server;
pub mod session;
