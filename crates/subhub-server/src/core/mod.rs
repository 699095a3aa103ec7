//! The transport-independent heart of the hub: the subscription index,
//! the Redis-backed pub/sub bus, session lifecycle, presence
//! bookkeeping, and the per-connection socket controller that ties
//! them together.

pub mod bus;
pub mod index;
pub mod message;
pub mod presence;
pub mod session;
pub mod socket;
