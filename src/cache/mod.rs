//! Expiring Store Module
//!
//! The per-node key/value map where every entry carries its own time-to-live.
//!
//! ## Core Concepts
//! - **Lazy Expiry**: An entry whose deadline has passed is treated as absent by every reader,
//!   whether or not it has been physically removed yet. Reads evict such entries on the way out.
//! - **Last-Applied-Wins**: A `put` unconditionally replaces the value and resets the deadline.
//! - **Optional Sweeper**: A background task can purge expired entries periodically; it only
//!   reclaims memory and never changes what readers observe.

pub mod store;
