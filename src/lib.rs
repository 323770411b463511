//! Distributed Cache Cluster Library
//!
//! This library crate defines the modules that make up one cache node.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! - **`cache`**: The node-local key/value store with per-entry expiry and lazy eviction.
//! - **`membership`**: The cluster coordination layer. Uses a UDP-based Gossip protocol
//!   (SWIM-like) for discovery, failure detection and the join handshake, and publishes each
//!   node's HTTP port as metadata.
//! - **`replication`**: The HTTP cache API. Every operation received from a client is applied
//!   locally and forwarded exactly once to every other live member.
//! - **`node`**: Binds the sockets and wires the subsystems into a serving node.
//! - **`config`**: Command line and environment configuration.
//! - **`error`**: The shared error type and its HTTP mapping.

pub mod cache;
pub mod config;
pub mod error;
pub mod membership;
pub mod node;
pub mod replication;
