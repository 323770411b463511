//! Membership & Discovery Module
//!
//! Implements a Gossip-based membership protocol (inspired by SWIM) and the typed view the cache
//! reads peers from.
//!
//! ## Core Mechanisms
//! - **Gossip Protocol**: Nodes periodically exchange status updates via UDP to maintain a consistent view of the cluster.
//! - **Failure Detection**: Uses a "Suspect" -> "Dead" transition model with timeouts to handle node crashes gracefully.
//! - **Incarnation Numbers**: Solves conflict resolution when node state (Alive/Suspect) is disputed.
//! - **Metadata**: Every record carries an opaque blob; the cache puts its HTTP port there (`meta`).
//! - **Directory**: `MembershipDirectory` turns live records into `MemberRecord`s with a service endpoint.
//! - **Join**: `JoinCoordinator` performs the handshake against a single seed.

pub mod directory;
pub mod join;
pub mod meta;
pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
