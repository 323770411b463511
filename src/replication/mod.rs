//! Replication Module
//!
//! Keeps the expiring stores of all nodes converging by full-mesh, single-hop broadcast.
//!
//! ## Protocol
//! 1. A request without the sync header is an **origin** operation: it is applied to the local
//!    store first, so the caller can read its own write even if replication is slow or fails.
//! 2. The origin node snapshots the live peers from the membership directory and sends each one a
//!    copy marked as forwarded, all in parallel, each with its own timeout.
//! 3. A node receiving a forwarded copy applies it and stops. It never forwards again, so the
//!    broadcast graph is one hop deep and cannot loop or amplify.
//!
//! ## Consistency
//! Per key and per node, the last applied write wins. There is no cross-node ordering, no quorum
//! and no repair: concurrent writes at different origins may leave nodes holding different values,
//! and a peer that misses a write keeps the old value until a later write reaches it.
//!
//! ## Submodules
//! - **`envelope`**: `Operation` / `OperationEnvelope` and the forwarded copy sent to peers.
//! - **`broadcaster`**: Local apply plus concurrent fan-out.
//! - **`protocol`**: Routes, headers and request bodies.
//! - **`handlers`**: axum handlers for `/cache/{key}` and `/cache/members`.

pub mod broadcaster;
pub mod envelope;
pub mod handlers;
pub mod protocol;
