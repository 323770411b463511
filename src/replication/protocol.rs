//! Cache Service Protocol
//!
//! Routes, headers and Data Transfer Objects (DTOs) of the HTTP interface. Clients and peers
//! talk to the same routes; a forwarded copy is told apart only by the sync header.

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Prefix of every cache route.
pub const ENDPOINT_CACHE: &str = "/cache";
/// Per-key route accepting PUT, GET and DELETE.
pub const ROUTE_KEY: &str = "/cache/:key";
/// Current membership snapshot as JSON.
pub const ROUTE_MEMBERS: &str = "/cache/members";

/// Header marking a request as a forwarded copy. Its absence means "origin, broadcast it".
pub const SYNC_HEADER: &str = "x-is-sync";

// --- Data Transfer Objects ---

/// Body of a PUT request.
///
/// `duration` is the TTL in nanoseconds as a decimal string, e.g. `"5000000000"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutBody {
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub duration: String,
}

/// Body returned with every 4xx/5xx produced by the handlers.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
