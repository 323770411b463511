//! Node metadata carried inside gossip records.
//!
//! Each node advertises the HTTP port of its cache service through the opaque `meta` blob of its
//! membership record. The blob is JSON, e.g. `{"http_port":8001}`.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};

/// Maximum size of the metadata blob a node may attach to its record.
pub const META_MAX_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub http_port: u16,
}

impl NodeMetadata {
    pub fn new(http_port: u16) -> Self {
        Self { http_port }
    }

    /// Encodes the metadata, truncated to `limit` bytes if it does not fit.
    ///
    /// A truncated blob no longer decodes, so peers exclude the node instead of guessing.
    pub fn encode(&self, limit: usize) -> Vec<u8> {
        // Serializing a struct of plain integers cannot fail
        let mut bytes = serde_json::to_vec(self).unwrap_or_default();

        if bytes.len() > limit {
            tracing::warn!(
                "Node metadata is {} bytes, truncating to {}",
                bytes.len(),
                limit
            );
            bytes.truncate(limit);
        }

        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| CacheError::Decode(format!("invalid node metadata: {}", e)))
    }
}
