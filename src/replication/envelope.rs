use crate::error::{CacheError, Result};
use reqwest::Method;
use std::net::SocketAddr;
use std::time::Duration;

use super::protocol::{ENDPOINT_CACHE, PutBody, SYNC_HEADER};

/// One cache operation for a single key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Put {
        key: String,
        value: String,
        ttl: Duration,
    },
    Get {
        key: String,
    },
    Delete {
        key: String,
    },
}

impl Operation {
    pub fn key(&self) -> &str {
        match self {
            Operation::Put { key, .. } | Operation::Get { key } | Operation::Delete { key } => key,
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Operation::Put { .. } => Method::PUT,
            Operation::Get { .. } => Method::GET,
            Operation::Delete { .. } => Method::DELETE,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Operation::Get { .. })
    }

    /// Builds a `Put` from a raw request body.
    ///
    /// The body must be JSON with non-empty `value` and `duration` fields. A zero or negative
    /// duration yields an already expired write.
    pub fn put_from_body(key: String, content_type: Option<&str>, body: &[u8]) -> Result<Self> {
        if !is_json(content_type) {
            return Err(CacheError::Decode(
                "Content-Type must be application/json".to_string(),
            ));
        }

        let body: PutBody = serde_json::from_slice(body)
            .map_err(|e| CacheError::Decode(format!("Invalid JSON format: {}", e)))?;

        if body.value.is_empty() || body.duration.is_empty() {
            return Err(CacheError::Decode("Missing required fields".to_string()));
        }

        let nanos: i64 = body.duration.trim().parse().map_err(|_| {
            CacheError::Decode(format!("duration '{}' is not an integer", body.duration))
        })?;

        Ok(Operation::Put {
            key,
            value: body.value,
            ttl: Duration::from_nanos(nanos.max(0) as u64),
        })
    }
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

/// An operation together with how far it has travelled.
///
/// `forwarded` is false at the node that first received the request and true on every copy sent
/// to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationEnvelope {
    pub op: Operation,
    pub forwarded: bool,
}

impl OperationEnvelope {
    pub fn origin(op: Operation) -> Self {
        Self {
            op,
            forwarded: false,
        }
    }

    pub fn received(op: Operation, forwarded: bool) -> Self {
        Self { op, forwarded }
    }

    /// The copy to send to peers, or `None` if this envelope already travelled one hop.
    pub fn forwarded_copy(&self) -> Option<ForwardedCopy> {
        if self.forwarded {
            return None;
        }

        Some(ForwardedCopy(OperationEnvelope {
            op: self.op.clone(),
            forwarded: true,
        }))
    }
}

/// A copy of an origin envelope marked as forwarded.
///
/// Only [`OperationEnvelope::forwarded_copy`] creates one, so a node can fan out only what it
/// received as origin.
#[derive(Debug, Clone)]
pub struct ForwardedCopy(OperationEnvelope);

impl ForwardedCopy {
    pub fn op(&self) -> &Operation {
        &self.0.op
    }

    pub fn envelope(&self) -> &OperationEnvelope {
        &self.0
    }

    /// URL of the per-key route on the peer serving at `endpoint`, with the key percent-encoded.
    pub fn url(&self, endpoint: SocketAddr) -> Result<reqwest::Url> {
        let invalid = |reason: String| CacheError::Forward {
            peer: endpoint.to_string(),
            reason,
        };

        let mut url = reqwest::Url::parse(&format!("http://{}{}", endpoint, ENDPOINT_CACHE))
            .map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("endpoint cannot carry a path".to_string()))?
            .push(self.op().key());

        Ok(url)
    }

    /// Builds the HTTP request delivering this copy to the peer serving at `endpoint`.
    pub fn request(
        &self,
        client: &reqwest::Client,
        endpoint: SocketAddr,
        timeout: Duration,
    ) -> Result<reqwest::RequestBuilder> {
        let op = self.op();

        let request = client
            .request(op.method(), self.url(endpoint)?)
            .header(SYNC_HEADER, "true")
            .timeout(timeout);

        Ok(match op {
            Operation::Put { value, ttl, .. } => request.json(&PutBody {
                value: value.clone(),
                duration: ttl.as_nanos().to_string(),
            }),
            Operation::Get { .. } | Operation::Delete { .. } => request,
        })
    }
}
