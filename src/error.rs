//! Error types shared by the cache node.
//!
//! Errors raised while serving the origin request are turned into HTTP status codes by the
//! handlers. Errors raised while forwarding to peers are logged per peer and never reach the
//! original caller.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::replication::protocol::ErrorResponse;

/// Errors produced by the cache node.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// Invalid or conflicting startup configuration (e.g. a port already in use).
    #[error("configuration error: {0}")]
    Config(String),

    /// The seed could not be reached or rejected the handshake.
    #[error("join error: {0}")]
    Join(String),

    /// Malformed peer metadata, request body or envelope.
    #[error("decode error: {0}")]
    Decode(String),

    /// A peer could not be reached or answered with a non-success status.
    #[error("forward to {peer} failed: {reason}")]
    Forward { peer: String, reason: String },

    #[error("key '{0}' not found")]
    NotFound(String),

    #[error("method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

impl CacheError {
    /// Status code used when this error is surfaced to an HTTP caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            CacheError::Decode(_) => StatusCode::BAD_REQUEST,
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            CacheError::Forward { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
