use axum::{
    Json,
    body::Bytes,
    extract::{Extension, Path},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::broadcaster::{ApplyOutcome, Broadcaster};
use super::envelope::{Operation, OperationEnvelope};
use super::protocol::SYNC_HEADER;
use crate::error::CacheError;
use crate::membership::directory::{MemberRecord, MembershipDirectory};

fn is_sync(headers: &HeaderMap) -> bool {
    headers
        .get(SYNC_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
}

pub async fn handle_put(
    Extension(broadcaster): Extension<Arc<Broadcaster>>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());

    let op = match Operation::put_from_body(key, content_type, &body) {
        Ok(op) => op,
        Err(e) => {
            tracing::warn!("Rejected PUT: {}", e);
            return e.into_response();
        }
    };

    let envelope = OperationEnvelope::received(op, is_sync(&headers));
    broadcaster.handle(envelope).await;

    StatusCode::OK.into_response()
}

pub async fn handle_get(
    Extension(broadcaster): Extension<Arc<Broadcaster>>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Response {
    let op = Operation::Get { key: key.clone() };
    let envelope = OperationEnvelope::received(op, is_sync(&headers));

    match broadcaster.handle(envelope).await {
        ApplyOutcome::Found(value) => (StatusCode::OK, value).into_response(),
        _ => CacheError::NotFound(key).into_response(),
    }
}

pub async fn handle_delete(
    Extension(broadcaster): Extension<Arc<Broadcaster>>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Response {
    let op = Operation::Delete { key: key.clone() };
    let envelope = OperationEnvelope::received(op, is_sync(&headers));
    broadcaster.handle(envelope).await;

    tracing::debug!("Deleted {}", key);
    StatusCode::OK.into_response()
}

pub async fn handle_unsupported(method: Method) -> Response {
    CacheError::MethodNotAllowed(method.to_string()).into_response()
}

pub async fn handle_get_members(
    Extension(directory): Extension<MembershipDirectory>,
) -> Json<Vec<MemberRecord>> {
    Json(directory.snapshot())
}
