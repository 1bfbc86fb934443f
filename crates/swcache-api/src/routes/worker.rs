//! Worker endpoints
//!
//! Page contexts subscribe to `/_sw/events` and post control messages to
//! `/_sw/message`. Every other request is offered to the worker.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use bytes::Bytes;
use futures::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use swcache_core::strategy::to_cached;
use swcache_core::{Broadcaster, ClientId, ControlMessage, FetchOutcome, ResponseSource};
use swcache_proxy::FetchRequest;
use swcache_storage::CachedResponse;
use tokio::sync::oneshot;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;
use url::Url;

use crate::error::ApiError;
use crate::state::AppState;

/// Where an intercepted response came from
const SOURCE_HEADER: &str = "x-swcache-source";

/// Headers recomputed by the server rather than replayed
const SKIPPED_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "transfer-encoding",
    "keep-alive",
];

/// Disconnects a page context when its event stream is dropped
struct PageGuard {
    broadcaster: Arc<Broadcaster>,
    id: ClientId,
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.broadcaster.disconnect(self.id);
    }
}

/// GET /_sw/events - server-sent broadcast messages
async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let broadcaster = state.worker.broadcaster().clone();
    let (id, receiver) = broadcaster.connect();
    let guard = PageGuard { broadcaster, id };

    let stream = UnboundedReceiverStream::new(receiver).map(move |message| {
        let _ = &guard;
        let event = Event::default()
            .event(message.event_type.as_str())
            .json_data(&message)
            .unwrap_or_else(|_| Event::default().comment("unencodable message"));
        Ok(event)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// POST /_sw/message - control messages
async fn post_message(State(state): State<AppState>, body: String) -> Result<Response, ApiError> {
    let message = ControlMessage::parse(&body)?;

    if message == ControlMessage::GetCacheInfo {
        let (tx, rx) = oneshot::channel();
        state.worker.message(message, Some(tx)).await?;
        let reply = rx
            .await
            .map_err(|_| ApiError::Internal("cache info reply dropped".to_string()))?;
        return Ok(Json(reply).into_response());
    }

    let kind = message.kind();
    state.worker.message(message, None).await?;
    let body = Json(json!({ "accepted": kind }));
    Ok((StatusCode::ACCEPTED, body).into_response())
}

/// Fallback handler: offer the request to the worker, or pass it through
pub async fn intercept(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let url = request_url(&state.worker.config().origin, &uri)?;
    let request = FetchRequest {
        method,
        url,
        headers,
        body,
        reload: false,
    };

    match state.worker.fetch(&request).await {
        FetchOutcome::Passthrough => {
            debug!("Passthrough {} {}", request.method, request.url);
            let response = state.network.send(&request).await?;
            Ok(into_response(to_cached(response), None))
        }
        FetchOutcome::Responded(result) => {
            let served = result?;
            Ok(into_response(served.response, Some(served.source)))
        }
    }
}

/// Absolute-form targets are used as-is, origin-form ones join the origin
fn request_url(origin: &Url, uri: &Uri) -> Result<Url, ApiError> {
    let parsed = if uri.scheme().is_some() {
        Url::parse(&uri.to_string())
    } else {
        let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        origin.join(path)
    };
    parsed
        .map_err(|e| ApiError::BadRequest(format!("invalid request target {}: {}", uri, e)))
}

fn into_response(cached: CachedResponse, source: Option<ResponseSource>) -> Response {
    let status = StatusCode::from_u16(cached.status)
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, cached.body).into_response();

    let headers = response.headers_mut();
    headers.remove(header::CONTENT_TYPE);
    for (name, value) in &cached.headers {
        if SKIPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }
    if let Some(source) = source {
        headers.insert(SOURCE_HEADER, HeaderValue::from_static(source.as_str()));
    }

    response
}

/// Create worker routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/_sw/events", get(events))
        .route("/_sw/message", post(post_message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url_forms() {
        let origin = Url::parse("https://watch.example.com/").unwrap();

        let relative: Uri = "/api/shows?page=2".parse().unwrap();
        assert_eq!(
            request_url(&origin, &relative).unwrap().as_str(),
            "https://watch.example.com/api/shows?page=2"
        );

        let absolute: Uri = "https://fonts.gstatic.com/s/inter.woff2".parse().unwrap();
        assert_eq!(
            request_url(&origin, &absolute).unwrap().as_str(),
            "https://fonts.gstatic.com/s/inter.woff2"
        );
    }

    #[test]
    fn test_replayed_headers() {
        let cached = CachedResponse::new(
            200,
            vec![
                ("Content-Type".to_string(), "image/png".to_string()),
                ("content-length".to_string(), "999".to_string()),
            ],
            Bytes::from_static(b"png"),
        );
        let response = into_response(cached, Some(ResponseSource::Cache));

        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(response.headers().get_all(header::CONTENT_TYPE).iter().count(), 1);
        assert_eq!(response.headers()[SOURCE_HEADER], "cache");
        assert_ne!(
            response.headers().get(header::CONTENT_LENGTH).map(|v| v.as_bytes()),
            Some(&b"999"[..])
        );
    }
}
