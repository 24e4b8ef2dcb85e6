//! Tag-emitting middleware for axum hosts.
//!
//! Wraps cacheable GET handlers in a tag collection scope, then stamps the
//! response with the accumulated tag header and the informational cache
//! status header. Non-GET requests bypass collection entirely.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Method, Request},
    middleware::Next,
    response::Response,
};
use tracing::{instrument, warn};

use crate::collection;
use crate::headers::CacheStatus;
use crate::orchestrator::Invalidator;

/// Shared invalidation state for the middleware.
#[derive(Clone)]
pub struct PurgeState {
    pub invalidator: Arc<Invalidator>,
}

impl PurgeState {
    pub fn new(invalidator: Arc<Invalidator>) -> Self {
        Self { invalidator }
    }
}

/// Collect the tags declared while a GET handler renders and emit them as
/// response headers.
///
/// Handlers and nested render code declare dependencies through
/// [`collection::record`]; no explicit plumbing is needed. The URL recorded
/// into the local index is the request path plus query, matching what a
/// URL-purge backend would be asked to invalidate.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn tag_collection_layer(
    State(state): State<PurgeState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        let mut response = next.run(request).await;
        apply_header(
            &mut response,
            state.invalidator.policy().status_header(CacheStatus::Bypass),
        );
        return response;
    }

    let url = match request.uri().query() {
        Some(query) => format!("{}?{}", request.uri().path(), query),
        None => request.uri().path().to_string(),
    };

    let (mut response, tags) = collection::with_collection(next.run(request)).await;

    for pair in state.invalidator.finalize(&url, &tags).await {
        apply_header(&mut response, pair);
    }
    apply_header(
        &mut response,
        state.invalidator.policy().status_header(CacheStatus::Miss),
    );

    response
}

/// Set a header on the response, skipping pairs that are not valid HTTP.
fn apply_header(response: &mut Response, (name, value): (String, String)) {
    match (
        HeaderName::try_from(name.as_str()),
        HeaderValue::from_str(&value),
    ) {
        (Ok(name), Ok(value)) => {
            response.headers_mut().insert(name, value);
        }
        _ => warn!(header = %name, "Skipping invalid response header"),
    }
}
