//! The single catch-all handler.
//!
//! deny check -> classify -> resolve sources -> decrypt -> forward ->
//! sanitize -> headers and cookie

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, Uri, header},
    response::{IntoResponse, Response},
};
use owc_core::{
    ProxyError,
    route::{self, Route},
    sanitize::{self, Sanitized},
    source::{self, CalendarSource, RequestContext},
};
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

use crate::routes::AppError;
use crate::state::AppState;
use crate::upstream;

/// Largest request body forwarded upstream.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub async fn handle(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let span = info_span!("request", id = %Uuid::new_v4(), method = %method);
    async move {
        proxy(state, method, uri, headers, body)
            .await
            .into_response()
    }
    .instrument(span)
    .await
}

async fn proxy(
    state: AppState,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let path = uri.path();
    if route::is_calendar_file(path) {
        warn!("refusing calendar file request");
        return Err(ProxyError::AccessDenied.into());
    }

    let route = route::classify(path);
    let ctx = RequestContext::new(
        path,
        uri.query(),
        header_str(&headers, header::COOKIE),
        header_str(&headers, header::REFERER),
    );

    let sources = source::resolve(&ctx, &state.config)?;
    let plaintext = source::decrypt_sources(&sources, state.config.secret.as_ref())?;
    let url = route::build_upstream_url(&state.config.upstream, route, path, &ctx.query, &plaintext);
    debug!(?route, sources = sources.len(), "forwarding request");

    let body: Bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ProxyError::Internal(format!("could not read request body: {e}")))?;

    let upstream = upstream::forward(
        &state.client,
        method,
        url,
        upstream::outbound_headers(&headers),
        body,
    )
    .await?;

    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();
    let content_type = header_str(&upstream_headers, header::CONTENT_TYPE).map(str::to_string);

    // Refuse before reading a calendar body at all.
    if let Err(denied) = sanitize::check_allowed(content_type.as_deref(), path) {
        warn!(%status, "refusing calendar content from upstream");
        return Err(denied.into());
    }

    let bytes = upstream.bytes().await?;
    let body = match sanitize::sanitize(
        content_type.as_deref(),
        path,
        &bytes,
        &state.config.user_emails,
    )? {
        Sanitized::Passthrough => Body::from(bytes),
        Sanitized::Rewritten(text) => Body::from(text),
    };

    let cookie = if route == Route::MainPage
        && status.is_success()
        && sources.iter().any(CalendarSource::is_token)
    {
        Some(upstream::source_cookie(&sources)?)
    } else {
        None
    };

    debug!(%status, cookie = cookie.is_some(), "responding");

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = upstream::response_headers(&upstream_headers, cookie.as_ref());
    Ok(response)
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
