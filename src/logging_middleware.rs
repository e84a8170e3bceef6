// src/logging_middleware.rs
//! Request logging middleware
//!
//! Bodies are never read here; chat answers are streamed and must pass through untouched.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::auth::cookies::get_cookie_value;
use crate::auth::session::SESSION_COOKIE_NAME;

/// Logs method, path, status and latency for every request
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let has_session = get_cookie_value(request.headers(), SESSION_COOKIE_NAME).is_some();
    let started = Instant::now();

    debug!(method = %method, path = %path, has_session_cookie = has_session, "📥 Request");

    let response = next.run(request).await;
    let status = response.status();
    let latency_ms = started.elapsed().as_millis() as u64;

    if status.is_server_error() {
        warn!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            latency_ms,
            has_session_cookie = has_session,
            "📤 Response"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            latency_ms,
            has_session_cookie = has_session,
            "📤 Response"
        );
    }

    response
}
