use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{info, warn};

/// Request logging middleware: one structured line per request.
///
/// Server errors are logged at warn so they stand out from normal traffic.
pub async fn trace_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if status.is_server_error() {
        warn!(method = %method, path = %path, status = status.as_u16(), elapsed_ms, "Request failed");
    } else {
        info!(method = %method, path = %path, status = status.as_u16(), elapsed_ms, "Request handled");
    }
    response
}
