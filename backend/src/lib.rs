pub mod handlers;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Request},
    http::{HeaderValue, Method},
    middleware,
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use models::config::AppConfig;
use services::enhance::EnhanceService;

/// Multipart framing overhead allowed on top of the image byte limit.
const MULTIPART_SLACK_BYTES: u64 = 1024 * 1024;

pub struct AppState {
    pub config: Arc<AppConfig>,
    pub enhance: EnhanceService,
}

/// Per-request id, set by the middleware and readable via `Extension<RequestId>`.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

async fn request_id_middleware(mut request: Request<Body>, next: middleware::Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if response.headers().contains_key("x-request-id") {
        return response;
    }
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("X-Request-Id", value);
    }
    response
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed_origins.iter().filter_map(|o| o.parse().ok()))
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::any())
        .expose_headers([axum::http::HeaderName::from_static("x-request-id")])
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state
        .config
        .max_upload_bytes
        .saturating_add(MULTIPART_SLACK_BYTES)
        .min(usize::MAX as u64) as usize;

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<Body>| {
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
            )
        })
        .on_response(|response: &Response, latency: std::time::Duration, _span: &Span| {
            tracing::info!(
                status = response.status().as_u16(),
                latency_ms = latency.as_millis() as u64,
                "response",
            );
        });

    Router::new()
        .route("/", get(handlers::health::root))
        .route("/api/health", get(handlers::health::health_check))
        .route("/api/version", get(handlers::health::version))
        .route("/api/enhance", post(handlers::enhance::enhance_image))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(trace_layer)
        .layer(cors_layer(&state.config.allowed_origins))
        .with_state(state)
}
