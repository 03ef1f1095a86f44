use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::get,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use super::AppState;
use super::handlers::{business, fleet, host};

fn is_loopback_origin(origin: &HeaderValue) -> bool {
    origin
        .to_str()
        .ok()
        .and_then(|o| url::Url::parse(o).ok())
        .is_some_and(|url| {
            matches!(url.scheme(), "http" | "https")
                && matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"))
        })
}

/// The dashboard front end runs on its own local port, so any loopback origin
/// is accepted, plus whatever `server.allowed_origins` lists.
fn build_localhost_cors(allowed_origins: Arc<Vec<String>>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            is_loopback_origin(origin)
                || allowed_origins
                    .iter()
                    .any(|allowed| allowed.as_bytes() == origin.as_bytes())
        }))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub(crate) fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(fleet::get_status))
        .route("/api/crons", get(fleet::get_crons))
        .route("/api/cron-status", get(fleet::get_crons))
        .route("/api/agents", get(fleet::get_agents))
        .route("/api/revenue", get(business::get_revenue))
        .route("/api/leads", get(business::get_leads))
        .route("/api/audits", get(business::get_audits))
        .route("/api/system", get(host::get_system))
        .route("/api/activity", get(host::get_activity))
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.allowed_origins.clone()))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
