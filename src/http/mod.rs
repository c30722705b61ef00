//! JSON-over-HTTP surface.

mod auth;
pub mod dto;
mod error;
mod handlers;

pub use error::ApiError;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderValue, Method, Request},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::engine::Engine;
use crate::observability;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub admin_token: Arc<str>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, admin_token: impl Into<Arc<str>>) -> Self {
        Self {
            engine,
            admin_token: admin_token.into(),
        }
    }
}

/// Count and time every request by its route template.
async fn track_metrics(request: Request<Body>, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let started = Instant::now();
    let response = next.run(request).await;

    let status = observability::status_label(response.status().as_u16());
    metrics::counter!(observability::HTTP_REQUESTS_TOTAL, "route" => route.clone(), "status" => status)
        .increment(1);
    metrics::histogram!(observability::HTTP_REQUEST_DURATION_SECONDS, "route" => route)
        .record(started.elapsed().as_secs_f64());
    response
}

/// The full API router with tracing and metrics layers applied.
pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/reservations/by-station", get(handlers::reservations_by_station))
        .route("/reservations/{id}", delete(handlers::admin_delete_reservation))
        .route("/reservations/{id}/cancel", post(handlers::admin_cancel_reservation))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_admin));

    let api = Router::new()
        .route("/stations", get(handlers::list_stations))
        .route("/stations/{id}/reservations", get(handlers::station_reservations))
        .route("/reservations", post(handlers::create_reservation))
        .route("/reservations/by-station", get(handlers::reservations_by_station))
        .route("/reservations/my", get(handlers::my_reservations))
        .route("/reservations/{id}", delete(handlers::delete_reservation))
        .route("/reservations/{id}/cancel", post(handlers::cancel_reservation))
        .route("/plates/verify", post(handlers::verify_plate))
        .nest("/admin", admin);

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The served application: [`router`] behind one in-flight request cap shared
/// by every route, plus CORS when origins are configured.
pub fn app(state: AppState, max_connections: usize, cors_origins: &[String]) -> Router {
    let app = router(state).layer(GlobalConcurrencyLimitLayer::new(max_connections));
    match cors_layer(cors_origins) {
        Some(cors) => app.layer(cors),
        None => app,
    }
}

/// CORS for the configured origins; `None` when no origins are configured.
pub fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("ignoring invalid CORS origin {o:?}");
                None
            }
        })
        .collect();
    if allowed.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
            ]),
    )
}
