//! HTTP routes for the credential exchange service

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::exchange::{ExchangeRequest, TokenResponse};
use crate::rate_limit::{rate_limit_middleware, ClientRateLimiter};
use crate::security::{no_store, security_middleware};
use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    let limiter = ClientRateLimiter::from_config(&state.config.rate_limit);
    let body_limit = state.config.body_limit_bytes;

    let mut router = Router::new()
        .route("/exchange", post(exchange_handler))
        .route("/getCustomToken", post(exchange_handler))
        .route("/test", get(reachability_handler));

    if let Some(limiter) = limiter {
        router = router.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
    }

    router
        .layer(no_store())
        .layer(middleware::from_fn(security_middleware))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn exchange_handler(
    State(state): State<AppState>,
    body: Result<Json<ExchangeRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return rejection.into_response();
        }
        // An unreadable body carries no identifier
        Err(rejection) => {
            debug!("Exchange body rejected: {}", rejection.body_text());
            ExchangeRequest::default()
        }
    };

    match state.exchange.exchange(request.identifier.as_deref()).await {
        Ok(credential) => Json(TokenResponse {
            token: credential.token,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn reachability_handler() -> &'static str {
    "Backend is reachable!"
}
