use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::EvaluationError;
use crate::evaluator::{self, EvaluateOptions};
use crate::model::{EvaluationResult, Watchlist, validate_watchlist};
use crate::quote::PriceSource;
use crate::remote::API_KEY_HEADER;

/// Shared state for every request.
#[derive(Clone)]
pub struct ServerState {
    pub source: Arc<dyn PriceSource>,
    pub options: EvaluateOptions,
    pub api_key: Arc<str>,
    /// Cancelled on shutdown; each request evaluates under a child token.
    pub shutdown: CancellationToken,
}

/// Request failures, rendered as `{"detail": "..."}`.
#[derive(Debug)]
pub enum ApiRejection {
    Unauthorized(&'static str),
    Unprocessable(String),
    Unavailable(String),
}

impl IntoResponse for ApiRejection {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.to_owned()),
            Self::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<JsonRejection> for ApiRejection {
    fn from(rejection: JsonRejection) -> Self {
        Self::Unprocessable(rejection.body_text())
    }
}

pub fn router(state: ServerState) -> Router {
    let protected = Router::new()
        .route("/check-alerts", post(check_alerts))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> impl IntoResponse {
    Json(json!({
        "name": "StockMon API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Stock price threshold monitoring",
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn require_api_key(
    State(state): State<ServerState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiRejection> {
    let Some(header) = request.headers().get(API_KEY_HEADER) else {
        warn!(path = %request.uri().path(), "request without API key");
        return Err(ApiRejection::Unauthorized("Missing API key"));
    };

    let provided = header.to_str().map(str::trim).unwrap_or_default();
    if provided.is_empty() || !constant_time_eq(provided.as_bytes(), state.api_key.as_bytes()) {
        warn!(path = %request.uri().path(), "request with invalid API key");
        return Err(ApiRejection::Unauthorized("Invalid API key"));
    }

    Ok(next.run(request).await)
}

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len = a.len().max(b.len());
    let mut diff = a.len() ^ b.len();
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= usize::from(x ^ y);
    }
    diff == 0
}

async fn check_alerts(
    State(state): State<ServerState>,
    payload: Result<Json<Watchlist>, JsonRejection>,
) -> Result<Json<EvaluationResult>, ApiRejection> {
    let Json(watchlist) = payload?;
    validate_watchlist(&watchlist).map_err(ApiRejection::Unprocessable)?;

    let cancel = state.shutdown.child_token();
    let outcome = evaluator::evaluate(&watchlist, state.source.as_ref(), &state.options, &cancel)
        .await
        .map_err(|report| match report.current_context() {
            EvaluationError::Cancelled => {
                ApiRejection::Unavailable("Server is shutting down".into())
            }
        })?;

    let result = outcome.into_result(Utc::now());
    info!(
        tickers = watchlist.len(),
        alerts = result.alerts.len(),
        errors = result.errors.len(),
        degraded = result.service_degraded,
        "check-alerts served"
    );
    Ok(Json(result))
}
