use crate::error::{AppError, AppResult};
use crate::read_service::ReadService;
use crate::reading::StoredReading;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct HttpState {
    pub reads: ReadService,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    #[serde(default)]
    limit: Option<String>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

async fn get_latest(State(state): State<HttpState>) -> AppResult<Json<StoredReading>> {
    Ok(Json(state.reads.get_latest().await?))
}

async fn get_history(
    State(state): State<HttpState>,
    Query(params): Query<HistoryParams>,
) -> AppResult<Json<Vec<StoredReading>>> {
    let limit = match params.limit.as_deref().map(str::trim) {
        None => None,
        Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
            AppError::bad_request(format!("limit must be a positive integer, got {raw:?}"))
        })?),
    };
    Ok(Json(state.reads.get_history(limit).await?))
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/latest", get(get_latest))
        .route("/history", get(get_history))
        .with_state(state)
}
