//! `GET /stats` and `GET /jobs` — dispatcher introspection.

use axum::extract::State;
use axum::Json;

use crate::models::JobView;
use crate::services::DispatcherStats;
use crate::AppState;

pub async fn stats_handler(State(state): State<AppState>) -> Json<DispatcherStats> {
    Json(state.dispatcher.stats().await)
}

pub async fn jobs_handler(State(state): State<AppState>) -> Json<Vec<JobView>> {
    Json(state.dispatcher.jobs())
}
