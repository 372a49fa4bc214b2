//! `POST /scrape` — the single scraping ingress.

use axum::extract::State;
use axum::Json;

use crate::error::Result;
use crate::models::{ScrapeReport, ScrapeRequest};
use crate::AppState;

pub async fn scrape_handler(
    State(state): State<AppState>,
    Json(request): Json<ScrapeRequest>,
) -> Result<Json<ScrapeReport>> {
    let report = state.dispatcher.execute(request).await?;
    Ok(Json(report))
}
