use axum::{Json, extract::State};

use super::super::AppState;
use crate::core::telemetry::types::{ActivityReport, SystemSnapshot};

pub async fn get_system(State(state): State<AppState>) -> Json<SystemSnapshot> {
    Json(state.telemetry.system().await)
}

pub async fn get_activity(State(state): State<AppState>) -> Json<ActivityReport> {
    Json(state.telemetry.activity().await)
}
