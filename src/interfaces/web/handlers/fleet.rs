use axum::{Json, extract::State};

use super::super::AppState;
use crate::core::telemetry::types::{AgentReport, CronReport, ServiceStatus};

pub async fn get_status(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(state.telemetry.status().await)
}

/// Also served as `/api/cron-status` for older dashboard builds.
pub async fn get_crons(State(state): State<AppState>) -> Json<CronReport> {
    Json(state.telemetry.crons().await)
}

pub async fn get_agents(State(state): State<AppState>) -> Json<AgentReport> {
    Json(state.telemetry.agents().await)
}
