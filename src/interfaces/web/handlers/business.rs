use axum::{Json, extract::State};

use super::super::AppState;
use crate::core::telemetry::types::{AuditReport, LeadReport, RevenueReport};

pub async fn get_revenue(State(state): State<AppState>) -> Json<RevenueReport> {
    Json(state.telemetry.revenue().await)
}

pub async fn get_leads(State(state): State<AppState>) -> Json<LeadReport> {
    Json(state.telemetry.leads().await)
}

pub async fn get_audits(State(state): State<AppState>) -> Json<AuditReport> {
    Json(state.telemetry.audits().await)
}
