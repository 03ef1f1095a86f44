use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CronStatus {
    Ok,
    Error,
    Running,
    Idle,
    Disabled,
}

/// Schedule descriptor as the automation tool reports it. The structured
/// form is passed through untouched; rendering is the UI's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CronSchedule {
    Expr(String),
    Structured {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expr: Option<String>,
        #[serde(default, rename = "everyMs", skip_serializing_if = "Option::is_none")]
        every_ms: Option<u64>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    /// Any other shape, kept verbatim.
    Raw(Value),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    pub id: String,
    pub agent_id: String,
    pub name: String,
    pub enabled: bool,
    pub schedule: Option<CronSchedule>,
    pub status: CronStatus,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CronSource {
    Cli,
    File,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CronReport {
    pub source: CronSource,
    pub jobs: Vec<CronJob>,
    pub count: usize,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Scheduled,
    Idle,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub role: String,
    pub models: Vec<String>,
    pub status: AgentStatus,
    pub job_count: usize,
    pub current_task: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReport {
    pub agents: Vec<Agent>,
    pub count: usize,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RevenueSource {
    Payments,
    Metrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueEntry {
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub source: RevenueSource,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueReport {
    pub today: f64,
    pub week: f64,
    pub month: f64,
    pub payments: Vec<RevenueEntry>,
    pub total_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub name: String,
    pub email: String,
    pub website: String,
    pub source: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeadReport {
    pub leads: Vec<Lead>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSummary {
    pub id: String,
    pub business_name: String,
    pub score: u8,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub total: usize,
    pub today: usize,
    pub recent: Vec<AuditSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CpuStats {
    pub percent: f64,
    pub load: f64,
    pub cores: usize,
}

/// Used/total pair in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub used: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    pub hostname: String,
    pub cpu: CpuStats,
    pub memory: Usage,
    pub disk: Usage,
    pub uptime: u64,
    pub active_sessions: usize,
    pub pending_drafts: usize,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEvent {
    pub file: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub line: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityReport {
    pub events: Vec<ActivityEvent>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub gateway: bool,
    pub whatsapp: bool,
    pub ollama: bool,
    pub checked_at: DateTime<Utc>,
}
