use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::extract::{self, Rule};
use super::types::{CronJob, CronReport, CronSchedule, CronSource, CronStatus};
use crate::core::command::CommandRunner;
use crate::core::error::SourceError;
use crate::core::files;

// Run state may sit on the job itself or under its `state` object; the
// nested copy wins per field. Aliases rank behind the primary name.
const ID: &[Rule] = &[&["id"], &["jobId"]];
const AGENT: &[Rule] = &[&["agentId"], &["agent", "id"], &["agent"]];
const NAME: &[Rule] = &[&["name"], &["title"]];
const LAST_STATUS: &[Rule] = &[
    &["state", "lastStatus"],
    &["state", "lastRunStatus"],
    &["lastStatus"],
    &["lastRunStatus"],
];
const LAST_RUN: &[Rule] = &[
    &["state", "lastRunAtMs"],
    &["state", "lastRunAt"],
    &["lastRunAtMs"],
    &["lastRunAt"],
];
const NEXT_RUN: &[Rule] = &[
    &["state", "nextRunAtMs"],
    &["state", "nextRunAt"],
    &["nextRunAtMs"],
    &["nextRunAt"],
];
const DURATION: &[Rule] = &[&["state", "lastDurationMs"], &["lastDurationMs"]];
const LAST_ERROR: &[Rule] = &[&["state", "lastError"], &["lastError"]];
const RUNNING: &[Rule] = &[&["state", "runningAtMs"], &["runningAtMs"]];
const MODEL: &[Rule] = &[&["payload", "model"], &["payload", "options", "model"]];

const OK_SYNONYMS: &[&str] = &["ok", "success", "completed"];
const ERROR_SYNONYMS: &[&str] = &["error", "failed", "timeout"];

/// Status is derived, never stored: `enabled` first, then the in-progress
/// marker, then the last recorded outcome.
pub fn derive_status(enabled: bool, running: bool, last_status: Option<&str>) -> CronStatus {
    if !enabled {
        return CronStatus::Disabled;
    }
    if running {
        return CronStatus::Running;
    }
    let outcome = last_status.map(|s| s.trim().to_ascii_lowercase());
    match outcome.as_deref() {
        Some(s) if OK_SYNONYMS.contains(&s) => CronStatus::Ok,
        Some(s) if ERROR_SYNONYMS.contains(&s) => CronStatus::Error,
        _ => CronStatus::Idle,
    }
}

/// Error text as recorded; structured errors are kept as compact JSON.
fn error_text(value: &Value, rules: &[Rule]) -> Option<String> {
    rules
        .iter()
        .filter_map(|rule| extract::lookup(value, rule))
        .find_map(|v| match v {
            Value::Null => None,
            Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            other => Some(other.to_string()),
        })
}

fn normalize_job(job: &Value, index: usize, default_agent_id: &str) -> CronJob {
    let running = RUNNING
        .iter()
        .find_map(|rule| extract::lookup(job, rule))
        .is_some_and(|v| !v.is_null());
    let enabled = job.get("enabled").and_then(Value::as_bool).unwrap_or(true);
    let last_status = extract::first_string(job, LAST_STATUS);

    let id = extract::first_string(job, ID).unwrap_or_else(|| format!("job-{}", index + 1));
    let name = extract::first_string(job, NAME).unwrap_or_else(|| id.clone());
    let agent_id =
        extract::first_string(job, AGENT).unwrap_or_else(|| default_agent_id.to_string());
    let schedule = job
        .get("schedule")
        .filter(|v| !v.is_null())
        .map(|v| {
            serde_json::from_value(v.clone()).unwrap_or_else(|_| CronSchedule::Raw(v.clone()))
        });

    CronJob {
        status: derive_status(enabled, running, last_status.as_deref()),
        id,
        agent_id,
        name,
        enabled,
        schedule,
        last_run_at: extract::first_timestamp(job, LAST_RUN),
        next_run_at: extract::first_timestamp(job, NEXT_RUN),
        last_duration_ms: extract::first_number(job, DURATION)
            .filter(|d| *d >= 0.0)
            .map(|d| d as u64),
        last_error: error_text(job, LAST_ERROR),
        model: extract::first_string(job, MODEL),
    }
}

/// Tagged parse of a job payload: bare array or `{jobs: [...]}`.
pub fn parse_jobs(value: Value, source_name: &str, default_agent_id: &str) -> Result<Vec<CronJob>, SourceError> {
    let raw = extract::collection(value, "jobs", source_name)?;
    Ok(raw
        .iter()
        .filter(|job| job.is_object())
        .enumerate()
        .map(|(i, job)| normalize_job(job, i, default_agent_id))
        .collect())
}

/// Canonical job list: live CLI query first, static jobs file second.
#[derive(Debug, Clone)]
pub struct CronJobSource {
    pub list_command: String,
    pub jobs_file: PathBuf,
    pub timeout: Duration,
    pub default_agent_id: String,
}

impl CronJobSource {
    pub async fn fetch(&self, runner: &dyn CommandRunner) -> CronReport {
        let (source, jobs) = match self.from_cli(runner).await {
            Some(jobs) => (CronSource::Cli, jobs),
            None => (CronSource::File, self.from_file().await),
        };
        info!(source = ?source, count = jobs.len(), "Collected cron jobs");
        CronReport {
            source,
            count: jobs.len(),
            jobs,
            checked_at: Utc::now(),
        }
    }

    /// `None` means "fall back": failed, empty, or unparsable output.
    async fn from_cli(&self, runner: &dyn CommandRunner) -> Option<Vec<CronJob>> {
        let output = runner.run(&self.list_command, self.timeout).await;
        let Some(stdout) = output.usable_stdout() else {
            debug!(
                "Cron CLI unavailable (ok={}): {}",
                output.ok,
                output.stderr.trim()
            );
            return None;
        };
        let Some(value) = extract::json_from_cli(stdout) else {
            warn!("Cron CLI printed non-JSON output, falling back to jobs file");
            return None;
        };
        match parse_jobs(value, "cron CLI", &self.default_agent_id) {
            Ok(jobs) if !jobs.is_empty() => Some(jobs),
            Ok(_) => None,
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    async fn from_file(&self) -> Vec<CronJob> {
        let Some(value) = files::read_json_value(&self.jobs_file).await else {
            return Vec::new();
        };
        parse_jobs(value, "cron jobs file", &self.default_agent_id).unwrap_or_else(|e| {
            warn!("{}", e);
            Vec::new()
        })
    }
}
