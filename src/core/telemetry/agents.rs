use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::{debug, warn};

use super::extract::{self, Rule};
use super::types::{Agent, AgentReport, AgentStatus, CronJob, CronStatus};
use crate::core::files;

pub const IDLE_TASK: &str = "Idle";

const SEED_ID: &[Rule] = &[&["id"], &["agentId"]];
const SEED_NAME: &[Rule] = &[&["name"], &["displayName"]];
const SEED_ROLE: &[Rule] = &[&["role"], &["description"]];

/// Static agent metadata from the seed file.
#[derive(Debug, Clone, Default)]
pub struct AgentSeed {
    pub id: String,
    pub name: Option<String>,
    pub role: Option<String>,
    /// A model name, a list of names, or `{primary, fallbacks}`.
    pub model: Option<Value>,
    pub models: Option<Value>,
}

impl AgentSeed {
    /// `None` when the record carries no usable id.
    pub fn from_record(record: &Value) -> Option<Self> {
        let present = |key: &str| record.get(key).filter(|v| !v.is_null()).cloned();
        Some(Self {
            id: extract::first_string(record, SEED_ID)?,
            name: extract::first_string(record, SEED_NAME),
            role: extract::first_string(record, SEED_ROLE),
            model: present("model"),
            models: present("models"),
        })
    }
}

fn model_names(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
        Value::Array(items) => items.iter().for_each(|v| model_names(v, out)),
        Value::Object(map) => {
            for key in ["primary", "fallbacks"] {
                if let Some(v) = map.get(key) {
                    model_names(v, out);
                }
            }
        }
        _ => {}
    }
}

fn push_unique(list: &mut Vec<String>, candidate: String) {
    if !list.contains(&candidate) {
        list.push(candidate);
    }
}

/// Derives agent liveness from the current job set. Holds no state between calls.
#[derive(Debug, Clone)]
pub struct AgentResolver {
    pub seed_file: PathBuf,
    pub freshness_window: chrono::Duration,
    pub default_model: Option<String>,
}

impl AgentResolver {
    /// Seeds from disk; missing, malformed or empty files yield no seeds.
    pub async fn load_seeds(&self) -> Vec<AgentSeed> {
        let Some(value) = files::read_json_value(&self.seed_file).await else {
            return Vec::new();
        };
        match extract::collection(value, "agents", "agent seed file") {
            Ok(records) => records.iter().filter_map(AgentSeed::from_record).collect(),
            Err(e) => {
                warn!("{}", e);
                Vec::new()
            }
        }
    }

    pub fn resolve(&self, seeds: &[AgentSeed], jobs: &[CronJob], now: DateTime<Utc>) -> Vec<Agent> {
        let mut by_agent: BTreeMap<&str, Vec<&CronJob>> = BTreeMap::new();
        for job in jobs {
            by_agent.entry(job.agent_id.as_str()).or_default().push(job);
        }

        let roster: Vec<AgentSeed> = if seeds.is_empty() {
            debug!("No agent seeds, inferring {} agent(s) from jobs", by_agent.len());
            by_agent
                .keys()
                .map(|id| AgentSeed {
                    id: id.to_string(),
                    ..AgentSeed::default()
                })
                .collect()
        } else {
            seeds.to_vec()
        };

        let empty = Vec::new();
        roster
            .iter()
            .map(|seed| {
                let owned = by_agent.get(seed.id.as_str()).unwrap_or(&empty);
                self.derive(seed, owned, now)
            })
            .collect()
    }

    fn derive(&self, seed: &AgentSeed, owned: &[&CronJob], now: DateTime<Utc>) -> Agent {
        let running = owned.iter().find(|j| j.status == CronStatus::Running);
        let latest = owned
            .iter()
            .filter(|j| j.last_run_at.is_some())
            .max_by_key(|j| j.last_run_at);
        let last_run_at = latest.and_then(|j| j.last_run_at);
        let fresh = last_run_at.is_some_and(|at| now - at <= self.freshness_window);

        let status = if running.is_some() || fresh {
            AgentStatus::Active
        } else if !owned.is_empty() {
            AgentStatus::Scheduled
        } else {
            AgentStatus::Idle
        };

        let current_task = running
            .or(latest)
            .map(|j| j.name.clone())
            .unwrap_or_else(|| IDLE_TASK.to_string());

        let next_run_at = owned
            .iter()
            .filter(|j| j.enabled)
            .filter_map(|j| j.next_run_at)
            .min();

        let mut models = Vec::new();
        for value in [&seed.model, &seed.models].into_iter().flatten() {
            model_names(value, &mut models);
        }
        let mut resolved = Vec::new();
        for m in models {
            push_unique(&mut resolved, m);
        }
        for job in owned {
            if let Some(m) = &job.model {
                push_unique(&mut resolved, m.clone());
            }
        }
        if resolved.is_empty()
            && let Some(m) = &self.default_model
        {
            resolved.push(m.clone());
        }

        Agent {
            id: seed.id.clone(),
            name: seed
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| seed.id.clone()),
            role: seed
                .role
                .clone()
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| "agent".to_string()),
            models: resolved,
            status,
            job_count: owned.len(),
            current_task,
            last_run_at,
            next_run_at,
        }
    }

    pub fn report(&self, seeds: &[AgentSeed], jobs: &[CronJob]) -> AgentReport {
        let now = Utc::now();
        let agents = self.resolve(seeds, jobs, now);
        let active = agents
            .iter()
            .filter(|a| a.status == AgentStatus::Active)
            .count();
        debug!(count = agents.len(), active, "Resolved agents");
        AgentReport {
            count: agents.len(),
            agents,
            checked_at: now,
        }
    }
}

/// Number of jobs per agent id, handy for diagnostics output.
pub fn jobs_per_agent(jobs: &[CronJob]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for job in jobs {
        *counts.entry(job.agent_id.clone()).or_insert(0) += 1;
    }
    counts
}
