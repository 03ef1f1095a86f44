//! Read-only aggregation of everything the dashboard shows.
//!
//! Each component owns its source chain and absorbs that chain's failures into
//! typed defaults, so [`Telemetry`] can fan a request out without any source
//! being able to fail another.

pub mod activity;
pub mod agents;
pub mod audits;
pub mod buckets;
pub mod crons;
pub mod extract;
pub mod leads;
pub mod revenue;
pub mod services;
pub mod system;
pub mod types;

use anyhow::{Result, bail};
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::command::CommandRunner;
use crate::core::config::{DashboardConfig, SourcePaths};
use activity::ActivityLogReader;
use agents::AgentResolver;
use audits::AuditSummaryLoader;
use buckets::Buckets;
use crons::CronJobSource;
use leads::LeadAggregator;
use revenue::{RevenueAggregator, SyntheticFilter};
use services::ServiceProbes;
use system::SystemTelemetry;
use types::{
    ActivityReport, AgentReport, AuditReport, CronReport, LeadReport, RevenueReport,
    ServiceStatus, SystemSnapshot,
};

/// Aggregates exposed by the API and the `snapshot` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Status,
    Crons,
    Agents,
    Revenue,
    Audits,
    Leads,
    System,
    Activity,
}

impl Resource {
    pub const ALL: [Resource; 8] = [
        Resource::Status,
        Resource::Crons,
        Resource::Agents,
        Resource::Revenue,
        Resource::Audits,
        Resource::Leads,
        Resource::System,
        Resource::Activity,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Resource::Status => "status",
            Resource::Crons => "crons",
            Resource::Agents => "agents",
            Resource::Revenue => "revenue",
            Resource::Audits => "audits",
            Resource::Leads => "leads",
            Resource::System => "system",
            Resource::Activity => "activity",
        }
    }
}

impl FromStr for Resource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        match Resource::ALL.into_iter().find(|r| r.name() == wanted) {
            Some(resource) => Ok(resource),
            None if wanted == "cron-status" => Ok(Resource::Crons),
            None => bail!(
                "Unknown resource '{}'. Expected one of: {}",
                s,
                Resource::ALL.map(Resource::name).join(", ")
            ),
        }
    }
}

/// Composition root: resolved paths, config and the command seam. Immutable
/// after construction and shared across requests behind an `Arc`.
pub struct Telemetry {
    config: DashboardConfig,
    paths: SourcePaths,
    runner: Arc<dyn CommandRunner>,
    shutdown: CancellationToken,
}

impl Telemetry {
    pub fn new(
        config: DashboardConfig,
        runner: Arc<dyn CommandRunner>,
        shutdown: CancellationToken,
    ) -> Self {
        let paths = config.paths.resolve();
        Self {
            config,
            paths,
            runner,
            shutdown,
        }
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn paths(&self) -> &SourcePaths {
        &self.paths
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    /// An automation-tool subcommand line.
    pub fn openclaw_command(&self, args: &str) -> String {
        format!("{} {}", self.config.commands.openclaw_bin, args)
    }

    fn cron_source(&self) -> CronJobSource {
        CronJobSource {
            list_command: self.openclaw_command("cron list --json"),
            jobs_file: self.paths.cron_jobs_file.clone(),
            timeout: self.config.commands.timeout(),
            default_agent_id: self.config.agents.default_agent_id.clone(),
        }
    }

    pub async fn crons(&self) -> CronReport {
        self.cron_source().fetch(self.runner()).await
    }

    pub async fn agents(&self) -> AgentReport {
        let resolver = AgentResolver {
            seed_file: self.paths.agents_file.clone(),
            freshness_window: self.config.heuristics.freshness_window(),
            default_model: self.config.agents.default_model.clone(),
        };
        let (seeds, crons) = tokio::join!(resolver.load_seeds(), self.crons());
        resolver.report(&seeds, &crons.jobs)
    }

    pub async fn revenue(&self) -> RevenueReport {
        RevenueAggregator {
            payments_file: self.paths.payments_file.clone(),
            metrics_file: self.paths.metrics_file.clone(),
            filter: SyntheticFilter::from(&self.config.heuristics.synthetic),
        }
        .fetch(&Buckets::now_local())
        .await
    }

    pub async fn leads(&self) -> LeadReport {
        LeadAggregator {
            db_path: self.paths.leads_db.clone(),
            leads_file: self.paths.leads_file.clone(),
            batch_dir: self.paths.leads_batch_dir.clone(),
            sqlite_bin: self.config.commands.sqlite_bin.clone(),
            timeout: self.config.commands.timeout(),
        }
        .fetch(self.runner())
        .await
    }

    pub async fn audits(&self) -> AuditReport {
        AuditSummaryLoader {
            cache_dir: self.paths.audit_cache_dir.clone(),
        }
        .fetch(&Buckets::now_local())
        .await
    }

    pub async fn system(&self) -> SystemSnapshot {
        SystemTelemetry {
            workspace: self.paths.workspace.clone(),
            drafts_dir: self.paths.drafts_dir.clone(),
            sessions_command: self.openclaw_command("sessions list --json"),
            timeout: self.config.commands.timeout(),
        }
        .fetch(self.runner())
        .await
    }

    pub async fn activity(&self) -> ActivityReport {
        ActivityLogReader {
            log_dir: self.paths.log_dir.clone(),
        }
        .fetch()
        .await
    }

    pub async fn status(&self) -> ServiceStatus {
        ServiceProbes {
            gateway_url: self.config.probes.gateway_url.clone(),
            ollama_url: self.config.probes.ollama_url.clone(),
            timeout: self.config.probes.timeout(),
            channels_command: self.openclaw_command("channels status --json"),
            command_timeout: self.config.probes.timeout(),
        }
        .fetch(self.runner(), &self.shutdown.child_token())
        .await
    }

    /// The JSON body the matching endpoint would serve.
    pub async fn snapshot(&self, resource: Resource) -> Result<serde_json::Value> {
        let value = match resource {
            Resource::Status => serde_json::to_value(self.status().await)?,
            Resource::Crons => serde_json::to_value(self.crons().await)?,
            Resource::Agents => serde_json::to_value(self.agents().await)?,
            Resource::Revenue => serde_json::to_value(self.revenue().await)?,
            Resource::Audits => serde_json::to_value(self.audits().await)?,
            Resource::Leads => serde_json::to_value(self.leads().await)?,
            Resource::System => serde_json::to_value(self.system().await)?,
            Resource::Activity => serde_json::to_value(self.activity().await)?,
        };
        Ok(value)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::telemetry_at;
    use super::*;
    use crate::core::command::mock::MockRunner;
    use serde_json::json;

    #[test]
    fn resources_parse_by_name() {
        assert_eq!("Leads".parse::<Resource>().unwrap(), Resource::Leads);
        assert_eq!("cron-status".parse::<Resource>().unwrap(), Resource::Crons);
        let err = "boards".parse::<Resource>().unwrap_err().to_string();
        assert!(err.contains("status, crons, agents"));
    }

    #[tokio::test]
    async fn agents_are_derived_from_the_same_job_list() {
        let dir = tempfile::tempdir().unwrap();
        let cron_dir = dir.path().join("cron");
        std::fs::create_dir_all(&cron_dir).unwrap();
        std::fs::write(
            cron_dir.join("jobs.json"),
            json!({"jobs": [
                {"id": "1", "agentId": "scout", "name": "Scrape", "state": {"runningAtMs": 1}},
                {"id": "2", "name": "Digest", "enabled": false}
            ]})
            .to_string(),
        )
        .unwrap();

        let telemetry = telemetry_at(dir.path(), MockRunner::new());
        let report = telemetry.agents().await;
        let ids: Vec<&str> = report.agents.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["main", "scout"]);
        assert_eq!(report.agents[1].current_task, "Scrape");
    }

    #[tokio::test]
    async fn snapshot_serializes_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let telemetry = telemetry_at(dir.path(), MockRunner::new());
        let value = telemetry.snapshot(Resource::Revenue).await.unwrap();
        assert_eq!(value["totalCount"], json!(0));
        assert_eq!(value["payments"], json!([]));
    }
}
