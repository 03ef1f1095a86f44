use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::platform::{NativePlatform, Platform};

pub const CONFIG_FILE_NAME: &str = "opsdeck.toml";
/// Upper bound for `heuristics.freshness_window_hours` (one year).
pub const MAX_FRESHNESS_HOURS: u64 = 24 * 365;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DashboardConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub commands: CommandsConfig,

    #[serde(default)]
    pub heuristics: HeuristicsConfig,

    #[serde(default)]
    pub agents: AgentsConfig,

    #[serde(default)]
    pub probes: ProbesConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Extra origins allowed by CORS besides the loopback ones.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Filesystem locations of every collaborator. Only `openclaw_home` is usually
/// set; the rest default to the tool's conventional layout below it.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PathsConfig {
    #[serde(default)]
    pub openclaw_home: Option<PathBuf>,
    #[serde(default)]
    pub workspace: Option<PathBuf>,
    #[serde(default)]
    pub cron_jobs_file: Option<PathBuf>,
    #[serde(default)]
    pub agents_file: Option<PathBuf>,
    #[serde(default)]
    pub payments_file: Option<PathBuf>,
    #[serde(default)]
    pub metrics_file: Option<PathBuf>,
    #[serde(default)]
    pub leads_db: Option<PathBuf>,
    #[serde(default)]
    pub leads_file: Option<PathBuf>,
    #[serde(default)]
    pub leads_batch_dir: Option<PathBuf>,
    #[serde(default)]
    pub audit_cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub drafts_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_openclaw_bin")]
    pub openclaw_bin: String,

    #[serde(default = "default_sqlite_bin")]
    pub sqlite_bin: String,

    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeuristicsConfig {
    /// A job run newer than this still marks its agent as active.
    #[serde(default = "default_freshness_hours")]
    pub freshness_window_hours: u64,

    #[serde(default)]
    pub synthetic: SyntheticFilterConfig,
}

/// Markers of test/placeholder payment rows. All comparisons are case-insensitive.
#[derive(Debug, Clone, Deserialize)]
pub struct SyntheticFilterConfig {
    #[serde(default = "default_synthetic_names")]
    pub names: Vec<String>,

    #[serde(default = "default_synthetic_domains")]
    pub email_domains: Vec<String>,

    #[serde(default = "default_synthetic_prefixes")]
    pub session_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentsConfig {
    #[serde(default = "default_agent_id")]
    pub default_agent_id: String,

    #[serde(default)]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbesConfig {
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Append daemon logs to `<data_dir>/run/opsdeck.log` in addition to stdout.
    #[serde(default = "default_true")]
    pub file: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    17900
}
fn default_openclaw_bin() -> String {
    "openclaw".to_string()
}
fn default_sqlite_bin() -> String {
    "sqlite3".to_string()
}
fn default_command_timeout() -> u64 {
    15
}
fn default_max_output() -> usize {
    1024 * 1024
}
fn default_freshness_hours() -> u64 {
    6
}
fn default_synthetic_names() -> Vec<String> {
    ["test", "test business", "test company", "acme test", "example business", "demo"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_synthetic_domains() -> Vec<String> {
    ["example.com", "example.org", "example.net", "test.com"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_synthetic_prefixes() -> Vec<String> {
    vec!["cs_test_".to_string(), "test_".to_string()]
}
fn default_agent_id() -> String {
    "main".to_string()
}
fn default_gateway_url() -> String {
    "http://127.0.0.1:18789/".to_string()
}
fn default_ollama_url() -> String {
    "http://127.0.0.1:11434/api/tags".to_string()
}
fn default_probe_timeout() -> u64 {
    4
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            openclaw_bin: default_openclaw_bin(),
            sqlite_bin: default_sqlite_bin(),
            timeout_secs: default_command_timeout(),
            max_output_bytes: default_max_output(),
        }
    }
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            freshness_window_hours: default_freshness_hours(),
            synthetic: SyntheticFilterConfig::default(),
        }
    }
}

impl Default for SyntheticFilterConfig {
    fn default() -> Self {
        Self {
            names: default_synthetic_names(),
            email_domains: default_synthetic_domains(),
            session_prefixes: default_synthetic_prefixes(),
        }
    }
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            default_agent_id: default_agent_id(),
            default_model: None,
        }
    }
}

impl Default for ProbesConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            ollama_url: default_ollama_url(),
            timeout_secs: default_probe_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: true,
        }
    }
}

/// Fully resolved collaborator locations handed to every aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePaths {
    pub openclaw_home: PathBuf,
    pub workspace: PathBuf,
    pub cron_jobs_file: PathBuf,
    pub agents_file: PathBuf,
    pub payments_file: PathBuf,
    pub metrics_file: PathBuf,
    pub leads_db: PathBuf,
    pub leads_file: PathBuf,
    pub leads_batch_dir: PathBuf,
    pub audit_cache_dir: PathBuf,
    pub drafts_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl SourcePaths {
    /// Conventional layout below an automation-tool home directory.
    fn with_workspace(home: PathBuf, workspace: PathBuf) -> Self {
        let data = workspace.join("data");
        Self {
            cron_jobs_file: home.join("cron").join("jobs.json"),
            agents_file: workspace.join("agents.json"),
            payments_file: data.join("payments.json"),
            metrics_file: data.join("business-metrics.json"),
            leads_db: data.join("leads.db"),
            leads_file: data.join("leads.json"),
            leads_batch_dir: workspace.join("leads"),
            audit_cache_dir: workspace.join("audits").join("cache"),
            drafts_dir: workspace.join("drafts"),
            log_dir: home.join("logs"),
            openclaw_home: home,
            workspace,
        }
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

impl PathsConfig {
    pub fn resolve(&self) -> SourcePaths {
        let home = self
            .openclaw_home
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(NativePlatform::openclaw_home);
        let workspace = self
            .workspace
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(|| home.join("workspace"));
        let base = SourcePaths::with_workspace(home, workspace);

        let pick = |over: &Option<PathBuf>, fallback: PathBuf| {
            over.as_deref().map(expand_home).unwrap_or(fallback)
        };
        SourcePaths {
            cron_jobs_file: pick(&self.cron_jobs_file, base.cron_jobs_file),
            agents_file: pick(&self.agents_file, base.agents_file),
            payments_file: pick(&self.payments_file, base.payments_file),
            metrics_file: pick(&self.metrics_file, base.metrics_file),
            leads_db: pick(&self.leads_db, base.leads_db),
            leads_file: pick(&self.leads_file, base.leads_file),
            leads_batch_dir: pick(&self.leads_batch_dir, base.leads_batch_dir),
            audit_cache_dir: pick(&self.audit_cache_dir, base.audit_cache_dir),
            drafts_dir: pick(&self.drafts_dir, base.drafts_dir),
            log_dir: pick(&self.log_dir, base.log_dir),
            openclaw_home: base.openclaw_home,
            workspace: base.workspace,
        }
    }
}

impl CommandsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl HeuristicsConfig {
    pub fn freshness_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.freshness_window_hours.min(MAX_FRESHNESS_HOURS) as i64)
    }
}

impl ProbesConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl LoggingConfig {
    pub fn max_level(&self) -> tracing::Level {
        self.level.parse().unwrap_or(tracing::Level::INFO)
    }
}

impl DashboardConfig {
    pub fn default_path() -> PathBuf {
        NativePlatform::data_dir().join(CONFIG_FILE_NAME)
    }

    /// Load from `path` (or the default location). A missing file yields defaults;
    /// a malformed one is an error so typos are not silently ignored.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        if !config_path.exists() {
            info!(
                "No config found at {}, using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("reading {}", config_path.display()))?;
        let mut config: DashboardConfig = toml::from_str(&content)
            .with_context(|| format!("parsing {}", config_path.display()))?;
        config.sanitize();

        info!(
            "Loaded config from {}: server={}:{}, freshness={}h",
            config_path.display(),
            config.server.host,
            config.server.port,
            config.heuristics.freshness_window_hours
        );
        Ok(config)
    }

    /// Replace probe URLs that do not parse and zero limits with defaults, and
    /// clamp the freshness window.
    fn sanitize(&mut self) {
        if url::Url::parse(&self.probes.gateway_url).is_err() {
            warn!(
                "Invalid probes.gateway_url '{}', falling back to default",
                self.probes.gateway_url
            );
            self.probes.gateway_url = default_gateway_url();
        }
        if url::Url::parse(&self.probes.ollama_url).is_err() {
            warn!(
                "Invalid probes.ollama_url '{}', falling back to default",
                self.probes.ollama_url
            );
            self.probes.ollama_url = default_ollama_url();
        }
        if self.heuristics.freshness_window_hours > MAX_FRESHNESS_HOURS {
            warn!(
                "heuristics.freshness_window_hours {} exceeds {}, clamping",
                self.heuristics.freshness_window_hours, MAX_FRESHNESS_HOURS
            );
            self.heuristics.freshness_window_hours = MAX_FRESHNESS_HOURS;
        }
        if self.commands.max_output_bytes == 0 {
            self.commands.max_output_bytes = default_max_output();
        }
        let synthetic = &mut self.heuristics.synthetic;
        for list in [
            &mut synthetic.names,
            &mut synthetic.email_domains,
            &mut synthetic.session_prefixes,
        ] {
            for item in list.iter_mut() {
                *item = item.trim().to_lowercase();
            }
            list.retain(|s| !s.is_empty());
        }
    }
}
