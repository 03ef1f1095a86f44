use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use sysinfo::System;
use tracing::{debug, warn};

use super::extract;
use super::types::{CpuStats, SystemSnapshot, Usage};
use crate::core::command::CommandRunner;
use crate::core::files;
use crate::platform::{NativePlatform, Platform};

struct HostCounters {
    cpu: CpuStats,
    memory: Usage,
    uptime: u64,
}

fn read_host_counters() -> HostCounters {
    let mut sys = System::new();
    sys.refresh_cpu_all();
    sys.refresh_memory();

    let cores = sys.cpus().len();
    let load = System::load_average().one;
    HostCounters {
        cpu: CpuStats {
            percent: cpu_percent(load, cores),
            load,
            cores,
        },
        memory: Usage {
            used: sys.used_memory(),
            total: sys.total_memory(),
        },
        uptime: System::uptime(),
    }
}

/// Load relative to core count, capped at 100 and rounded to one decimal.
pub fn cpu_percent(load: f64, cores: usize) -> f64 {
    if cores == 0 || !load.is_finite() {
        return 0.0;
    }
    let percent = (load / cores as f64 * 100.0).clamp(0.0, 100.0);
    (percent * 10.0).round() / 10.0
}

/// Last line of `df -kP` output: `fs blocks used available capacity mount`.
pub fn parse_df(stdout: &str) -> Usage {
    let Some(line) = stdout.lines().rev().find(|l| !l.trim().is_empty()) else {
        return Usage::default();
    };
    let fields: Vec<&str> = line.split_whitespace().collect();
    let kib = |i: usize| fields.get(i).and_then(|f| f.parse::<u64>().ok());
    match (kib(1), kib(2)) {
        (Some(total), Some(used)) => Usage {
            used: used * 1024,
            total: total * 1024,
        },
        _ => Usage::default(),
    }
}

/// Accepts an array of sessions, `{sessions: [...]}` or `{count: n}`.
pub fn count_sessions(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("sessions") {
                items.len()
            } else {
                map.get("count")
                    .and_then(extract::as_number)
                    .filter(|n| *n >= 0.0)
                    .map(|n| n as usize)
                    .unwrap_or(0)
            }
        }
        _ => 0,
    }
}

#[derive(Debug, Clone)]
pub struct SystemTelemetry {
    pub workspace: PathBuf,
    pub drafts_dir: PathBuf,
    pub sessions_command: String,
    pub timeout: Duration,
}

impl SystemTelemetry {
    async fn disk(&self, runner: &dyn CommandRunner) -> Usage {
        let output = runner
            .run(&NativePlatform::disk_usage_command(&self.workspace), self.timeout)
            .await;
        match output.usable_stdout() {
            Some(stdout) => parse_df(stdout),
            None => {
                debug!("Disk usage unavailable: {}", output.stderr.trim());
                Usage::default()
            }
        }
    }

    async fn active_sessions(&self, runner: &dyn CommandRunner) -> usize {
        let output = runner.run(&self.sessions_command, self.timeout).await;
        output
            .usable_stdout()
            .and_then(extract::json_from_cli)
            .map(|value| count_sessions(&value))
            .unwrap_or(0)
    }

    async fn pending_drafts(&self) -> usize {
        files::list_files(&self.drafts_dir, Some("json")).await.len()
    }

    pub async fn fetch(&self, runner: &dyn CommandRunner) -> SystemSnapshot {
        let counters = tokio::task::spawn_blocking(read_host_counters);
        let (counters, disk, active_sessions, pending_drafts) = tokio::join!(
            counters,
            self.disk(runner),
            self.active_sessions(runner),
            self.pending_drafts()
        );
        let counters = counters.unwrap_or_else(|e| {
            warn!("Host counter task failed: {}", e);
            HostCounters {
                cpu: CpuStats::default(),
                memory: Usage::default(),
                uptime: 0,
            }
        });

        SystemSnapshot {
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
            cpu: counters.cpu,
            memory: counters.memory,
            disk,
            uptime: counters.uptime,
            active_sessions,
            pending_drafts,
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::command::mock::MockRunner;
    use serde_json::json;

    #[test]
    fn cpu_percent_caps_and_rounds() {
        assert_eq!(cpu_percent(1.0, 4), 25.0);
        assert_eq!(cpu_percent(1.234, 3), 41.1);
        assert_eq!(cpu_percent(12.0, 4), 100.0);
        assert_eq!(cpu_percent(1.0, 0), 0.0);
    }

    #[test]
    fn parse_df_reads_final_line() {
        let out = "Filesystem     1024-blocks      Used Available Capacity Mounted on\n\
                   /dev/nvme0n1p2   490691512 123456789 342234567      27% /\n";
        let usage = parse_df(out);
        assert_eq!(usage.total, 490_691_512 * 1024);
        assert_eq!(usage.used, 123_456_789 * 1024);
    }

    #[test]
    fn parse_df_failure_yields_zeros() {
        assert_eq!(parse_df(""), Usage::default());
        assert_eq!(parse_df("df: /nope: No such file or directory"), Usage::default());
    }

    #[test]
    fn sessions_accept_three_shapes() {
        assert_eq!(count_sessions(&json!([{}, {}])), 2);
        assert_eq!(count_sessions(&json!({"sessions": [{}]})), 1);
        assert_eq!(count_sessions(&json!({"count": 4})), 4);
        assert_eq!(count_sessions(&json!({"count": -1})), 0);
        assert_eq!(count_sessions(&json!("three")), 0);
    }

    #[tokio::test]
    async fn fetch_combines_commands_and_drafts() {
        let dir = tempfile::tempdir().unwrap();
        let drafts = dir.path().join("drafts");
        std::fs::create_dir(&drafts).unwrap();
        std::fs::write(drafts.join("a.json"), "{}").unwrap();
        std::fs::write(drafts.join("b.json"), "{}").unwrap();
        std::fs::write(drafts.join("c.md"), "").unwrap();

        let runner = MockRunner::new()
            .with("df -kP", "Filesystem 1024-blocks Used Available Capacity Mounted on\n/dev/sda1 100 40 60 40% /\n", true)
            .with("openclaw sessions list", r#"{"sessions": [{"id": "s1"}, {"id": "s2"}, {"id": "s3"}]}"#, true);
        let telemetry = SystemTelemetry {
            workspace: dir.path().to_path_buf(),
            drafts_dir: drafts,
            sessions_command: "openclaw sessions list --json".into(),
            timeout: Duration::from_secs(1),
        };
        let snapshot = telemetry.fetch(&runner).await;
        assert_eq!(snapshot.disk, Usage { used: 40 * 1024, total: 100 * 1024 });
        assert_eq!(snapshot.active_sessions, 3);
        assert_eq!(snapshot.pending_drafts, 2);
        assert!(!snapshot.hostname.is_empty());
        assert!(snapshot.cpu.percent <= 100.0);
    }

    #[tokio::test]
    async fn failing_commands_default_to_zero() {
        let telemetry = SystemTelemetry {
            workspace: PathBuf::from("/nonexistent"),
            drafts_dir: PathBuf::from("/nonexistent/drafts"),
            sessions_command: "openclaw sessions list --json".into(),
            timeout: Duration::from_secs(1),
        };
        let snapshot = telemetry.fetch(&MockRunner::new()).await;
        assert_eq!(snapshot.disk, Usage::default());
        assert_eq!(snapshot.active_sessions, 0);
        assert_eq!(snapshot.pending_drafts, 0);
    }
}
