use anyhow::Result;
use console::style;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::command::CommandRunner;
use crate::core::telemetry::Telemetry;
use crate::core::telemetry::agents::jobs_per_agent;
use crate::core::terminal::{
    GuideSection, LOOKING_GLASS, print_error, print_info, print_step, print_success, print_warn,
};
use crate::platform::{NativePlatform, Platform};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckLevel {
    Ok,
    Warn,
}

#[derive(Debug, Clone)]
pub(crate) struct Check {
    pub label: String,
    pub level: CheckLevel,
    pub detail: String,
}

impl Check {
    fn print(&self) {
        let line = format!("{}: {}", self.label, self.detail);
        match self.level {
            CheckLevel::Ok => print_success(&line),
            CheckLevel::Warn => print_warn(&line),
        }
    }
}

/// Checks a command-line collaborator. `fallback` names what covers for it
/// when missing.
async fn check_tool(runner: &dyn CommandRunner, tool: &str, fallback: &str) -> Check {
    let output = runner
        .run(&NativePlatform::tool_lookup_command(tool), LOOKUP_TIMEOUT)
        .await;
    match output.usable_stdout() {
        Some(location) => Check {
            label: tool.to_string(),
            level: CheckLevel::Ok,
            detail: format!("found at {}", location),
        },
        None => Check {
            label: tool.to_string(),
            level: CheckLevel::Warn,
            detail: format!("not on PATH ({})", fallback),
        },
    }
}

fn check_path(label: &str, path: &Path) -> Check {
    let (level, state) = if path.is_dir() {
        (CheckLevel::Ok, "directory")
    } else if path.is_file() {
        (CheckLevel::Ok, "file")
    } else {
        (CheckLevel::Warn, "missing")
    };
    Check {
        label: label.to_string(),
        level,
        detail: format!("{} ({})", path.display(), state),
    }
}

pub(crate) async fn collect_checks(telemetry: &Telemetry) -> Vec<Check> {
    let commands = &telemetry.config().commands;
    let runner = telemetry.runner();
    let (openclaw, sqlite, df) = tokio::join!(
        check_tool(runner, &commands.openclaw_bin, "jobs file and defaults are used"),
        check_tool(runner, &commands.sqlite_bin, "native driver still reads the leads store"),
        check_tool(runner, "df", "disk usage reports zeros"),
    );

    let paths = telemetry.paths();
    let locations: [(&str, &PathBuf); 12] = [
        ("automation home", &paths.openclaw_home),
        ("workspace", &paths.workspace),
        ("cron jobs file", &paths.cron_jobs_file),
        ("agent seeds", &paths.agents_file),
        ("payments log", &paths.payments_file),
        ("business metrics", &paths.metrics_file),
        ("leads database", &paths.leads_db),
        ("leads document", &paths.leads_file),
        ("lead batches", &paths.leads_batch_dir),
        ("audit cache", &paths.audit_cache_dir),
        ("drafts", &paths.drafts_dir),
        ("logs", &paths.log_dir),
    ];

    let mut checks = vec![openclaw, sqlite, df];
    checks.extend(locations.iter().map(|(label, path)| check_path(label, path)));
    checks
}

pub async fn run_doctor(telemetry: &Telemetry, config_path: &Path) -> Result<()> {
    print_step(&format!("{}Checking dashboard collaborators...", LOOKING_GLASS));
    if config_path.exists() {
        print_info(&format!("Config: {}", config_path.display()));
    } else {
        print_info(&format!(
            "Config: {} (not found, using defaults)",
            config_path.display()
        ));
    }
    print_info(&format!(
        "Commands run through: {}",
        NativePlatform::default_shell()
    ));
    println!();

    let checks = collect_checks(telemetry).await;
    for check in &checks {
        check.print();
    }

    let crons = telemetry.crons().await;
    let mut per_agent: Vec<(String, usize)> = jobs_per_agent(&crons.jobs).into_iter().collect();
    per_agent.sort();
    let mut section = GuideSection::new("Scheduled jobs").status(
        "Source",
        &format!("{:?} ({} jobs)", crons.source, crons.count).to_lowercase(),
    );
    for (agent, count) in &per_agent {
        section = section.status(agent, &format!("{} job(s)", count));
    }
    section.print();
    println!();

    let warnings = checks
        .iter()
        .filter(|c| c.level == CheckLevel::Warn)
        .count();
    if warnings == 0 {
        print_success("Everything the dashboard reads is reachable.");
    } else {
        print_error(&format!(
            "{} collaborator(s) missing; the matching panels will show defaults.",
            style(warnings).bold()
        ));
    }
    Ok(())
}
