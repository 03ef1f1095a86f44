mod doctor;

use anyhow::{Context, Result, bail};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::command::ShellRunner;
use crate::core::config::DashboardConfig;
use crate::core::lifecycle::LifecycleManager;
use crate::core::telemetry::{Resource, Telemetry};
use crate::core::terminal::{self, GuideSection, ROCKET, print_error};
use crate::interfaces::web::{ApiServer, ApiServerConfig};
use crate::logging;
use crate::platform::{NativePlatform, Platform};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Core")
        .command("serve", "Start the dashboard API")
        .command("snapshot", "Print one aggregate as JSON")
        .print();

    GuideSection::new("Diagnostics")
        .command("doctor", "Check which data sources are reachable")
        .command("help", "Show this message")
        .print();

    GuideSection::new("Options")
        .text("--config, -c <file>   Config file (default: ~/.opsdeck/opsdeck.toml)")
        .text("--host <addr>         Bind address for serve")
        .text("--port, -p <port>     Port for serve")
        .blank()
        .hint("opsdeck serve --port 18000", "")
        .hint("opsdeck snapshot revenue", "")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("opsdeck").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CliFlags {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config: Option<PathBuf>,
    /// First argument that is not a flag, e.g. the snapshot resource.
    pub positional: Option<String>,
}

pub(crate) fn parse_flags(args: &[String], start: usize) -> Result<CliFlags> {
    let mut flags = CliFlags::default();
    let mut i = start;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--host", Some(v)) => {
                flags.host = Some(v.clone());
                i += 2;
            }
            ("--port" | "-p", Some(v)) => {
                flags.port = Some(
                    v.parse()
                        .with_context(|| format!("invalid port '{}'", v))?,
                );
                i += 2;
            }
            ("--config" | "-c", Some(v)) => {
                flags.config = Some(PathBuf::from(v));
                i += 2;
            }
            ("--host" | "--port" | "-p" | "--config" | "-c", None) => {
                bail!("{} expects a value", args[i]);
            }
            (other, _) if !other.starts_with('-') && flags.positional.is_none() => {
                flags.positional = Some(other.to_string());
                i += 1;
            }
            (other, _) => bail!("Unknown option: {}", other),
        }
    }
    Ok(flags)
}

fn config_path(flags: &CliFlags) -> PathBuf {
    flags
        .config
        .clone()
        .unwrap_or_else(DashboardConfig::default_path)
}

fn build_telemetry(config: DashboardConfig, shutdown: CancellationToken) -> Telemetry {
    let runner = ShellRunner::new(config.commands.max_output_bytes);
    Telemetry::new(config, Arc::new(runner), shutdown)
}

async fn run_serve(flags: CliFlags) -> Result<()> {
    let mut config = DashboardConfig::load(Some(&config_path(&flags))).await?;
    if let Some(host) = flags.host {
        config.server.host = host;
    }
    if let Some(port) = flags.port {
        config.server.port = port;
    }
    logging::init(&config.logging, &NativePlatform::data_dir().join("run"), false);

    let shutdown = CancellationToken::new();
    let host = config.server.host.clone();
    let port = config.server.port;
    let allowed_origins = config.server.allowed_origins.clone();
    let telemetry = Arc::new(build_telemetry(config, shutdown.clone()));
    info!(
        "Reading automation state from {}",
        telemetry.paths().openclaw_home.display()
    );

    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(Arc::new(Mutex::new(ApiServer::new(ApiServerConfig {
        telemetry,
        api_host: host.clone(),
        api_port: port,
        allowed_origins,
        shutdown: shutdown.clone(),
    }))));
    lifecycle.start().await?;

    GuideSection::new(&format!("{}opsdeck", ROCKET))
        .status(
            "API",
            &format!(
                "{}",
                style(format!("http://{}:{}/api", host, port))
                    .underlined()
                    .cyan()
            ),
        )
        .blank()
        .status(
            "Press Ctrl+C to stop.",
            &format!("{}", style("Ctrl+C").bold().yellow()),
        )
        .print();
    println!();

    tokio::signal::ctrl_c().await?;
    lifecycle.shutdown().await?;
    Ok(())
}

async fn run_snapshot(flags: CliFlags) -> Result<()> {
    let Some(name) = flags.positional.as_deref() else {
        bail!(
            "snapshot needs a resource: {}",
            Resource::ALL.map(Resource::name).join(", ")
        );
    };
    let resource: Resource = name.parse()?;
    let config = DashboardConfig::load(Some(&config_path(&flags))).await?;
    // Stdout carries the JSON document; logs go to the run log only.
    logging::init(&config.logging, &NativePlatform::data_dir().join("run"), true);

    let telemetry = build_telemetry(config, CancellationToken::new());
    let value = telemetry.snapshot(resource).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn run_doctor(flags: CliFlags) -> Result<()> {
    let path = config_path(&flags);
    let config = DashboardConfig::load(Some(&path)).await?;
    let telemetry = build_telemetry(config, CancellationToken::new());
    doctor::run_doctor(&telemetry, &path).await
}

/// Returns whether the goodbye line should be printed.
pub async fn run_main() -> Result<bool> {
    let args: Vec<String> = std::env::args().collect();
    let Some(cmd) = args.get(1).map(String::as_str) else {
        print_help();
        return Ok(false);
    };

    match cmd {
        "serve" => {
            run_serve(parse_flags(&args, 2)?).await?;
            Ok(true)
        }
        "snapshot" => {
            run_snapshot(parse_flags(&args, 2)?).await?;
            Ok(false)
        }
        "doctor" => {
            run_doctor(parse_flags(&args, 2)?).await?;
            Ok(false)
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(false)
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_flags_reads_host_port_and_config() {
        let parsed = parse_flags(
            &args(&["opsdeck", "serve", "--host", "0.0.0.0", "-p", "18000", "--config", "/etc/opsdeck.toml"]),
            2,
        )
        .unwrap();
        assert_eq!(parsed.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(parsed.port, Some(18000));
        assert_eq!(parsed.config, Some(PathBuf::from("/etc/opsdeck.toml")));
        assert_eq!(parsed.positional, None);
    }

    #[test]
    fn parse_flags_takes_resource_as_positional() {
        let parsed = parse_flags(&args(&["opsdeck", "snapshot", "leads", "-c", "x.toml"]), 2).unwrap();
        assert_eq!(parsed.positional.as_deref(), Some("leads"));
        assert_eq!(parsed.config, Some(PathBuf::from("x.toml")));
    }

    #[test]
    fn parse_flags_rejects_bad_input() {
        assert!(parse_flags(&args(&["opsdeck", "serve", "--port", "http"]), 2).is_err());
        assert!(parse_flags(&args(&["opsdeck", "serve", "--port"]), 2).is_err());
        assert!(parse_flags(&args(&["opsdeck", "serve", "--verbose"]), 2).is_err());
        assert!(parse_flags(&args(&["opsdeck", "snapshot", "leads", "crons"]), 2).is_err());
    }
}
