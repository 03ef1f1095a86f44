use std::path::{Path, PathBuf};

use super::{Platform, resolve_data_dir, shell_quote};

pub struct NativePlatform;

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}

impl Platform for NativePlatform {
    fn default_shell() -> &'static str {
        "sh"
    }

    fn shell_inline(command: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }

    fn disk_usage_command(path: &Path) -> String {
        format!("df -kP {}", shell_quote(path))
    }

    fn tool_lookup_command(tool: &str) -> String {
        format!("command -v {}", tool)
    }

    fn data_dir() -> PathBuf {
        resolve_data_dir(home().join(".opsdeck"))
    }

    fn openclaw_home() -> PathBuf {
        home().join(".openclaw")
    }
}
