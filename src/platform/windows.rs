use std::path::{Path, PathBuf};

use super::{Platform, resolve_data_dir, shell_quote};

pub struct NativePlatform;

impl Platform for NativePlatform {
    fn default_shell() -> &'static str {
        "bash"
    }

    fn shell_inline(command: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("bash");
        cmd.arg("-c").arg(command);
        cmd
    }

    // Git Bash / MSYS ship a POSIX df, so the same tabular format applies.
    fn disk_usage_command(path: &Path) -> String {
        format!("df -kP {}", shell_quote(path))
    }

    fn tool_lookup_command(tool: &str) -> String {
        format!("command -v {}", tool)
    }

    fn data_dir() -> PathBuf {
        let base = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        resolve_data_dir(base.join("opsdeck"))
    }

    fn openclaw_home() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".openclaw")
    }
}
