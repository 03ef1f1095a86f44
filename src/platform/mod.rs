use std::path::{Path, PathBuf};

/// Platform-specific operations abstracted behind a common interface.
/// Each OS provides its own `NativePlatform` implementation so call sites
/// remain free of `#[cfg]` blocks.
pub trait Platform {
    /// Shell binary used to run inline collaborator commands (e.g. `"sh"` / `"bash"`).
    fn default_shell() -> &'static str;

    /// Build a **tokio** `Command` that runs an inline shell string.
    fn shell_inline(command: &str) -> tokio::process::Command;

    /// Shell command that prints filesystem usage for the mount holding `path`,
    /// in 1K blocks, POSIX tabular format (last line describes the mount).
    fn disk_usage_command(path: &Path) -> String;

    /// Shell snippet that exits 0 when `tool` is resolvable on `PATH`.
    fn tool_lookup_command(tool: &str) -> String;

    /// Root data directory for opsdeck.
    /// Unix: `~/.opsdeck`, Windows: `%APPDATA%\opsdeck`.
    fn data_dir() -> PathBuf;

    /// Home directory of the automation tool whose state the dashboard reads.
    fn openclaw_home() -> PathBuf;
}

/// `OPSDECK_HOME` wins over the platform default so tests and side-by-side
/// installs can point at their own tree.
pub(crate) fn resolve_data_dir(default: PathBuf) -> PathBuf {
    match std::env::var_os("OPSDECK_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => default,
    }
}

/// Quote a path for inclusion in a POSIX shell command line.
pub(crate) fn shell_quote(path: &Path) -> String {
    let raw = path.to_string_lossy();
    format!("'{}'", raw.replace('\'', "'\\''"))
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::NativePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::NativePlatform;
