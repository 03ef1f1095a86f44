use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

use crate::core::error::SourceError;

/// Largest tail window read from a log file when only the last lines are wanted.
const TAIL_WINDOW_BYTES: u64 = 256 * 1024;

/// A directory entry together with its modification time.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: PathBuf,
    pub name: String,
    pub modified: Option<DateTime<Utc>>,
}

pub async fn read_text(path: &Path) -> Result<String, SourceError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|error| SourceError::Io {
            path: path.to_path_buf(),
            error,
        })
}

pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, SourceError> {
    let content = read_text(path).await?;
    serde_json::from_str(&content).map_err(|error| SourceError::Json {
        path: path.to_path_buf(),
        error,
    })
}

pub async fn read_json_value(path: &Path) -> Option<serde_json::Value> {
    match read_json::<serde_json::Value>(path).await {
        Ok(value) => Some(value),
        Err(e) => {
            log_source_error(&e);
            None
        }
    }
}

pub(crate) fn log_source_error(e: &SourceError) {
    if e.is_not_found() {
        debug!("{}", e);
    } else {
        warn!("{}", e);
    }
}

/// Regular files in `dir` (optionally filtered by extension), newest-modified first.
/// A missing directory yields an empty list.
pub async fn list_files(dir: &Path, extension: Option<&str>) -> Vec<FileEntry> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(error) => {
            log_source_error(&SourceError::Io {
                path: dir.to_path_buf(),
                error,
            });
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        if let Some(ext) = extension
            && path.extension().and_then(|e| e.to_str()) != Some(ext)
        {
            continue;
        }
        files.push(FileEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            path,
        });
    }

    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
    files
}

/// Last `max_lines` non-empty lines of a text file, oldest first.
pub async fn tail_lines(path: &Path, max_lines: usize) -> Result<Vec<String>, SourceError> {
    let io_err = |error| SourceError::Io {
        path: path.to_path_buf(),
        error,
    };
    let mut file = tokio::fs::File::open(path).await.map_err(io_err)?;
    let len = file.metadata().await.map_err(io_err)?.len();
    let start = len.saturating_sub(TAIL_WINDOW_BYTES);
    file.seek(std::io::SeekFrom::Start(start))
        .await
        .map_err(io_err)?;

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await.map_err(io_err)?;
    let text = String::from_utf8_lossy(&buf);

    let mut lines: Vec<&str> = text.lines().collect();
    // The first line of a mid-file window is usually cut in half.
    if start > 0 && !lines.is_empty() {
        lines.remove(0);
    }
    let lines: Vec<String> = lines
        .into_iter()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect();
    let skip = lines.len().saturating_sub(max_lines);
    Ok(lines.into_iter().skip(skip).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq, Default)]
    struct Sample {
        name: String,
    }

    #[tokio::test]
    async fn read_json_parses_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.json");
        std::fs::write(&path, r#"{"name":"ok"}"#).unwrap();
        let parsed: Sample = read_json(&path).await.unwrap();
        assert_eq!(parsed.name, "ok");
    }

    #[tokio::test]
    async fn missing_file_error_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_text(&dir.path().join("nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_files_filters_extension_and_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("b.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("nested.json")).unwrap();

        let files = list_files(dir.path(), Some("json")).await;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "a.json");
        assert!(files[0].modified.is_some());

        assert_eq!(list_files(dir.path(), None).await.len(), 2);
        assert!(list_files(&dir.path().join("absent"), None).await.is_empty());
    }

    #[tokio::test]
    async fn tail_lines_returns_last_non_empty_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let content: String = (1..=10).map(|i| format!("line {}\n\n", i)).collect();
        std::fs::write(&path, content).unwrap();

        let lines = tail_lines(&path, 3).await.unwrap();
        assert_eq!(lines, vec!["line 8", "line 9", "line 10"]);
    }

    #[tokio::test]
    async fn tail_lines_drops_partial_first_line_of_large_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.log");
        let line = "x".repeat(1000);
        let content: String = (0..400).map(|i| format!("{} {}\n", i, line)).collect();
        std::fs::write(&path, content).unwrap();

        let lines = tail_lines(&path, 1000).await.unwrap();
        assert!(lines.iter().all(|l| l.ends_with(&line)));
        assert!(lines.last().unwrap().starts_with("399 "));
    }
}
