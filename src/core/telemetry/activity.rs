use chrono::{DateTime, Utc};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::debug;

use super::extract;
use super::types::{ActivityEvent, ActivityReport};
use crate::core::files;

/// Lines read from the end of each log file.
const LINES_PER_FILE: usize = 50;
/// Stop opening further files once this many lines were gathered.
const GATHER_LIMIT: usize = 75;
/// Events returned to the caller.
const EVENT_LIMIT: usize = 50;

static LEADING_TIMESTAMP: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(
        r"^\s*\[?(\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(?::\d{2}(?:[.,]\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?)\]?",
    )
});

/// Timestamp at the start of a log line, bracketed or not.
pub fn leading_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let re = LEADING_TIMESTAMP.as_ref().ok()?;
    let raw = re.captures(line)?.get(1)?.as_str().replace(',', ".");
    extract::parse_timestamp_str(&raw).or_else(|| {
        DateTime::parse_from_str(&raw.replacen('T', " ", 1), "%Y-%m-%d %H:%M:%S%.f%z")
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

#[derive(Debug, Clone)]
pub struct ActivityLogReader {
    pub log_dir: PathBuf,
}

impl ActivityLogReader {
    pub async fn fetch(&self) -> ActivityReport {
        let mut events = Vec::new();
        for file in files::list_files(&self.log_dir, None).await {
            if events.len() >= GATHER_LIMIT {
                break;
            }
            let lines = match files::tail_lines(&file.path, LINES_PER_FILE).await {
                Ok(lines) => lines,
                Err(e) => {
                    files::log_source_error(&e);
                    continue;
                }
            };
            for line in lines.into_iter().filter(|l| !l.trim().is_empty()) {
                if events.len() >= GATHER_LIMIT {
                    break;
                }
                events.push(ActivityEvent {
                    file: file.name.clone(),
                    timestamp: leading_timestamp(&line),
                    line,
                });
            }
        }

        // Stable sort: undated lines sort first and keep their file order.
        events.sort_by_key(|e| e.timestamp);
        let skip = events.len().saturating_sub(EVENT_LIMIT);
        let events: Vec<ActivityEvent> = events.into_iter().skip(skip).collect();
        debug!(count = events.len(), "Read activity window");
        ActivityReport {
            count: events.len(),
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::{Duration, SystemTime};

    #[test]
    fn timestamps_are_found_with_or_without_brackets() {
        let expected = Utc.with_ymd_and_hms(2026, 10, 19, 8, 15, 30).unwrap();
        assert_eq!(leading_timestamp("[2026-10-19T08:15:30Z] gateway up"), Some(expected));
        assert_eq!(leading_timestamp("2026-10-19 08:15:30 cron ran"), Some(expected));
        assert_eq!(
            leading_timestamp("2026-10-19T10:15:30+0200 shifted"),
            Some(expected)
        );
        assert_eq!(leading_timestamp("no time here"), None);
        assert_eq!(leading_timestamp("later 2026-10-19T08:15:30Z"), None);
    }

    fn write_log(dir: &std::path::Path, name: &str, lines: &[String], age_secs: u64) {
        let path = dir.join(name);
        std::fs::write(&path, lines.join("\n")).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(mtime).unwrap();
    }

    #[tokio::test]
    async fn window_is_bounded_and_sorted_ascending() {
        let dir = tempfile::tempdir().unwrap();
        let newest: Vec<String> = (0..60)
            .map(|i| format!("2026-10-19T10:{:02}:00Z new {}", i % 60, i))
            .collect();
        let older: Vec<String> = (0..40)
            .map(|i| format!("2026-10-18T09:{:02}:00Z old {}", i, i))
            .collect();
        write_log(dir.path(), "gateway.log", &newest, 10);
        write_log(dir.path(), "cron.log", &older, 3600);

        let report = ActivityLogReader {
            log_dir: dir.path().to_path_buf(),
        }
        .fetch()
        .await;

        assert_eq!(report.count, EVENT_LIMIT);
        assert_eq!(report.events.len(), EVENT_LIMIT);
        // 50 from gateway.log plus 25 from cron.log gathered; oldest 25 dropped.
        assert!(report.events.iter().all(|e| e.file == "gateway.log"));
        let stamps: Vec<_> = report.events.iter().map(|e| e.timestamp).collect();
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted);
        assert!(report.events.last().unwrap().line.ends_with("new 59"));
    }

    #[tokio::test]
    async fn undated_lines_sort_earliest() {
        let dir = tempfile::tempdir().unwrap();
        write_log(
            dir.path(),
            "app.log",
            &[
                "2026-10-19T08:00:00Z started".to_string(),
                String::new(),
                "plain continuation".to_string(),
            ],
            0,
        );
        let report = ActivityLogReader {
            log_dir: dir.path().to_path_buf(),
        }
        .fetch()
        .await;
        assert_eq!(report.count, 2);
        assert_eq!(report.events[0].timestamp, None);
        assert_eq!(report.events[0].line, "plain continuation");
    }

    #[tokio::test]
    async fn missing_log_dir_is_empty() {
        let report = ActivityLogReader {
            log_dir: PathBuf::from("/nonexistent/logs"),
        }
        .fetch()
        .await;
        assert_eq!(report.count, 0);
    }
}
