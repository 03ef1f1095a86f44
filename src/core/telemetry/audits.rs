use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, info};

use super::buckets::Buckets;
use super::extract::{self, Rule};
use super::types::{AuditReport, AuditSummary};
use crate::core::files::{self, FileEntry};

const RECENT_LIMIT: usize = 5;

const ID: &[Rule] = &[&["id"], &["auditId"], &["audit_id"]];
const NAME: &[Rule] = &[
    &["businessName"],
    &["business_name"],
    &["name"],
    &["report", "businessName"],
    &["report", "business_name"],
    &["report", "name"],
    &["report", "business", "name"],
    &["report", "business", "businessName"],
];
const SCORE: &[Rule] = &[
    &["score"],
    &["overallScore"],
    &["overall_score"],
    &["report", "score"],
    &["report", "overallScore"],
    &["report", "overall_score"],
    &["report", "business", "score"],
    &["report", "business", "overallScore"],
];
const TIMESTAMP: &[Rule] = &[
    &["timestamp"],
    &["auditedAt"],
    &["audited_at"],
    &["createdAt"],
    &["created_at"],
    &["date"],
    &["report", "timestamp"],
    &["report", "generatedAt"],
];

/// Scores of ten or less are on a 0-10 scale.
pub fn normalize_score(raw: Option<f64>) -> u8 {
    let Some(raw) = raw else {
        return 0;
    };
    let scaled = if raw <= 10.0 { raw * 10.0 } else { raw };
    scaled.clamp(0.0, 100.0).round() as u8
}

fn summarize_file(file: &FileEntry, doc: &Value) -> AuditSummary {
    let stem = file
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.name.clone());
    AuditSummary {
        id: extract::first_string(doc, ID).unwrap_or_else(|| stem.clone()),
        business_name: extract::first_string(doc, NAME).unwrap_or(stem),
        score: normalize_score(extract::first_number(doc, SCORE)),
        timestamp: extract::first_timestamp(doc, TIMESTAMP).or(file.modified),
    }
}

#[derive(Debug, Clone)]
pub struct AuditSummaryLoader {
    pub cache_dir: PathBuf,
}

impl AuditSummaryLoader {
    pub async fn load(&self) -> Vec<AuditSummary> {
        let mut audits = Vec::new();
        for file in files::list_files(&self.cache_dir, Some("json")).await {
            match files::read_json_value(&file.path).await {
                Some(doc @ Value::Object(_)) => audits.push(summarize_file(&file, &doc)),
                Some(_) => debug!("Skipping non-object audit file {}", file.name),
                None => {}
            }
        }
        audits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        audits
    }

    pub async fn fetch(&self, buckets: &Buckets) -> AuditReport {
        let audits = self.load().await;
        let today = audits
            .iter()
            .filter(|a| a.timestamp.is_some_and(|t| t >= buckets.today))
            .count();
        info!(total = audits.len(), today, "Loaded audit summaries");
        AuditReport {
            total: audits.len(),
            today,
            recent: audits.into_iter().take(RECENT_LIMIT).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn scores_scale_and_clamp() {
        assert_eq!(normalize_score(Some(7.0)), 70);
        assert_eq!(normalize_score(Some(85.0)), 85);
        assert_eq!(normalize_score(Some(-3.0)), 0);
        assert_eq!(normalize_score(Some(140.0)), 100);
        assert_eq!(normalize_score(Some(8.5)), 85);
        assert_eq!(normalize_score(Some(10.0)), 100);
        assert_eq!(normalize_score(None), 0);
    }

    #[test]
    fn nested_report_fields_are_found() {
        let file = FileEntry {
            path: PathBuf::from("/cache/bakery-1.json"),
            name: "bakery-1.json".into(),
            modified: None,
        };
        let doc = json!({"report": {"overallScore": 8.5, "business": {"name": "Corner Bakery"}}});
        let summary = summarize_file(&file, &doc);
        assert_eq!(summary.score, 85);
        assert_eq!(summary.business_name, "Corner Bakery");
        assert_eq!(summary.id, "bakery-1");
        assert_eq!(summary.timestamp, None);
    }

    #[test]
    fn top_level_fields_win_over_nested() {
        let file = FileEntry {
            path: PathBuf::from("/cache/a.json"),
            name: "a.json".into(),
            modified: None,
        };
        let doc = json!({"id": "aud-9", "businessName": "Top", "score": "72", "report": {"score": 3, "name": "Nested"}});
        let summary = summarize_file(&file, &doc);
        assert_eq!(summary.business_name, "Top");
        assert_eq!(summary.score, 72);
        assert_eq!(summary.id, "aud-9");
    }

    #[tokio::test]
    async fn fetch_counts_today_and_caps_recent() {
        let dir = tempfile::tempdir().unwrap();
        let tz = FixedOffset::east_opt(0).unwrap();
        let now = tz.with_ymd_and_hms(2026, 10, 14, 15, 0, 0).unwrap();
        for i in 0..7 {
            let at = Utc.with_ymd_and_hms(2026, 10, 14 - (i % 2), 9, i, 0).unwrap();
            std::fs::write(
                dir.path().join(format!("audit-{}.json", i)),
                json!({"businessName": format!("Biz {}", i), "score": 6, "timestamp": at.to_rfc3339()}).to_string(),
            )
            .unwrap();
        }
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();
        std::fs::write(dir.path().join("list.json"), "[1, 2]").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let loader = AuditSummaryLoader {
            cache_dir: dir.path().to_path_buf(),
        };
        let report = loader.fetch(&Buckets::at(&now)).await;
        assert_eq!(report.total, 7);
        assert_eq!(report.today, 4);
        assert_eq!(report.recent.len(), 5);
        assert_eq!(report.recent[0].business_name, "Biz 6");
        assert!(report.recent.iter().all(|a| a.score == 60));
    }

    #[tokio::test]
    async fn missing_timestamp_falls_back_to_mtime() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.json"), r#"{"name": "No Date"}"#).unwrap();
        let loader = AuditSummaryLoader {
            cache_dir: dir.path().to_path_buf(),
        };
        let audits = loader.load().await;
        assert_eq!(audits.len(), 1);
        assert!(audits[0].timestamp.is_some());
        assert_eq!(audits[0].score, 0);
    }

    #[tokio::test]
    async fn missing_cache_dir_is_empty() {
        let loader = AuditSummaryLoader {
            cache_dir: PathBuf::from("/nonexistent/audits/cache"),
        };
        let report = loader.fetch(&Buckets::now_local()).await;
        assert_eq!(report.total, 0);
        assert!(report.recent.is_empty());
    }
}
