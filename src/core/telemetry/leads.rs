use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::extract::{self, Rule};
use super::types::{Lead, LeadReport};
use crate::core::command::CommandRunner;
use crate::core::error::SourceError;
use crate::core::files;
use crate::platform::shell_quote;

pub const LEADS_QUERY: &str = "SELECT * FROM leads";

const NAME: &[Rule] = &[
    &["name"],
    &["business_name"],
    &["businessName"],
    &["company"],
    &["title"],
];
const EMAIL: &[Rule] = &[&["email"], &["contact_email"], &["contactEmail"]];
const WEBSITE: &[Rule] = &[&["website"], &["url"], &["site"], &["domain"]];
const SOURCE: &[Rule] = &[&["source"], &["lead_source"], &["leadSource"]];
const CREATED: &[Rule] = &[
    &["created_at"],
    &["createdAt"],
    &["timestamp"],
    &["scraped_at"],
    &["scrapedAt"],
    &["date"],
];

/// One way of reading the structured leads store. Every strategy maps its
/// rows by column name into the same [`LeadRow`] shape.
#[async_trait]
pub trait LeadStore: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch_rows(&self) -> Result<Vec<LeadRow>, SourceError>;
}

/// Native SQLite driver, opened read-only.
pub struct SqliteDriverStore {
    pub db_path: PathBuf,
}

fn query_rows(path: &Path) -> Result<Vec<LeadRow>, SourceError> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(Duration::from_secs(2))?;
    let mut stmt = conn.prepare(LEADS_QUERY)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let rows = stmt.query_map([], |row| {
        let mut map = Map::new();
        for (i, column) in columns.iter().enumerate() {
            let value = match row.get_ref(i)? {
                ValueRef::Null | ValueRef::Blob(_) => Value::Null,
                ValueRef::Integer(n) => Value::from(n),
                ValueRef::Real(f) => Value::from(f),
                ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
            };
            map.insert(column.clone(), value);
        }
        Ok(LeadRow::from_record(&Value::Object(map)))
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

#[async_trait]
impl LeadStore for SqliteDriverStore {
    fn name(&self) -> &'static str {
        "sqlite driver"
    }

    async fn fetch_rows(&self) -> Result<Vec<LeadRow>, SourceError> {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || query_rows(&path))
            .await
            .map_err(|e| SourceError::Unavailable(format!("driver task failed: {}", e)))?
    }
}

/// `sqlite3 -json` through the command runner, for hosts where the driver
/// cannot open the file (e.g. a newer on-disk format or a locked WAL).
pub struct SqliteCliStore<'a> {
    pub db_path: PathBuf,
    pub sqlite_bin: String,
    pub runner: &'a dyn CommandRunner,
    pub timeout: Duration,
}

#[async_trait]
impl LeadStore for SqliteCliStore<'_> {
    fn name(&self) -> &'static str {
        "sqlite3 cli"
    }

    async fn fetch_rows(&self) -> Result<Vec<LeadRow>, SourceError> {
        let cmd = format!(
            "{} -readonly -json {} '{}'",
            self.sqlite_bin,
            shell_quote(&self.db_path),
            LEADS_QUERY
        );
        let output = self.runner.run(&cmd, self.timeout).await;
        if !output.ok {
            return Err(SourceError::Unavailable(format!(
                "sqlite3 failed: {}",
                output.stderr.trim()
            )));
        }
        // sqlite3 prints nothing at all for an empty result set.
        if output.stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        let value = extract::json_from_cli(&output.stdout)
            .ok_or_else(|| SourceError::shape("sqlite3 cli", "output is not JSON"))?;
        let records = extract::collection(value, "rows", "sqlite3 cli")?;
        Ok(records.iter().map(LeadRow::from_record).collect())
    }
}

/// Tries each strategy in order; the first that answers wins, even with zero
/// rows. When all fail the store contributes nothing.
pub struct StoreChain<'a> {
    stores: Vec<Box<dyn LeadStore + 'a>>,
}

impl<'a> StoreChain<'a> {
    pub fn new(stores: Vec<Box<dyn LeadStore + 'a>>) -> Self {
        Self { stores }
    }

    pub async fn fetch_rows(&self) -> (Option<&'static str>, Vec<LeadRow>) {
        for store in &self.stores {
            match store.fetch_rows().await {
                Ok(rows) => {
                    debug!("Leads store answered via {} ({} rows)", store.name(), rows.len());
                    return (Some(store.name()), rows);
                }
                Err(e) => warn!("Leads store via {} unavailable: {}", store.name(), e),
            }
        }
        (None, Vec::new())
    }
}

/// One lead as any store yields it, before identity and source defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadRow {
    pub name: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub source: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl LeadRow {
    pub fn from_record(record: &Value) -> Self {
        Self {
            name: extract::first_string(record, NAME),
            email: extract::first_string(record, EMAIL),
            website: extract::first_string(record, WEBSITE),
            source: extract::first_string(record, SOURCE),
            created_at: extract::first_timestamp(record, CREATED),
        }
    }

    /// `None` when the row carries no name, email or website at all.
    fn into_lead(self, default_source: &str, fallback_created: Option<DateTime<Utc>>) -> Option<Lead> {
        let email = self.email.unwrap_or_default();
        let website = self.website.unwrap_or_default();
        let name = self
            .name
            .or_else(|| (!website.is_empty()).then(|| website.clone()))
            .or_else(|| (!email.is_empty()).then(|| email.clone()))?;
        Some(Lead {
            source: self.source.unwrap_or_else(|| default_source.to_string()),
            created_at: self.created_at.or(fallback_created),
            name,
            email,
            website,
        })
    }
}

fn normalize(record: &Value, default_source: &str, fallback_created: Option<DateTime<Utc>>) -> Option<Lead> {
    LeadRow::from_record(record).into_lead(default_source, fallback_created)
}

fn fold_website(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    let stripped = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let stripped = stripped.strip_prefix("www.").unwrap_or(stripped);
    stripped.trim_end_matches('/').to_string()
}

/// Composite identity over (email, website, name). A lead is a duplicate as
/// soon as any of its non-empty components was already claimed.
#[derive(Default)]
struct Deduper {
    emails: HashSet<String>,
    websites: HashSet<String>,
    names: HashSet<String>,
}

impl Deduper {
    fn admit(&mut self, lead: &Lead) -> bool {
        let email = lead.email.trim().to_lowercase();
        let website = fold_website(&lead.website);
        let name = lead.name.trim().to_lowercase();

        let seen = (!email.is_empty() && self.emails.contains(&email))
            || (!website.is_empty() && self.websites.contains(&website))
            || (!name.is_empty() && self.names.contains(&name));
        if seen {
            return false;
        }
        for (set, key) in [
            (&mut self.emails, email),
            (&mut self.websites, website),
            (&mut self.names, name),
        ] {
            if !key.is_empty() {
                set.insert(key);
            }
        }
        true
    }
}

/// Merge leads from stores given in priority order. First occurrence wins;
/// result is newest first with undated leads last.
pub fn merge(stores: &[Vec<Lead>]) -> Vec<Lead> {
    let mut deduper = Deduper::default();
    let mut merged: Vec<Lead> = stores
        .iter()
        .flatten()
        .filter(|lead| deduper.admit(lead))
        .cloned()
        .collect();
    merged.sort_by(|a, b| match (a.created_at, b.created_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    merged
}

#[derive(Debug, Clone)]
pub struct LeadAggregator {
    pub db_path: PathBuf,
    pub leads_file: PathBuf,
    pub batch_dir: PathBuf,
    pub sqlite_bin: String,
    pub timeout: Duration,
}

impl LeadAggregator {
    async fn from_structured_store(&self, runner: &dyn CommandRunner) -> Vec<Lead> {
        if !matches!(tokio::fs::try_exists(&self.db_path).await, Ok(true)) {
            debug!("No leads database at {}", self.db_path.display());
            return Vec::new();
        }
        let chain = StoreChain::new(vec![
            Box::new(SqliteDriverStore {
                db_path: self.db_path.clone(),
            }),
            Box::new(SqliteCliStore {
                db_path: self.db_path.clone(),
                sqlite_bin: self.sqlite_bin.clone(),
                runner,
                timeout: self.timeout,
            }),
        ]);
        let (_, rows) = chain.fetch_rows().await;
        rows.into_iter()
            .filter_map(|row| row.into_lead("database", None))
            .collect()
    }

    async fn from_document_store(&self) -> Vec<Lead> {
        let Some(value) = files::read_json_value(&self.leads_file).await else {
            return Vec::new();
        };
        match extract::collection(value, "leads", "leads document store") {
            Ok(records) => records
                .iter()
                .filter_map(|r| normalize(r, "leads.json", None))
                .collect(),
            Err(e) => {
                warn!("{}", e);
                Vec::new()
            }
        }
    }

    async fn from_batch_files(&self) -> Vec<Lead> {
        let mut batch_files = files::list_files(&self.batch_dir, Some("json")).await;
        // Export names carry their timestamp, so name order is export order.
        batch_files.sort_by(|a, b| a.name.cmp(&b.name));

        let mut leads = Vec::new();
        for file in batch_files {
            let Some(value) = files::read_json_value(&file.path).await else {
                continue;
            };
            let records = match value {
                Value::Object(ref map) if !map.contains_key("leads") => vec![value],
                other => extract::collection(other, "leads", &file.name).unwrap_or_else(|e| {
                    warn!("{}", e);
                    Vec::new()
                }),
            };
            let tag = format!("batch:{}", file.name);
            leads.extend(
                records
                    .iter()
                    .filter_map(|r| normalize(r, &tag, file.modified)),
            );
        }
        leads
    }

    pub async fn fetch(&self, runner: &dyn CommandRunner) -> LeadReport {
        let (structured, document, batch) = tokio::join!(
            self.from_structured_store(runner),
            self.from_document_store(),
            self.from_batch_files()
        );
        let raw_total = structured.len() + document.len() + batch.len();
        let leads = merge(&[structured, document, batch]);
        info!(
            count = leads.len(),
            duplicates = raw_total - leads.len(),
            "Merged leads"
        );
        LeadReport {
            count: leads.len(),
            leads,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::command::mock::MockRunner;
    use chrono::TimeZone;
    use serde_json::json;

    fn lead(name: &str, email: &str, website: &str, created: Option<DateTime<Utc>>) -> Lead {
        Lead {
            name: name.into(),
            email: email.into(),
            website: website.into(),
            source: "test".into(),
            created_at: created,
        }
    }

    fn at(day: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2026, 10, day, 9, 0, 0).unwrap())
    }

    fn aggregator(dir: &Path) -> LeadAggregator {
        LeadAggregator {
            db_path: dir.join("leads.db"),
            leads_file: dir.join("leads.json"),
            batch_dir: dir.join("batches"),
            sqlite_bin: "sqlite3".into(),
            timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn first_source_wins_on_any_matching_component() {
        let db = vec![lead("Acme", "sales@acme.io", "", at(3))];
        let doc = vec![
            lead("ACME ", "", "", at(4)),
            lead("Other", "SALES@acme.io", "", at(5)),
            lead("Bolt", "", "https://www.bolt.dev/", at(6)),
        ];
        let batch = vec![lead("Bolt Ltd", "", "bolt.dev", at(7))];
        let merged = merge(&[db, doc, batch]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "Bolt");
        assert_eq!(merged[1].email, "sales@acme.io");
    }

    #[test]
    fn merging_is_idempotent() {
        let stores = vec![
            vec![lead("A", "a@x.com", "", at(1)), lead("B", "", "b.com", None)],
            vec![lead("a", "", "", at(2)), lead("C", "c@x.com", "", at(3))],
            vec![lead("C", "", "", None), lead("D", "", "", None)],
        ];
        let once = merge(&stores);
        let twice_input: Vec<Vec<Lead>> = stores.iter().chain(stores.iter()).cloned().collect();
        let twice = merge(&twice_input);
        assert_eq!(once.len(), 4);
        assert_eq!(once.len(), twice.len());
        assert_eq!(merge(&[once.clone()]), once);
    }

    #[test]
    fn undated_leads_sort_last() {
        let merged = merge(&[vec![
            lead("Old", "", "", at(1)),
            lead("Undated", "", "", None),
            lead("New", "", "", at(9)),
        ]]);
        let names: Vec<&str> = merged.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["New", "Old", "Undated"]);
    }

    #[test]
    fn normalize_requires_some_identity() {
        assert!(normalize(&json!({"source": "x"}), "db", None).is_none());
        let l = normalize(&json!({"website": "acme.io"}), "db", None).unwrap();
        assert_eq!(l.name, "acme.io");
        assert_eq!(l.source, "db");
    }

    #[tokio::test]
    async fn document_store_beats_later_batch_export() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("leads.json"),
            json!([{"name": "Acme", "email": "a@x.com", "createdAt": "2026-10-01T10:00:00Z"}]).to_string(),
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("batches")).unwrap();
        std::fs::write(
            dir.path().join("batches").join("2026-10-05.json"),
            json!([{"business_name": "Acme", "website": ""}]).to_string(),
        )
        .unwrap();

        let report = aggregator(dir.path()).fetch(&MockRunner::new()).await;
        assert_eq!(report.count, 1);
        let acme = &report.leads[0];
        assert_eq!(acme.name, "Acme");
        assert_eq!(acme.email, "a@x.com");
        assert_eq!(
            acme.created_at,
            Some(Utc.with_ymd_and_hms(2026, 10, 1, 10, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn batch_files_fall_back_to_modification_time() {
        let dir = tempfile::tempdir().unwrap();
        let batches = dir.path().join("batches");
        std::fs::create_dir(&batches).unwrap();
        std::fs::write(batches.join("a.json"), r#"{"name": "Single Co"}"#).unwrap();
        std::fs::write(batches.join("b.json"), r#"{"leads": [{"name": "Keyed Co", "createdAt": 1760000000000}]}"#).unwrap();
        std::fs::write(batches.join("c.json"), "not json").unwrap();

        let report = aggregator(dir.path()).fetch(&MockRunner::new()).await;
        assert_eq!(report.count, 2);
        let single = report.leads.iter().find(|l| l.name == "Single Co").unwrap();
        assert!(single.created_at.is_some());
        assert_eq!(single.source, "batch:a.json");
    }

    #[tokio::test]
    async fn sqlite_driver_reads_rows_with_any_column_layout() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("leads.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute(
                "CREATE TABLE leads (id INTEGER PRIMARY KEY, business_name TEXT, email TEXT, website TEXT, created_at DATETIME)",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO leads (business_name, email, website, created_at) VALUES ('Acme', 'a@x.com', NULL, '2026-10-02 08:00:00')",
                [],
            )
            .unwrap();
        }
        std::fs::write(
            dir.path().join("leads.json"),
            json!([{"name": "acme", "createdAt": "2026-10-09T00:00:00Z"}]).to_string(),
        )
        .unwrap();

        let report = aggregator(dir.path()).fetch(&MockRunner::new()).await;
        assert_eq!(report.count, 1);
        assert_eq!(report.leads[0].source, "database");
        assert_eq!(
            report.leads[0].created_at,
            Some(Utc.with_ymd_and_hms(2026, 10, 2, 8, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn cli_store_is_used_when_driver_fails() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("leads.db");
        std::fs::write(&db_path, "this is not a sqlite database").unwrap();
        let runner = MockRunner::new().with(
            "sqlite3 -readonly -json",
            r#"[{"name": "Cli Lead", "email": "c@l.io", "website": null, "source": "scraper", "created_at": "2026-10-03 10:00:00"}]"#,
            true,
        );

        let report = aggregator(dir.path()).fetch(&runner).await;
        assert_eq!(report.count, 1);
        assert_eq!(report.leads[0].name, "Cli Lead");
        assert_eq!(report.leads[0].source, "scraper");
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_database_skips_the_store_chain() {
        let dir = tempfile::tempdir().unwrap();
        let runner = MockRunner::new().with(
            "sqlite3 -readonly -json",
            r#"[{"name": "Ghost", "email": "g@h.io"}]"#,
            true,
        );
        let report = aggregator(dir.path()).fetch(&runner).await;
        assert_eq!(report.count, 0);
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn chain_yields_empty_when_every_strategy_fails() {
        struct Broken;
        #[async_trait]
        impl LeadStore for Broken {
            fn name(&self) -> &'static str {
                "broken"
            }
            async fn fetch_rows(&self) -> Result<Vec<LeadRow>, SourceError> {
                Err(SourceError::Unavailable("down".into()))
            }
        }
        let chain = StoreChain::new(vec![Box::new(Broken), Box::new(Broken)]);
        let (answered_by, rows) = chain.fetch_rows().await;
        assert!(answered_by.is_none());
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn cli_store_treats_empty_output_as_no_rows() {
        let runner = MockRunner::new().with("sqlite3", "", true);
        let store = SqliteCliStore {
            db_path: PathBuf::from("/tmp/leads.db"),
            sqlite_bin: "sqlite3".into(),
            runner: &runner,
            timeout: Duration::from_secs(1),
        };
        assert!(store.fetch_rows().await.unwrap().is_empty());
    }
}
