use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::buckets::Buckets;
use super::extract::{self, Rule, round_cents};
use super::types::{RevenueEntry, RevenueReport, RevenueSource};
use crate::core::config::SyntheticFilterConfig;
use crate::core::files;

const RECENT_LIMIT: usize = 5;

const PAYMENT_AMOUNT: &[Rule] = &[&["amount"], &["total"], &["value"], &["revenue"]];
const METRIC_AMOUNT: &[Rule] = &[&["revenue"], &["amount"], &["total"], &["value"]];
const TIMESTAMP: &[Rule] = &[
    &["timestamp"],
    &["created_at"],
    &["createdAt"],
    &["paid_at"],
    &["paidAt"],
    &["date"],
    &["created"],
];
const NAME: &[Rule] = &[
    &["name"],
    &["business_name"],
    &["businessName"],
    &["customer_name"],
    &["customerName"],
    &["customer", "name"],
    &["client"],
    &["source"],
    &["email"],
];
const EMAIL: &[Rule] = &[
    &["email"],
    &["customer_email"],
    &["customerEmail"],
    &["customer", "email"],
    &["customer_details", "email"],
];
const SESSION: &[Rule] = &[
    &["session_id"],
    &["sessionId"],
    &["checkout_session"],
    &["id"],
];

/// Recognizes test and placeholder rows so they never reach a total.
#[derive(Debug, Clone)]
pub struct SyntheticFilter {
    names: Vec<String>,
    email_domains: Vec<String>,
    session_prefixes: Vec<String>,
}

impl From<&SyntheticFilterConfig> for SyntheticFilter {
    fn from(config: &SyntheticFilterConfig) -> Self {
        let lower = |list: &[String]| -> Vec<String> {
            list.iter().map(|s| s.trim().to_lowercase()).collect()
        };
        Self {
            names: lower(&config.names),
            email_domains: lower(&config.email_domains),
            session_prefixes: lower(&config.session_prefixes),
        }
    }
}

impl SyntheticFilter {
    pub fn is_synthetic(&self, record: &Value) -> bool {
        let name_hit = NAME.iter().filter_map(|r| extract::lookup(record, r)).any(|v| {
            v.as_str()
                .map(|s| self.names.contains(&s.trim().to_lowercase()))
                .unwrap_or(false)
        });
        if name_hit {
            return true;
        }

        let email_hit = extract::first_string(record, EMAIL).is_some_and(|email| {
            let email = email.to_lowercase();
            let domain = email.rsplit_once('@').map(|(_, d)| d).unwrap_or("");
            !domain.is_empty()
                && self
                    .email_domains
                    .iter()
                    .any(|d| domain == d || domain.ends_with(&format!(".{}", d)))
        });
        if email_hit {
            return true;
        }

        extract::first_string(record, SESSION).is_some_and(|session| {
            let session = session.to_lowercase();
            self.session_prefixes.iter().any(|p| session.starts_with(p))
        })
    }
}

/// Normalize one record; `None` when it has no positive amount or no timestamp.
fn normalize(record: &Value, source: RevenueSource) -> Option<RevenueEntry> {
    let amount_rules = match source {
        RevenueSource::Payments => PAYMENT_AMOUNT,
        RevenueSource::Metrics => METRIC_AMOUNT,
    };
    let amount = extract::first_number(record, amount_rules).filter(|a| *a > 0.0)?;
    let timestamp = extract::first_timestamp(record, TIMESTAMP)?;
    let name = extract::first_string(record, NAME).unwrap_or_else(|| match source {
        RevenueSource::Payments => "Unknown".to_string(),
        RevenueSource::Metrics => "Business metrics".to_string(),
    });
    Some(RevenueEntry {
        amount: round_cents(amount),
        timestamp,
        name,
        source,
    })
}

pub fn merge_entries(
    payments: &[Value],
    metrics: &[Value],
    filter: &SyntheticFilter,
) -> Vec<RevenueEntry> {
    let mut dropped = 0usize;
    let mut entries: Vec<RevenueEntry> = payments
        .iter()
        .map(|r| (r, RevenueSource::Payments))
        .chain(metrics.iter().map(|r| (r, RevenueSource::Metrics)))
        .filter(|(record, _)| {
            let synthetic = filter.is_synthetic(record);
            if synthetic {
                dropped += 1;
            }
            !synthetic
        })
        .filter_map(|(record, source)| normalize(record, source))
        .collect();
    if dropped > 0 {
        debug!("Excluded {} synthetic revenue record(s)", dropped);
    }
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    entries
}

/// Totals per calendar window plus the newest records. Expects `entries`
/// sorted newest first, as [`merge_entries`] returns them.
pub fn summarize(entries: &[RevenueEntry], buckets: &Buckets) -> RevenueReport {
    let total_since = |start| {
        round_cents(
            entries
                .iter()
                .filter(|e| e.timestamp >= start)
                .map(|e| e.amount)
                .sum(),
        )
    };
    RevenueReport {
        today: total_since(buckets.today),
        week: total_since(buckets.week),
        month: total_since(buckets.month),
        payments: entries.iter().take(RECENT_LIMIT).cloned().collect(),
        total_count: entries.len(),
    }
}

#[derive(Debug, Clone)]
pub struct RevenueAggregator {
    pub payments_file: PathBuf,
    pub metrics_file: PathBuf,
    pub filter: SyntheticFilter,
}

async fn load_records(path: &Path, key: &str, source_name: &str) -> Vec<Value> {
    let Some(value) = files::read_json_value(path).await else {
        return Vec::new();
    };
    extract::collection(value, key, source_name).unwrap_or_else(|e| {
        warn!("{}", e);
        Vec::new()
    })
}

impl RevenueAggregator {
    pub async fn fetch(&self, buckets: &Buckets) -> RevenueReport {
        let (payments, metrics) = tokio::join!(
            load_records(&self.payments_file, "payments", "payments log"),
            load_records(&self.metrics_file, "history", "business metrics")
        );
        let entries = merge_entries(&payments, &metrics, &self.filter);
        let report = summarize(&entries, buckets);
        info!(
            count = report.total_count,
            month = report.month,
            "Aggregated revenue"
        );
        report
    }
}
