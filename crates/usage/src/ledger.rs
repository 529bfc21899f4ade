//! The usage ledger: append-only tracking and aggregation reports.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use modelflow_core::{
    traits::UsageStore,
    types::{DailyUsage, ModelStats, TokenUsage, UsageRecord, UsageReport, UserUsage},
    Result,
};

/// How long aggregated reports stay cached.
const REPORT_CACHE_TTL_SECS: i64 = 300;

#[derive(Clone)]
struct CachedReport {
    report: UsageReport,
    cached_at: DateTime<Utc>,
}

/// Tracks token usage and answers usage queries across all models.
///
/// Records are immutable facts aggregated on read; the persistent store is
/// the system of record and the report cache is a pure optimization that
/// starts empty on restart.
pub struct UsageLedger {
    store: Arc<dyn UsageStore>,
    report_cache: DashMap<String, CachedReport>,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self {
            store,
            report_cache: DashMap::new(),
        }
    }

    /// Record usage for one request. Tracking failures are the caller's to
    /// decide on; the ledger itself never mutates or retries a record.
    pub async fn track_usage(
        &self,
        model_id: &str,
        usage: &TokenUsage,
        estimated_cost: f64,
        currency: &str,
        user_id: &str,
        request_id: Option<&str>,
        context: Option<Value>,
    ) -> Result<()> {
        let record = UsageRecord {
            record_id: Uuid::new_v4().to_string(),
            model_id: model_id.to_string(),
            user_id: user_id.to_string(),
            request_id: request_id.map(|id| id.to_string()),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
            estimated_cost,
            currency: currency.to_string(),
            context,
            timestamp: Utc::now(),
        };

        self.store.insert(&record).await?;

        // New facts invalidate cached aggregates touching this user, plus
        // the system-wide ones.
        let user_prefix = format!("user:{}:", user_id);
        self.report_cache
            .retain(|key, _| !key.starts_with(&user_prefix) && !key.starts_with("total:"));

        tracing::debug!(
            model = %model_id,
            user = %user_id,
            tokens = usage.total_tokens,
            "Tracked usage"
        );
        Ok(())
    }

    /// Usage report for one user over the last `days` days.
    pub async fn user_usage(&self, user_id: &str, days: i64) -> Result<UsageReport> {
        let cache_key = format!("user:{}:{}", user_id, days);
        if let Some(cached) = self.cached(&cache_key) {
            return Ok(cached);
        }

        let end = Utc::now();
        let start = end - Duration::days(days);
        let records = self.store.by_user(user_id, start, end).await?;

        let report = aggregate(&records, Some(user_id.to_string()), start, end);
        self.cache(cache_key, &report);
        Ok(report)
    }

    /// System-wide usage report over the last `days` days.
    pub async fn total_usage(&self, days: i64) -> Result<UsageReport> {
        let cache_key = format!("total:{}", days);
        if let Some(cached) = self.cached(&cache_key) {
            return Ok(cached);
        }

        let end = Utc::now();
        let start = end - Duration::days(days);
        let records = self.store.all(start, end).await?;

        let report = aggregate(&records, None, start, end);
        self.cache(cache_key, &report);
        Ok(report)
    }

    /// Detailed statistics for one model over the last `days` days.
    pub async fn model_stats(&self, model_id: &str, days: i64) -> Result<ModelStats> {
        let end = Utc::now();
        let start = end - Duration::days(days);
        let records = self.store.by_model(model_id, start, end).await?;

        let mut stats = fold_model_stats(model_id, &records, start, end);
        stats.top_users = top_users(&records, 5);
        Ok(stats)
    }

    /// Drop every cached report.
    pub fn clear_cache(&self) {
        self.report_cache.clear();
        tracing::info!("Usage report cache cleared");
    }

    /// Number of cached reports.
    pub fn cached_count(&self) -> usize {
        self.report_cache.len()
    }

    fn cached(&self, key: &str) -> Option<UsageReport> {
        let entry = self.report_cache.get(key)?;
        if (Utc::now() - entry.cached_at).num_seconds() < REPORT_CACHE_TTL_SECS {
            Some(entry.report.clone())
        } else {
            None
        }
    }

    fn cache(&self, key: String, report: &UsageReport) {
        self.report_cache.insert(
            key,
            CachedReport {
                report: report.clone(),
                cached_at: Utc::now(),
            },
        );
    }
}

/// Human-readable name derived from a model id.
fn model_name(model_id: &str) -> String {
    model_id
        .replace(['-', '_'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn fold_model_stats(
    model_id: &str,
    records: &[UsageRecord],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> ModelStats {
    let total_requests = records.len() as u64;
    let total_input_tokens: u64 = records.iter().map(|r| r.input_tokens).sum();
    let total_output_tokens: u64 = records.iter().map(|r| r.output_tokens).sum();
    let total_tokens: u64 = records.iter().map(|r| r.total_tokens).sum();
    let total_cost: f64 = records.iter().map(|r| r.estimated_cost).sum();

    // Recorded requests completed; failures never reach the ledger.
    let (success_rate, average_cost_per_request) = if total_requests > 0 {
        (100.0, total_cost / total_requests as f64)
    } else {
        (0.0, 0.0)
    };

    ModelStats {
        model_id: model_id.to_string(),
        name: model_name(model_id),
        total_requests,
        successful_requests: total_requests,
        failed_requests: 0,
        success_rate,
        total_input_tokens,
        total_output_tokens,
        total_tokens,
        total_cost,
        average_cost_per_request,
        currency: records
            .first()
            .map(|r| r.currency.clone())
            .unwrap_or_else(|| "USD".to_string()),
        period_start: start,
        period_end: end,
        top_users: Vec::new(),
    }
}

fn top_users(records: &[UsageRecord], limit: usize) -> Vec<UserUsage> {
    let mut by_user: BTreeMap<&str, UserUsage> = BTreeMap::new();
    for record in records {
        let entry = by_user
            .entry(record.user_id.as_str())
            .or_insert_with(|| UserUsage {
                user_id: record.user_id.clone(),
                requests: 0,
                total_tokens: 0,
                cost: 0.0,
            });
        entry.requests += 1;
        entry.total_tokens += record.total_tokens;
        entry.cost += record.estimated_cost;
    }

    let mut users: Vec<UserUsage> = by_user.into_values().collect();
    users.sort_by(|a, b| b.cost.partial_cmp(&a.cost).unwrap_or(std::cmp::Ordering::Equal));
    users.truncate(limit);
    users
}

fn aggregate(
    records: &[UsageRecord],
    user_id: Option<String>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> UsageReport {
    let total_requests = records.len() as u64;
    let total_cost: f64 = records.iter().map(|r| r.estimated_cost).sum();

    // Group by model, deterministically ordered by model id
    let mut by_model: BTreeMap<&str, Vec<UsageRecord>> = BTreeMap::new();
    for record in records {
        by_model
            .entry(record.model_id.as_str())
            .or_default()
            .push(record.clone());
    }

    let system_wide = user_id.is_none();
    let leaders = if system_wide {
        top_users(records, 10)
    } else {
        Vec::new()
    };

    let model_usage: Vec<ModelStats> = by_model
        .into_iter()
        .map(|(model_id, model_records)| {
            let mut stats = fold_model_stats(model_id, &model_records, start, end);
            if system_wide {
                stats.top_users = leaders.clone();
            }
            stats
        })
        .collect();

    // Daily breakdown, ordered by date
    let mut by_day: BTreeMap<String, DailyUsage> = BTreeMap::new();
    for record in records {
        let date = record.timestamp.format("%Y-%m-%d").to_string();
        let entry = by_day.entry(date.clone()).or_insert_with(|| DailyUsage {
            date,
            requests: 0,
            total_tokens: 0,
            cost: 0.0,
        });
        entry.requests += 1;
        entry.total_tokens += record.total_tokens;
        entry.cost += record.estimated_cost;
    }

    UsageReport {
        user_id,
        period_start: start,
        period_end: end,
        total_requests,
        total_cost,
        currency: "USD".to_string(),
        model_usage,
        daily_usage: by_day.into_values().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelflow_store::InMemoryUsageStore;

    fn ledger() -> UsageLedger {
        UsageLedger::new(Arc::new(InMemoryUsageStore::new()))
    }

    #[test]
    fn test_model_name_formatting() {
        assert_eq!(model_name("gpt-4o-mini"), "Gpt 4o Mini");
        assert_eq!(model_name("neural_chat"), "Neural Chat");
    }

    #[tokio::test]
    async fn test_track_and_report() {
        let ledger = ledger();

        ledger
            .track_usage(
                "m1",
                &TokenUsage::new(100, 50),
                0.2,
                "USD",
                "user-1",
                Some("req-1"),
                None,
            )
            .await
            .unwrap();
        ledger
            .track_usage(
                "m1",
                &TokenUsage::new(200, 100),
                0.4,
                "USD",
                "user-1",
                Some("req-2"),
                None,
            )
            .await
            .unwrap();

        let report = ledger.user_usage("user-1", 30).await.unwrap();
        assert_eq!(report.total_requests, 2);
        assert!((report.total_cost - 0.6).abs() < 1e-9);
        assert_eq!(report.model_usage.len(), 1);
        assert_eq!(report.model_usage[0].total_tokens, 450);
        assert_eq!(report.daily_usage.len(), 1);
        assert_eq!(report.daily_usage[0].requests, 2);
    }

    #[tokio::test]
    async fn test_user_isolation() {
        let ledger = ledger();

        ledger
            .track_usage("m1", &TokenUsage::new(10, 10), 0.1, "USD", "alice", None, None)
            .await
            .unwrap();
        ledger
            .track_usage("m1", &TokenUsage::new(10, 10), 0.1, "USD", "bob", None, None)
            .await
            .unwrap();

        let alice = ledger.user_usage("alice", 30).await.unwrap();
        assert_eq!(alice.total_requests, 1);

        let total = ledger.total_usage(30).await.unwrap();
        assert_eq!(total.total_requests, 2);
        assert!(total.user_id.is_none());
    }

    #[tokio::test]
    async fn test_cache_invalidated_on_write() {
        let ledger = ledger();

        ledger
            .track_usage("m1", &TokenUsage::new(10, 10), 0.1, "USD", "u", None, None)
            .await
            .unwrap();

        let first = ledger.user_usage("u", 30).await.unwrap();
        assert_eq!(first.total_requests, 1);
        assert_eq!(ledger.cached_count(), 1);

        // A new record must be visible despite the cache
        ledger
            .track_usage("m1", &TokenUsage::new(10, 10), 0.1, "USD", "u", None, None)
            .await
            .unwrap();
        let second = ledger.user_usage("u", 30).await.unwrap();
        assert_eq!(second.total_requests, 2);
    }

    #[tokio::test]
    async fn test_model_stats_with_top_users() {
        let ledger = ledger();

        ledger
            .track_usage("m1", &TokenUsage::new(10, 10), 0.5, "USD", "big", None, None)
            .await
            .unwrap();
        ledger
            .track_usage("m1", &TokenUsage::new(10, 10), 0.1, "USD", "small", None, None)
            .await
            .unwrap();

        let stats = ledger.model_stats("m1", 30).await.unwrap();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.success_rate, 100.0);
        assert!((stats.average_cost_per_request - 0.3).abs() < 1e-9);
        assert_eq!(stats.top_users[0].user_id, "big");
    }
}
