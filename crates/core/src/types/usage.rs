use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Usage Ledger Types
// =============================================================================

/// An immutable, append-only usage fact. Never updated or deleted;
/// aggregated on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub record_id: String,
    pub model_id: String,
    pub user_id: String,
    #[serde(default)]
    pub request_id: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost: f64,
    pub currency: String,
    #[serde(default)]
    pub context: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated statistics for one model over a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    pub model_id: String,
    pub name: String,

    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,

    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,

    pub total_cost: f64,
    pub average_cost_per_request: f64,
    pub currency: String,

    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,

    #[serde(default)]
    pub top_users: Vec<UserUsage>,
}

/// Per-user rollup inside a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserUsage {
    pub user_id: String,
    pub requests: u64,
    pub total_tokens: u64,
    pub cost: f64,
}

/// One day of aggregated usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyUsage {
    /// ISO date (YYYY-MM-DD).
    pub date: String,
    pub requests: u64,
    pub total_tokens: u64,
    pub cost: f64,
}

/// A usage report, either for one user or system-wide (`user_id = None`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    #[serde(default)]
    pub user_id: Option<String>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,

    pub total_requests: u64,
    pub total_cost: f64,
    pub currency: String,

    #[serde(default)]
    pub model_usage: Vec<ModelStats>,
    #[serde(default)]
    pub daily_usage: Vec<DailyUsage>,
}
